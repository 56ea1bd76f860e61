pub mod encode;
pub mod engine;

pub use encode::{file_to_part, files_to_parts, FALLBACK_MIME_TYPE};
pub use engine::{InlineQueryEngine, QueryEngine};

// 重新导出核心类型
pub use gfs_core::{FileBlob, QueryAnswer, Source};
pub use gfs_error::{GfsError, Result};
