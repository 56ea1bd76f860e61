pub mod backend;
pub mod scheduler;
pub mod service;
pub mod wizard;

// 重新导出核心类型
pub use backend::{SimulatedBackend, StoreBackend, WizardTimings};
pub use scheduler::{Operation, TaskKey, TaskScheduler};
pub use service::{QueryOutcome, SessionService, UploadGuideline, DEFAULT_IDLE_TTL};
pub use wizard::{
    QueryTicket, Rejection, Session, SessionView, Step, UploadBatch, QUERY_FALLBACK_MESSAGE,
};

// 错误类型
pub use gfs_error::{GfsError, Result};
