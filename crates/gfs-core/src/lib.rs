use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// File Search API 存储资源名的前缀
pub const STORE_RESOURCE_PREFIX: &str = "fileSearchStores/";

const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 10;

/// 会话创建的文档存储，生成后不再变化
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Corpus {
    pub display_name: String,
    pub resource_name: String,
}

impl Corpus {
    /// 由显示名和指定后缀构造
    pub fn with_suffix(display_name: &str, suffix: &str) -> Self {
        let display_name = display_name.trim();
        Self {
            display_name: display_name.to_string(),
            resource_name: format!("{}{}-{}", STORE_RESOURCE_PREFIX, slugify(display_name), suffix),
        }
    }

    /// 用随机 base36 后缀生成，代替服务端分配的资源 id
    pub fn mint<R: Rng + ?Sized>(display_name: &str, rng: &mut R) -> Self {
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect();
        Self::with_suffix(display_name, &suffix)
    }
}

/// 转小写，连续空白替换为单个 `-`
pub fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// 浏览器上传的原始文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlob {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Uploading,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ManagedFile {
    pub id: String,
    pub file: Arc<FileBlob>,
    pub state: FileState,
    pub added_at: DateTime<Utc>,
}

impl ManagedFile {
    pub fn new(file: FileBlob) -> Self {
        Self {
            id: format!("{}-{}", file.name, Uuid::new_v4().simple()),
            file: Arc::new(file),
            state: FileState::Uploading,
            added_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> FileSummary {
        FileSummary {
            id: self.id.clone(),
            name: self.file.name.clone(),
            mime_type: self.file.mime_type.clone(),
            size_bytes: self.file.size(),
            state: self.state,
        }
    }
}

/// 不含内容的文件摘要，用于视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: usize,
    pub state: FileState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// 回答引用的文件，仅按名称展示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: None,
        }
    }

    pub fn model(content: impl Into<String>, sources: Option<Vec<Source>>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
            sources,
        }
    }
}

/// 上传时填写的自定义键值对，不会发送给模型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomMetadata {
    pub id: String,
    pub key: String,
    pub value: String,
}

impl CustomMetadata {
    pub fn empty() -> Self {
        Self {
            id: format!("meta-{}", Uuid::new_v4().simple()),
            key: String::new(),
            value: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataField {
    Key,
    Value,
}

/// 上传阶段展示的分块设置，仅作参考
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_tokens: u32,
    pub overlap_tokens: u32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            overlap_tokens: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub text: String,
    pub sources: Vec<Source>,
}

pub use gfs_error::{GfsError as Error, Result};
