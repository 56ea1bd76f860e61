use chrono::{DateTime, Utc};
use gfs_core::{
    ChatMessage, ChunkingConfig, Corpus, CustomMetadata, FileBlob, FileState, FileSummary,
    ManagedFile, MetadataField, QueryAnswer,
};
use gfs_error::GfsError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

/// 查询失败时追加的模型回复
pub const QUERY_FALLBACK_MESSAGE: &str = "Sorry, I encountered an error while searching your files.";

/// 向导的四个阶段，严格线性推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Create,
    Upload,
    Index,
    Query,
}

impl Step {
    pub const ALL: [Step; 4] = [Step::Create, Step::Upload, Step::Index, Step::Query];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Create => "create",
            Step::Upload => "upload",
            Step::Index => "index",
            Step::Query => "query",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Step::Create => "Create Store",
            Step::Upload => "Upload File",
            Step::Index => "Index File",
            Step::Query => "Query Store",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 状态机拒绝某个动作的原因。被拒绝时状态不变。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("store name is empty")]
    EmptyStoreName,
    #[error("question is empty")]
    EmptyQuestion,
    #[error("no files were provided")]
    NoFilesProvided,
    #[error("{action} is not available in the {step} step")]
    WrongStep { action: &'static str, step: Step },
    #[error("no store has been created yet")]
    NoStore,
    #[error("another operation is still in progress")]
    Busy,
    #[error("an upload is still in progress")]
    UploadInFlight,
    #[error("at least one file is required")]
    NoFiles,
    #[error("metadata entry {0} does not exist")]
    UnknownMetadata(String),
}

impl From<Rejection> for GfsError {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::EmptyStoreName | Rejection::EmptyQuestion | Rejection::NoFilesProvided => {
                GfsError::Validation {
                    message: r.to_string(),
                }
            }
            Rejection::UnknownMetadata(_) => GfsError::NotFound {
                resource: r.to_string(),
            },
            _ => GfsError::Conflict {
                details: r.to_string(),
            },
        }
    }
}

/// 一次 add_files 调用产生的上传批次
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadBatch {
    pub id: u64,
    pub file_ids: Vec<String>,
}

/// begin_query 返回的查询凭据：按顺序的文件与问题
#[derive(Debug, Clone)]
pub struct QueryTicket {
    pub files: Vec<Arc<FileBlob>>,
    pub question: String,
}

/// 单个用户会话的全部状态
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    last_accessed_at: Instant,
    step: Step,
    corpus: Option<Corpus>,
    files: Vec<ManagedFile>,
    chat: Vec<ChatMessage>,
    loading: bool,
    open_batches: BTreeMap<u64, Vec<String>>,
    next_batch_id: u64,
    upload_progress: f32,
    error: Option<String>,
    metadata: Vec<CustomMetadata>,
    chunking: ChunkingConfig,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            last_accessed_at: Instant::now(),
            step: Step::Create,
            corpus: None,
            files: Vec::new(),
            chat: Vec::new(),
            loading: false,
            open_batches: BTreeMap::new(),
            next_batch_id: 1,
            upload_progress: 0.0,
            error: None,
            metadata: Vec::new(),
            chunking: ChunkingConfig::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn touch(&mut self) {
        self.last_accessed_at = Instant::now();
    }

    /// 空闲超过 ttl 视为过期
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.last_accessed_at.elapsed() >= ttl
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn corpus(&self) -> Option<&Corpus> {
        self.corpus.as_ref()
    }

    pub fn files(&self) -> &[ManagedFile] {
        &self.files
    }

    pub fn chat(&self) -> &[ChatMessage] {
        &self.chat
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_uploading(&self) -> bool {
        !self.open_batches.is_empty()
    }

    pub fn upload_progress(&self) -> f32 {
        self.upload_progress
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn metadata(&self) -> &[CustomMetadata] {
        &self.metadata
    }

    pub fn chunking(&self) -> ChunkingConfig {
        self.chunking
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    fn require_step(&self, step: Step, action: &'static str) -> Result<(), Rejection> {
        if self.step == step {
            Ok(())
        } else {
            Err(Rejection::WrongStep {
                action,
                step: self.step,
            })
        }
    }

    fn require_store(&self) -> Result<&Corpus, Rejection> {
        self.corpus.as_ref().ok_or(Rejection::NoStore)
    }

    // ===== create =====

    /// 同步生成存储，随后需要调用 finish_store_creation 进入上传阶段
    pub fn create_store<R: Rng + ?Sized>(
        &mut self,
        display_name: &str,
        rng: &mut R,
    ) -> Result<&Corpus, Rejection> {
        self.require_step(Step::Create, "create_store")?;
        if self.loading {
            return Err(Rejection::Busy);
        }
        if display_name.trim().is_empty() {
            return Err(Rejection::EmptyStoreName);
        }
        self.error = None;
        self.loading = true;
        Ok(self.corpus.insert(Corpus::mint(display_name, rng)))
    }

    pub fn finish_store_creation(&mut self) -> bool {
        if self.step != Step::Create || self.corpus.is_none() {
            return false;
        }
        self.loading = false;
        self.step = Step::Upload;
        true
    }

    /// 存储后端失败时回到初始状态
    pub fn abort_store_creation(&mut self, message: impl Into<String>) {
        if self.step == Step::Create {
            self.corpus = None;
            self.loading = false;
            self.error = Some(message.into());
        }
    }

    // ===== upload =====

    pub fn add_files(&mut self, blobs: Vec<FileBlob>) -> Result<UploadBatch, Rejection> {
        self.require_store()?;
        self.require_step(Step::Upload, "add_files")?;
        if blobs.is_empty() {
            return Err(Rejection::NoFilesProvided);
        }

        let added: Vec<ManagedFile> = blobs.into_iter().map(ManagedFile::new).collect();
        let file_ids: Vec<String> = added.iter().map(|f| f.id.clone()).collect();
        self.files.extend(added);

        let id = self.next_batch_id;
        self.next_batch_id += 1;
        self.open_batches.insert(id, file_ids.clone());
        self.upload_progress = 0.0;
        Ok(UploadBatch { id, file_ids })
    }

    pub fn record_upload_progress(&mut self, batch_id: u64, percent: f32) {
        if self.open_batches.contains_key(&batch_id) {
            self.upload_progress = percent.clamp(0.0, 100.0);
        }
    }

    /// 关闭批次；已被移除的文件直接忽略
    pub fn complete_upload(&mut self, batch_id: u64, succeeded: bool) -> bool {
        let Some(ids) = self.open_batches.remove(&batch_id) else {
            return false;
        };
        let state = if succeeded {
            FileState::Ready
        } else {
            FileState::Failed
        };
        for file in self.files.iter_mut().filter(|f| ids.contains(&f.id)) {
            file.state = state;
        }
        if succeeded {
            self.upload_progress = 100.0;
        }
        true
    }

    pub fn remove_file(&mut self, file_id: &str) -> Result<bool, Rejection> {
        self.require_store()?;
        let before = self.files.len();
        self.files.retain(|f| f.id != file_id);
        Ok(self.files.len() != before)
    }

    pub fn can_proceed(&self) -> bool {
        self.step == Step::Upload && !self.files.is_empty() && !self.is_uploading()
    }

    pub fn proceed_to_index(&mut self) -> Result<(), Rejection> {
        self.require_step(Step::Upload, "proceed_to_index")?;
        if self.files.is_empty() {
            return Err(Rejection::NoFiles);
        }
        if self.is_uploading() {
            return Err(Rejection::UploadInFlight);
        }
        self.step = Step::Index;
        Ok(())
    }

    // ===== index =====

    pub fn finish_indexing(&mut self) -> bool {
        if self.step != Step::Index {
            return false;
        }
        self.step = Step::Query;
        true
    }

    /// 索引失败时退回上传阶段，保留文件
    pub fn abort_indexing(&mut self, message: impl Into<String>) {
        if self.step == Step::Index {
            self.step = Step::Upload;
            self.error = Some(message.into());
        }
    }

    // ===== query =====

    pub fn can_query(&self) -> bool {
        self.step == Step::Query && !self.loading && !self.files.is_empty()
    }

    pub fn begin_query(&mut self, question: &str) -> Result<QueryTicket, Rejection> {
        self.require_step(Step::Query, "query")?;
        let question = question.trim();
        if question.is_empty() {
            return Err(Rejection::EmptyQuestion);
        }
        if self.loading {
            return Err(Rejection::Busy);
        }
        if self.files.is_empty() {
            return Err(Rejection::NoFiles);
        }

        self.error = None;
        self.chat.push(ChatMessage::user(question));
        self.loading = true;
        Ok(QueryTicket {
            files: self.files.iter().map(|f| f.file.clone()).collect(),
            question: question.to_string(),
        })
    }

    /// 追加模型消息；失败时追加固定回复并设置错误横幅
    pub fn complete_query(&mut self, result: Result<QueryAnswer, GfsError>) -> &ChatMessage {
        let message = match result {
            Ok(answer) => ChatMessage::model(answer.text, Some(answer.sources)),
            Err(e) => {
                self.error = Some(format!("Error querying files: {}", e));
                ChatMessage::model(QUERY_FALLBACK_MESSAGE, None)
            }
        };
        self.loading = false;
        self.chat.push(message);
        &self.chat[self.chat.len() - 1]
    }

    // ===== advanced settings =====

    pub fn add_metadata(&mut self) -> Result<&CustomMetadata, Rejection> {
        self.require_store()?;
        self.metadata.push(CustomMetadata::empty());
        Ok(&self.metadata[self.metadata.len() - 1])
    }

    pub fn update_metadata(
        &mut self,
        meta_id: &str,
        field: MetadataField,
        text: &str,
    ) -> Result<(), Rejection> {
        self.require_store()?;
        let entry = self
            .metadata
            .iter_mut()
            .find(|m| m.id == meta_id)
            .ok_or_else(|| Rejection::UnknownMetadata(meta_id.to_string()))?;
        match field {
            MetadataField::Key => entry.key = text.to_string(),
            MetadataField::Value => entry.value = text.to_string(),
        }
        Ok(())
    }

    pub fn remove_metadata(&mut self, meta_id: &str) -> Result<(), Rejection> {
        self.require_store()?;
        let before = self.metadata.len();
        self.metadata.retain(|m| m.id != meta_id);
        if self.metadata.len() == before {
            return Err(Rejection::UnknownMetadata(meta_id.to_string()));
        }
        Ok(())
    }

    pub fn set_chunking(&mut self, config: ChunkingConfig) -> Result<(), Rejection> {
        self.require_store()?;
        self.chunking = config;
        Ok(())
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            created_at: self.created_at,
            step: self.step,
            corpus: self.corpus.clone(),
            files: self.files.iter().map(ManagedFile::summary).collect(),
            chat: self.chat.clone(),
            is_loading: self.loading,
            is_uploading: self.is_uploading(),
            upload_progress: self.upload_progress,
            error: self.error.clone(),
            metadata: self.metadata.clone(),
            chunking: self.chunking,
            can_proceed: self.can_proceed(),
            can_query: self.can_query(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// 会话快照，不含文件字节
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub step: Step,
    pub corpus: Option<Corpus>,
    pub files: Vec<FileSummary>,
    pub chat: Vec<ChatMessage>,
    pub is_loading: bool,
    pub is_uploading: bool,
    pub upload_progress: f32,
    pub error: Option<String>,
    pub metadata: Vec<CustomMetadata>,
    pub chunking: ChunkingConfig,
    pub can_proceed: bool,
    pub can_query: bool,
}
