use crate::backend::StoreBackend;
use crate::scheduler::{Operation, TaskKey, TaskScheduler};
use crate::wizard::{Session, SessionView};
use gfs_core::{ChatMessage, ChunkingConfig, CustomMetadata, FileBlob, MetadataField};
use gfs_error::{ErrorMetadataBuilder, GfsError, Result};
use gfs_rag::QueryEngine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn, Instrument};
use uuid::Uuid;

type Sessions = Arc<RwLock<HashMap<Uuid, Session>>>;

/// 会话默认空闲过期时间
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

/// 建议的上传限制，仅记录警告，不拒绝文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadGuideline {
    pub max_file_bytes: usize,
}

impl Default for UploadGuideline {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024,
        }
    }
}

impl UploadGuideline {
    const DOCUMENT_TYPES: [&'static str; 3] = [
        "application/pdf",
        "application/msword",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ];

    /// 返回文件偏离建议的地方
    pub fn deviations(&self, file: &FileBlob) -> Vec<String> {
        let mut out = Vec::new();
        if file.size() > self.max_file_bytes {
            out.push(format!(
                "{} bytes exceeds the suggested {} bytes",
                file.size(),
                self.max_file_bytes
            ));
        }
        let mime = file.mime_type.as_str();
        let suggested = mime.starts_with("text/")
            || mime.starts_with("image/")
            || Self::DOCUMENT_TYPES.contains(&mime);
        if !suggested {
            out.push(format!("type {:?} is outside the suggested types", mime));
        }
        out
    }
}

/// 查询结果：追加的模型消息和最新快照
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub message: ChatMessage,
    pub session: SessionView,
}

/// 持有所有活跃会话并驱动后台任务
#[derive(Clone)]
pub struct SessionService {
    sessions: Sessions,
    backend: Arc<dyn StoreBackend>,
    engine: Arc<dyn QueryEngine>,
    scheduler: TaskScheduler,
    guideline: UploadGuideline,
    idle_ttl: Duration,
}

async fn with_session<T>(
    sessions: &Sessions,
    id: Uuid,
    f: impl FnOnce(&mut Session) -> Result<T>,
) -> Result<T> {
    let mut map = sessions.write().await;
    let session = map.get_mut(&id).ok_or_else(|| session_not_found(id))?;
    session.touch();
    f(session)
}

fn session_not_found(id: Uuid) -> GfsError {
    GfsError::NotFound {
        resource: format!("session {}", id),
    }
}

fn report(err: &GfsError, session_id: Uuid, operation: &str) {
    let meta = ErrorMetadataBuilder::new("session")
        .operation(operation)
        .session_id(&session_id.to_string())
        .build(err);
    err.log(&meta);
}

impl SessionService {
    pub fn new(
        backend: Arc<dyn StoreBackend>,
        engine: Arc<dyn QueryEngine>,
        guideline: UploadGuideline,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            backend,
            engine,
            scheduler: TaskScheduler::new(),
            guideline,
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// 创建新会话
    pub async fn open_session(&self) -> SessionView {
        let session = Session::new();
        let view = session.view();
        self.sessions.write().await.insert(session.id(), session);
        info!(session_id = %view.id, "session opened");
        view
    }

    /// 获取会话快照
    pub async fn view(&self, id: Uuid) -> Result<SessionView> {
        with_session(&self.sessions, id, |s| Ok(s.view())).await
    }

    /// 关闭会话并取消它的后台任务
    pub async fn close_session(&self, id: Uuid) -> Result<()> {
        self.sessions
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| session_not_found(id))?;
        let cancelled = self.scheduler.cancel_session(id);
        info!(session_id = %id, cancelled, "session closed");
        Ok(())
    }

    /// 清理空闲过期的会话，查询进行中的会话保留。返回清理数量
    pub async fn sweep_expired(&self) -> usize {
        let mut map = self.sessions.write().await;
        let expired: Vec<Uuid> = map
            .values()
            .filter(|s| !s.is_loading() && s.is_expired(self.idle_ttl))
            .map(Session::id)
            .collect();
        for id in &expired {
            map.remove(id);
            let cancelled = self.scheduler.cancel_session(*id);
            info!(session_id = %id, cancelled, "idle session expired");
        }
        expired.len()
    }

    /// 后台定期清理过期会话
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                service.sweep_expired().await;
            }
        })
    }

    #[instrument(skip(self))]
    pub async fn create_store(&self, id: Uuid, display_name: &str) -> Result<SessionView> {
        let (corpus, view) = with_session(&self.sessions, id, |s| {
            let corpus = s.create_store(display_name, &mut rand::thread_rng())?.clone();
            Ok((corpus, s.view()))
        })
        .await?;
        info!(store = %corpus.resource_name, "store created");

        let sessions = self.sessions.clone();
        let backend = self.backend.clone();
        self.scheduler.schedule(
            TaskKey::new(id, Operation::ProvisionStore),
            async move {
                let result = backend.provision_store(&corpus).await;
                let applied = with_session(&sessions, id, |s| {
                    match &result {
                        Ok(()) => {
                            s.finish_store_creation();
                        }
                        Err(e) => s.abort_store_creation(format!("Error creating store: {}", e)),
                    }
                    Ok(())
                })
                .await;
                if let Err(e) = result.and(applied) {
                    report(&e, id, "provision_store");
                }
            },
        );
        Ok(view)
    }

    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn add_files(&self, id: Uuid, files: Vec<FileBlob>) -> Result<SessionView> {
        for file in &files {
            for deviation in self.guideline.deviations(file) {
                warn!(file = %file.name, %deviation, "file outside upload guideline");
            }
        }

        let (batch, corpus, blobs, view) = with_session(&self.sessions, id, |s| {
            let batch = s.add_files(files)?;
            let blobs: Vec<_> = s
                .files()
                .iter()
                .filter(|f| batch.file_ids.contains(&f.id))
                .map(|f| f.file.clone())
                .collect();
            let corpus = s.corpus().cloned().ok_or(crate::wizard::Rejection::NoStore)?;
            Ok((batch, corpus, blobs, s.view()))
        })
        .await?;
        info!(batch_id = batch.id, files = blobs.len(), "upload started");

        let sessions = self.sessions.clone();
        let backend = self.backend.clone();
        let batch_id = batch.id;
        self.scheduler.schedule(
            TaskKey::new(id, Operation::Upload { batch_id }),
            async move {
                let (tx, mut rx) = watch::channel(0.0f32);
                let upload = backend.upload(&corpus, &blobs, tx);
                tokio::pin!(upload);
                let result = loop {
                    tokio::select! {
                        biased;
                        res = &mut upload => break res,
                        Ok(()) = rx.changed() => {
                            let pct = *rx.borrow_and_update();
                            let _ = with_session(&sessions, id, |s| {
                                s.record_upload_progress(batch_id, pct);
                                Ok(())
                            })
                            .await;
                        }
                    }
                };

                let applied = with_session(&sessions, id, |s| {
                    s.complete_upload(batch_id, result.is_ok());
                    if let Err(e) = &result {
                        s.set_error(format!("Error uploading files: {}", e));
                    }
                    Ok(())
                })
                .await;
                if let Err(e) = result.and(applied) {
                    report(&e, id, "upload");
                }
            },
        );
        Ok(view)
    }

    pub async fn remove_file(&self, id: Uuid, file_id: &str) -> Result<SessionView> {
        with_session(&self.sessions, id, |s| {
            if !s.remove_file(file_id)? {
                return Err(GfsError::NotFound {
                    resource: format!("file {}", file_id),
                });
            }
            Ok(s.view())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn proceed_to_index(&self, id: Uuid) -> Result<SessionView> {
        let (corpus, view) = with_session(&self.sessions, id, |s| {
            s.proceed_to_index()?;
            let corpus = s.corpus().cloned().ok_or(crate::wizard::Rejection::NoStore)?;
            Ok((corpus, s.view()))
        })
        .await?;

        let sessions = self.sessions.clone();
        let backend = self.backend.clone();
        self.scheduler.schedule(TaskKey::new(id, Operation::Indexing), async move {
            let result = backend.await_indexing(&corpus).await;
            let applied = with_session(&sessions, id, |s| {
                match &result {
                    Ok(()) => {
                        s.finish_indexing();
                    }
                    Err(e) => s.abort_indexing(format!("Error indexing files: {}", e)),
                }
                Ok(())
            })
            .await;
            if let Err(e) = result.and(applied) {
                report(&e, id, "indexing");
            }
        });
        Ok(view)
    }

    /// 提问：同步追加用户消息，查询完成后追加模型消息。
    /// 查询失败不会作为错误返回，而是体现在回复和错误横幅中。
    #[instrument(skip(self, question))]
    pub async fn ask(&self, id: Uuid, question: &str) -> Result<QueryOutcome> {
        let ticket = with_session(&self.sessions, id, |s| Ok(s.begin_query(question)?)).await?;

        // 查询在独立任务中完成，调用方中途放弃也会写回结果；期间不持有锁
        let sessions = self.sessions.clone();
        let engine = self.engine.clone();
        let task = tokio::spawn(
            async move {
                let result = engine.query(&ticket.files, &ticket.question).await;
                if let Err(e) = &result {
                    report(e, id, "query");
                }
                with_session(&sessions, id, |s| {
                    let message = s.complete_query(result).clone();
                    Ok(QueryOutcome {
                        message,
                        session: s.view(),
                    })
                })
                .await
            }
            .in_current_span(),
        );
        task.await?
    }

    pub async fn add_metadata(&self, id: Uuid) -> Result<CustomMetadata> {
        with_session(&self.sessions, id, |s| Ok(s.add_metadata()?.clone())).await
    }

    pub async fn update_metadata(
        &self,
        id: Uuid,
        meta_id: &str,
        field: MetadataField,
        text: &str,
    ) -> Result<SessionView> {
        with_session(&self.sessions, id, |s| {
            s.update_metadata(meta_id, field, text)?;
            Ok(s.view())
        })
        .await
    }

    pub async fn remove_metadata(&self, id: Uuid, meta_id: &str) -> Result<SessionView> {
        with_session(&self.sessions, id, |s| {
            s.remove_metadata(meta_id)?;
            Ok(s.view())
        })
        .await
    }

    pub async fn set_chunking(&self, id: Uuid, config: ChunkingConfig) -> Result<SessionView> {
        with_session(&self.sessions, id, |s| {
            s.set_chunking(config)?;
            Ok(s.view())
        })
        .await
    }
}
