use async_trait::async_trait;
use gfs_core::{Corpus, FileBlob};
use gfs_error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Instant};
use tracing::{debug, instrument};

/// 向导中模拟操作的固定时长
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WizardTimings {
    pub store_create_delay: Duration,
    pub upload_duration: Duration,
    pub upload_tick: Duration,
    pub index_delay: Duration,
}

impl Default for WizardTimings {
    fn default() -> Self {
        Self {
            store_create_delay: Duration::from_millis(500),
            upload_duration: Duration::from_millis(1500),
            upload_tick: Duration::from_millis(50),
            index_delay: Duration::from_millis(1500),
        }
    }
}

/// 存储后端抽象。真实后端可以轮询实际状态，状态机无需改动。
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// 确认存储已就绪
    async fn provision_store(&self, corpus: &Corpus) -> Result<()>;

    /// 上传一批文件，通过 progress 报告 0-100 的进度
    async fn upload(
        &self,
        corpus: &Corpus,
        files: &[Arc<FileBlob>],
        progress: watch::Sender<f32>,
    ) -> Result<()>;

    /// 等待索引完成
    async fn await_indexing(&self, corpus: &Corpus) -> Result<()>;
}

/// 只做定时等待的模拟后端，从不失败
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackend {
    timings: WizardTimings,
}

impl SimulatedBackend {
    pub fn new(timings: WizardTimings) -> Self {
        Self { timings }
    }

    pub fn timings(&self) -> WizardTimings {
        self.timings
    }
}

#[async_trait]
impl StoreBackend for SimulatedBackend {
    #[instrument(skip(self), fields(store = %corpus.resource_name))]
    async fn provision_store(&self, corpus: &Corpus) -> Result<()> {
        sleep(self.timings.store_create_delay).await;
        Ok(())
    }

    #[instrument(skip(self, files, progress), fields(store = %corpus.resource_name, files = files.len()))]
    async fn upload(
        &self,
        corpus: &Corpus,
        files: &[Arc<FileBlob>],
        progress: watch::Sender<f32>,
    ) -> Result<()> {
        let duration = self.timings.upload_duration.as_secs_f32();
        let start = Instant::now();
        let mut ticker = interval(self.timings.upload_tick);
        loop {
            ticker.tick().await;
            let pct = if duration <= 0.0 {
                100.0
            } else {
                (start.elapsed().as_secs_f32() / duration * 100.0).min(100.0)
            };
            progress.send_replace(pct);
            if pct >= 100.0 {
                break;
            }
        }
        debug!("simulated upload finished");
        Ok(())
    }

    #[instrument(skip(self), fields(store = %corpus.resource_name))]
    async fn await_indexing(&self, corpus: &Corpus) -> Result<()> {
        sleep(self.timings.index_delay).await;
        Ok(())
    }
}
