use gfs_llm::ChatProviderConfig;
use gfs_session::{UploadGuideline, WizardTimings};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "configs/default.yaml";

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub server: ServerCfg,
    #[serde(default)]
    pub gemini: GeminiCfg,
    #[serde(default)]
    pub timings: TimingsCfg,
    #[serde(default)]
    pub upload: UploadCfg,
    #[serde(default)]
    pub session: SessionCfg,
}

#[derive(Debug, Deserialize)]
pub struct ServerCfg {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Default)]
pub struct GeminiCfg {
    pub model: Option<String>,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimingsCfg {
    #[serde(default = "default_store_create_delay_ms")]
    pub store_create_delay_ms: u64,
    #[serde(default = "default_upload_duration_ms")]
    pub upload_duration_ms: u64,
    #[serde(default = "default_upload_tick_ms")]
    pub upload_tick_ms: u64,
    #[serde(default = "default_index_delay_ms")]
    pub index_delay_ms: u64,
}

fn default_store_create_delay_ms() -> u64 {
    500
}
fn default_upload_duration_ms() -> u64 {
    1500
}
fn default_upload_tick_ms() -> u64 {
    50
}
fn default_index_delay_ms() -> u64 {
    1500
}

impl Default for TimingsCfg {
    fn default() -> Self {
        Self {
            store_create_delay_ms: default_store_create_delay_ms(),
            upload_duration_ms: default_upload_duration_ms(),
            upload_tick_ms: default_upload_tick_ms(),
            index_delay_ms: default_index_delay_ms(),
        }
    }
}

impl TimingsCfg {
    pub fn wizard_timings(&self) -> WizardTimings {
        WizardTimings {
            store_create_delay: Duration::from_millis(self.store_create_delay_ms),
            upload_duration: Duration::from_millis(self.upload_duration_ms),
            // tokio 的 interval 不接受 0
            upload_tick: Duration::from_millis(self.upload_tick_ms.max(1)),
            index_delay: Duration::from_millis(self.index_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadCfg {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

fn default_max_file_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_max_request_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for UploadCfg {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_request_bytes: default_max_request_bytes(),
        }
    }
}

impl UploadCfg {
    pub fn guideline(&self) -> UploadGuideline {
        UploadGuideline {
            max_file_bytes: self.max_file_bytes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionCfg {
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_idle_ttl_secs() -> u64 {
    30 * 60
}
fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SessionCfg {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl AppConfig {
    pub fn api_key_env(&self) -> String {
        self.gemini
            .api_key_env
            .clone()
            .unwrap_or_else(|| "GEMINI_API_KEY".to_string())
    }

    /// key 不在这里读取，由 provider 在使用时从 api_key_env 解析
    pub fn chat_provider(&self) -> ChatProviderConfig {
        ChatProviderConfig::Gemini {
            base_url: self.gemini.base_url.clone(),
            api_key: None,
            api_key_env: Some(self.api_key_env()),
            model: self.gemini.model.clone(),
        }
    }
}

pub fn load_config() -> anyhow::Result<AppConfig> {
    let path = std::env::var("GFS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let s = std::fs::read_to_string(&path)?;
    let cfg = parse_config(&s)?;
    info!(%path, "load_config: {:?}", cfg);
    Ok(cfg)
}

pub fn parse_config(s: &str) -> anyhow::Result<AppConfig> {
    Ok(serde_yaml::from_str(s)?)
}
