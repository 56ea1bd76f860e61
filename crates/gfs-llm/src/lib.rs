use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

pub use gfs_error::{GfsError, Result, HTTP_TIMEOUT_MS};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// 多模态提示中的一个片段
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
}

impl Part {
    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Part::Inline {
            inline_data: InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            },
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }
}

/// base64 数据及其 MIME 类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// 解析凭据并构建底层客户端，不发起网络请求
    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn generate(&self, parts: Vec<Part>) -> Result<String>;
}

// ========== Gemini (generateContent REST) ==========

#[derive(Clone)]
pub struct GeminiConfig {
    pub base_url: String, // 默认 https://generativelanguage.googleapis.com
    pub api_key: String,
    pub model: String, // 如 gemini-2.5-flash
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    cfg: GeminiConfig,
}

impl GeminiClient {
    pub fn new(cfg: GeminiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(HTTP_TIMEOUT_MS))
            .build()?;
        Ok(Self { http, cfg })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.model
        )
    }
}

#[derive(Serialize)]
struct GenerateReqContent {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct GenerateReq {
    contents: Vec<GenerateReqContent>,
}

#[derive(Deserialize)]
struct GenerateRespPart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GenerateRespContent {
    #[serde(default)]
    parts: Vec<GenerateRespPart>,
}

#[derive(Deserialize)]
struct GenerateRespCandidate {
    content: Option<GenerateRespContent>,
}

#[derive(Deserialize)]
struct GenerateResp {
    #[serde(default)]
    candidates: Vec<GenerateRespCandidate>,
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    #[instrument(skip(self, parts), fields(model = %self.cfg.model, parts = parts.len()))]
    async fn generate(&self, parts: Vec<Part>) -> Result<String> {
        let body = GenerateReq {
            contents: vec![GenerateReqContent {
                role: "user",
                parts,
            }],
        };

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.cfg.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(GfsError::LlmService {
                provider: "gemini".to_string(),
                message: format!("status={} body={}", status, txt),
                retry_after: None,
            });
        }

        let data: GenerateResp = resp.json().await.map_err(|e| GfsError::LlmService {
            provider: "gemini".to_string(),
            message: format!("malformed response: {}", e),
            retry_after: None,
        })?;

        // 取第一个候选的全部文本片段
        let text = data
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GfsError::LlmService {
                provider: "gemini".to_string(),
                message: "response contained no text".to_string(),
                retry_after: None,
            })?;
        debug!(chars = text.len(), "gemini answered");
        Ok(text)
    }
}

/// Gemini 配置。api_key 为空时在首次使用时读取 api_key_env 指定的环境变量
#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub model: String,
    pub base_url: String,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        }
    }
}

/// 首次使用时构建客户端；拿不到 key 时返回配置错误，之后再次尝试
pub struct GeminiProvider {
    settings: GeminiSettings,
    client: OnceCell<GeminiClient>,
}

impl GeminiProvider {
    pub fn new(settings: GeminiSettings) -> Self {
        Self {
            settings,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&GeminiClient> {
        self.client
            .get_or_try_init(|| async {
                let api_key = self
                    .settings
                    .api_key
                    .clone()
                    .or_else(|| std::env::var(&self.settings.api_key_env).ok())
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| GfsError::Configuration {
                        key: "api_key".to_string(),
                        reason: format!(
                            "{} environment variable is not set",
                            self.settings.api_key_env
                        ),
                    })?;
                GeminiClient::new(GeminiConfig {
                    base_url: self.settings.base_url.clone(),
                    api_key,
                    model: self.settings.model.clone(),
                })
            })
            .await
    }
}

#[async_trait]
impl GenerativeModel for GeminiProvider {
    async fn ensure_ready(&self) -> Result<()> {
        self.client().await.map(|_| ())
    }

    async fn generate(&self, parts: Vec<Part>) -> Result<String> {
        self.client().await?.generate(parts).await
    }
}

// ========== Provider 工厂与配置 ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ChatProviderConfig {
    #[serde(rename = "gemini")]
    Gemini {
        base_url: Option<String>,
        api_key: Option<String>,
        api_key_env: Option<String>,
        model: Option<String>,
    },
}

impl From<ChatProviderConfig> for GeminiSettings {
    fn from(cfg: ChatProviderConfig) -> Self {
        match cfg {
            ChatProviderConfig::Gemini {
                base_url,
                api_key,
                api_key_env,
                model,
            } => {
                let defaults = GeminiSettings::default();
                GeminiSettings {
                    api_key,
                    api_key_env: api_key_env.unwrap_or(defaults.api_key_env),
                    model: model.unwrap_or(defaults.model),
                    base_url: base_url.unwrap_or(defaults.base_url),
                }
            }
        }
    }
}

pub fn make_provider(cfg: ChatProviderConfig) -> Box<dyn GenerativeModel> {
    Box::new(GeminiProvider::new(cfg.into()))
}
