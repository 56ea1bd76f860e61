use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};

/// 系统统一错误类型
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum GfsError {
    // === 业务错误 ===
    #[error("resource not found: {resource}")]
    NotFound { resource: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("conflict: {details}")]
    Conflict { details: String },

    // === 技术错误 ===
    #[error("LLM service error ({provider}): {message}")]
    LlmService {
        provider: String,
        message: String,
        #[serde(skip)]
        retry_after: Option<std::time::Duration>,
    },

    #[error("network error during {operation}: {message}")]
    Network { operation: String, message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("concurrency error during {operation}: {message}")]
    Concurrency { operation: String, message: String },

    #[error("{format} serialization error: {message}")]
    Serialization { format: String, message: String },

    // === 系统错误 ===
    #[error("internal error: {message}")]
    Internal {
        message: String,
        details: Option<String>,
    },

    #[error("configuration error: {key} - {reason}")]
    Configuration { key: String, reason: String },
}

/// 错误严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,      // 可预期的业务错误
    Medium,   // 技术错误但不影响核心功能
    High,     // 影响核心功能的错误
    Critical, // 系统级严重错误
}

/// 错误元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub error_id: String,
    pub severity: ErrorSeverity,
    pub component: String,
    pub operation: Option<String>,
    pub session_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub context: std::collections::HashMap<String, String>,
}

impl GfsError {
    /// 获取错误的严重级别
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            GfsError::NotFound { .. } | GfsError::InvalidRequest { .. } => ErrorSeverity::Low,
            GfsError::Validation { .. } | GfsError::Conflict { .. } => ErrorSeverity::Medium,
            GfsError::LlmService { .. }
            | GfsError::Network { .. }
            | GfsError::Timeout { .. } => ErrorSeverity::Medium,
            GfsError::Serialization { .. } | GfsError::Concurrency { .. } => ErrorSeverity::High,
            GfsError::Internal { .. } | GfsError::Configuration { .. } => ErrorSeverity::Critical,
        }
    }

    /// 获取重试延迟时间（仅作提示，服务本身不做重试）
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            GfsError::LlmService { retry_after, .. } => *retry_after,
            GfsError::Network { .. } => Some(std::time::Duration::from_millis(500)),
            GfsError::Timeout { .. } => Some(std::time::Duration::from_millis(1000)),
            _ => None,
        }
    }

    /// 记录错误日志
    pub fn log(&self, metadata: &ErrorMetadata) {
        match metadata.severity {
            ErrorSeverity::Low => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    session_id = ?metadata.session_id,
                    error = %self,
                    "request rejected"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    session_id = ?metadata.session_id,
                    error = %self,
                    context = ?metadata.context,
                    "operation failed"
                );
            }
            ErrorSeverity::High | ErrorSeverity::Critical => {
                error!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    session_id = ?metadata.session_id,
                    error = %self,
                    context = ?metadata.context,
                    severity = ?metadata.severity,
                    "severe error"
                );
            }
        }
    }

    /// 转换为 HTTP 状态码
    pub fn to_http_status(&self) -> u16 {
        match self {
            GfsError::NotFound { .. } => 404,
            GfsError::InvalidRequest { .. } => 400,
            GfsError::Validation { .. } => 400,
            GfsError::Conflict { .. } => 409,
            GfsError::Timeout { .. } => 408,
            GfsError::LlmService { .. } | GfsError::Network { .. } => 502,
            _ => 500,
        }
    }

    /// 获取用户友好的错误消息
    pub fn user_message(&self) -> String {
        match self {
            GfsError::NotFound { .. } => "The requested resource does not exist.".to_string(),
            GfsError::InvalidRequest { .. } => {
                "The request is malformed, please check it and try again.".to_string()
            }
            GfsError::Validation { .. } => "Some input is missing or invalid.".to_string(),
            GfsError::Conflict { .. } => {
                "That action is not available right now.".to_string()
            }
            GfsError::Timeout { .. } => "The request timed out, please retry.".to_string(),
            GfsError::LlmService { .. } | GfsError::Network { .. } => {
                "The model service could not be reached.".to_string()
            }
            GfsError::Configuration { .. } => {
                "The service is not configured correctly.".to_string()
            }
            _ => "Internal error, please contact the administrator.".to_string(),
        }
    }
}

/// 创建错误元数据的便捷构造器
pub struct ErrorMetadataBuilder {
    metadata: ErrorMetadata,
}

impl ErrorMetadataBuilder {
    pub fn new(component: &str) -> Self {
        Self {
            metadata: ErrorMetadata {
                error_id: uuid::Uuid::new_v4().to_string(),
                severity: ErrorSeverity::Medium,
                component: component.to_string(),
                operation: None,
                session_id: None,
                timestamp: chrono::Utc::now(),
                context: std::collections::HashMap::new(),
            },
        }
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.metadata.operation = Some(operation.to_string());
        self
    }

    pub fn session_id(mut self, session_id: &str) -> Self {
        self.metadata.session_id = Some(session_id.to_string());
        self
    }

    pub fn context(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .context
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(mut self, error: &GfsError) -> ErrorMetadata {
        self.metadata.severity = error.severity();
        self.metadata
    }
}

pub type Result<T> = std::result::Result<T, GfsError>;

/// 出站 HTTP 请求的超时时间
pub const HTTP_TIMEOUT_MS: u64 = 120_000;

// === 转换实现 ===

impl From<serde_json::Error> for GfsError {
    fn from(err: serde_json::Error) -> Self {
        GfsError::Serialization {
            format: "json".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GfsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GfsError::Timeout {
                operation: "http_request".to_string(),
                timeout_ms: HTTP_TIMEOUT_MS,
            }
        } else if err.is_connect() {
            GfsError::Network {
                operation: "connect".to_string(),
                message: err.to_string(),
            }
        } else {
            GfsError::Network {
                operation: "http_request".to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<tokio::task::JoinError> for GfsError {
    fn from(err: tokio::task::JoinError) -> Self {
        GfsError::Concurrency {
            operation: "task_join".to_string(),
            message: err.to_string(),
        }
    }
}

// Axum 集成
#[cfg(feature = "axum")]
impl IntoResponse for GfsError {
    fn into_response(self) -> axum::response::Response {
        let status_code = StatusCode::from_u16(self.to_http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::json!({
            "error": self.to_string(),
            "message": self.user_message()
        });

        (status_code, Json(body)).into_response()
    }
}
