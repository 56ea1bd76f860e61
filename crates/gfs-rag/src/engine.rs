use crate::encode::files_to_parts;
use async_trait::async_trait;
use gfs_core::{FileBlob, QueryAnswer, Source};
use gfs_error::Result;
use gfs_llm::{GenerativeModel, Part};
use std::sync::Arc;
use tracing::{debug, instrument};

/// 文件问答引擎的统一抽象接口
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// 基于给定文件回答问题
    async fn query(&self, files: &[Arc<FileBlob>], question: &str) -> Result<QueryAnswer>;
}

/// 将文件原始字节内联进单次模型请求的引擎
pub struct InlineQueryEngine {
    model: Arc<dyn GenerativeModel>,
}

impl InlineQueryEngine {
    pub fn new(model: Arc<dyn GenerativeModel>) -> Self {
        Self { model }
    }

    /// 组装请求：按输入顺序的文件片段，最后是问题文本
    pub fn assemble(file_parts: Vec<Part>, question: &str) -> Vec<Part> {
        let mut parts = file_parts;
        parts.push(Part::text(question));
        parts
    }

    /// 每个输入文件都视为来源，顺序与输入一致。
    /// 不读取响应中的 grounding 元数据。
    pub fn attribute_sources(files: &[Arc<FileBlob>]) -> Vec<Source> {
        files
            .iter()
            .map(|f| Source {
                file_name: f.name.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl QueryEngine for InlineQueryEngine {
    #[instrument(skip(self, files, question), fields(files = files.len()))]
    async fn query(&self, files: &[Arc<FileBlob>], question: &str) -> Result<QueryAnswer> {
        // 凭据缺失时在编码和网络请求之前失败
        self.model.ensure_ready().await?;

        let file_parts = files_to_parts(files).await?;
        debug!(parts = file_parts.len(), "files encoded");

        let text = self
            .model
            .generate(Self::assemble(file_parts, question))
            .await?;

        Ok(QueryAnswer {
            text,
            sources: Self::attribute_sources(files),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gfs_error::GfsError;
    use gfs_llm::{GeminiProvider, GeminiSettings};
    use serde_json::json;
    use tokio::sync::Mutex;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// 记录收到的请求片段
    #[derive(Default)]
    struct RecordingModel {
        seen: Mutex<Vec<Vec<Part>>>,
    }

    #[async_trait]
    impl GenerativeModel for RecordingModel {
        async fn generate(&self, parts: Vec<Part>) -> Result<String> {
            self.seen.lock().await.push(parts);
            Ok("recorded answer".to_string())
        }
    }

    fn sample_files() -> Vec<Arc<FileBlob>> {
        vec![
            Arc::new(FileBlob::new("A.txt", "text/plain", b"alpha".to_vec())),
            Arc::new(FileBlob::new("B.pdf", "application/pdf", b"%PDF-1.4".to_vec())),
        ]
    }

    #[tokio::test]
    async fn test_sources_follow_input_order() {
        let model = Arc::new(RecordingModel::default());
        let engine = InlineQueryEngine::new(model.clone());

        let answer = engine.query(&sample_files(), "What is inside?").await.unwrap();
        assert_eq!(answer.text, "recorded answer");
        let names: Vec<_> = answer.sources.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(names, vec!["A.txt", "B.pdf"]);
    }

    #[tokio::test]
    async fn test_request_places_question_after_files() {
        let model = Arc::new(RecordingModel::default());
        let engine = InlineQueryEngine::new(model.clone());

        engine.query(&sample_files(), "Summarize").await.unwrap();
        let seen = model.seen.lock().await;
        assert_eq!(seen.len(), 1);
        let parts = &seen[0];
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], Part::inline("text/plain", "YWxwaGE="));
        assert!(matches!(
            &parts[1],
            Part::Inline { inline_data } if inline_data.mime_type == "application/pdf"
        ));
        assert_eq!(parts[2], Part::text("Summarize"));
    }

    #[tokio::test]
    async fn test_unset_credential_fails_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(GeminiSettings {
            api_key: None,
            api_key_env: "GFS_RAG_TEST_KEY_NEVER_SET".to_string(),
            base_url: server.uri(),
            ..GeminiSettings::default()
        });
        let engine = InlineQueryEngine::new(Arc::new(provider));
        let err = engine.query(&sample_files(), "Anything?").await.unwrap_err();
        assert!(matches!(err, GfsError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_end_to_end_against_gemini_wire_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "inlineData": { "mimeType": "text/plain", "data": "YWxwaGE=" } },
                        { "inlineData": { "mimeType": "application/pdf", "data": "JVBERi0xLjQ=" } },
                        { "text": "Compare them" }
                    ]
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "They differ." }] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(GeminiSettings {
            api_key: Some("k".to_string()),
            base_url: server.uri(),
            ..GeminiSettings::default()
        });
        let engine = InlineQueryEngine::new(Arc::new(provider));
        let answer = engine.query(&sample_files(), "Compare them").await.unwrap();
        assert_eq!(answer.text, "They differ.");
        assert_eq!(answer.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(GeminiSettings {
            api_key: Some("k".to_string()),
            base_url: server.uri(),
            ..GeminiSettings::default()
        });
        let engine = InlineQueryEngine::new(Arc::new(provider));
        let err = engine.query(&sample_files(), "Hello").await.unwrap_err();
        assert!(matches!(err, GfsError::LlmService { .. }));
    }
}
