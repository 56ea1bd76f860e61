use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::try_join_all;
use gfs_core::FileBlob;
use gfs_error::Result;
use gfs_llm::Part;
use std::sync::Arc;

/// 浏览器未声明类型时使用
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// 在阻塞线程池中将单个文件编码为 inline-data 片段
pub async fn file_to_part(file: Arc<FileBlob>) -> Result<Part> {
    let part = tokio::task::spawn_blocking(move || {
        let mime_type = if file.mime_type.trim().is_empty() {
            FALLBACK_MIME_TYPE.to_string()
        } else {
            file.mime_type.clone()
        };
        Part::inline(mime_type, STANDARD.encode(&file.data))
    })
    .await?;
    Ok(part)
}

/// 并发编码所有文件，输出保持输入顺序
pub async fn files_to_parts(files: &[Arc<FileBlob>]) -> Result<Vec<Part>> {
    try_join_all(files.iter().cloned().map(file_to_part)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_parts_keep_input_order() {
        let files = vec![
            Arc::new(FileBlob::new("A.txt", "text/plain", b"alpha".to_vec())),
            Arc::new(FileBlob::new("B.pdf", "application/pdf", vec![0u8; 4096])),
            Arc::new(FileBlob::new("C.md", "text/markdown", b"gamma".to_vec())),
        ];
        let parts = files_to_parts(&files).await.unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], Part::inline("text/plain", "YWxwaGE="));
        assert!(matches!(
            &parts[1],
            Part::Inline { inline_data } if inline_data.mime_type == "application/pdf"
        ));
        assert_eq!(parts[2], Part::inline("text/markdown", "Z2FtbWE="));
    }

    #[tokio::test]
    async fn test_missing_mime_type_falls_back() {
        let file = Arc::new(FileBlob::new("notes", "", b"hi".to_vec()));
        let part = file_to_part(file).await.unwrap();
        assert_eq!(part, Part::inline(FALLBACK_MIME_TYPE, "aGk="));
    }
}
