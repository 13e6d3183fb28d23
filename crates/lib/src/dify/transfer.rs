//! File transfer: upload a local file to Dify, download a remote artifact to disk.

use crate::dify::client::{DifyClient, DifyError, Payload, Stage, FILE_UPLOAD_PATH};
use futures_util::StreamExt;
use reqwest::Method;
use serde_json::{Map, Value};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Decoded upload response (`id`, `name`, `size`, `extension`, `mime_type`, ...).
pub type UploadResponse = Map<String, Value>;

/// The handle to reference an uploaded file in a later chat call, if Dify returned one.
pub fn upload_handle(response: &UploadResponse) -> Option<&str> {
    response
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
}

impl DifyClient {
    /// POST /v1/files/upload with multipart fields `file` (streamed) and `user`.
    pub async fn upload_file(&self, path: &Path, user: &str) -> Result<UploadResponse, DifyError> {
        let stage = Stage::Upload;
        self.ensure_configured(stage)?;
        log::info!("dify upload: {} for user {}", path.display(), user);
        let response: UploadResponse = self
            .call_json(
                stage,
                Method::POST,
                FILE_UPLOAD_PATH,
                Payload::Upload { path, user },
            )
            .await?;
        log::info!("dify upload: done, id={:?}", upload_handle(&response));
        Ok(response)
    }

    /// Plain GET of `url`, streamed into `dest` (created or truncated). Returns bytes written.
    ///
    /// The caller owns `dest` and removes it on failure.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, DifyError> {
        let stage = Stage::Download;
        log::info!("dify download: {} -> {}", url, dest.display());
        let res = self
            .http()
            .get(url)
            .send()
            .await
            .map_err(|source| DifyError::Transport {
                stage,
                attempts: 1,
                source,
            })?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(DifyError::Status {
                stage,
                status: status.as_u16(),
                body,
            });
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| DifyError::Io {
                stage,
                context: format!("creating {}", dest.display()),
                source,
            })?;
        let write_err = |source: std::io::Error| DifyError::Io {
            stage,
            context: format!("writing {}", dest.display()),
            source,
        };
        let mut written: u64 = 0;
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| DifyError::Body { stage, source })?;
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_err)?;
        log::info!("dify download: {} bytes written to {}", written, dest.display());
        Ok(written)
    }
}
