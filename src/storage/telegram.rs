//! Chat-transport backend over the Telegram Bot API.
//!
//! Bytes are uploaded as attachments to a fixed administrative chat. The
//! locator is the attachment `file_id`; the carrying `message_id` is kept so
//! the attachment can be deleted later. Retrieval is two-step: `getFile`
//! resolves a short-lived download path, which is then streamed. Rate-limit
//! responses are retried with the server-specified delay, up to a fixed
//! ceiling. No native byte ranges — callers fetch whole blobs.

use crate::range::ByteRange;
use crate::storage::{BackendError, BlobBackend, FetchedBlob, Locator};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::io;
use std::time::Duration;
use tracing::{debug, warn};

const API_BASE: &str = "https://api.telegram.org";
const MAX_API_ATTEMPTS: u32 = 3;
const RETRY_CAP: Duration = Duration::from_secs(5);

pub struct TelegramBackend {
    client: reqwest::Client,
    token: String,
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    document: Option<Attachment>,
    video: Option<Attachment>,
    audio: Option<Attachment>,
    photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    file_path: Option<String>,
}

impl SentMessage {
    /// The attachment id Telegram assigned, whichever field it landed in.
    /// Photo uploads come back as a size ladder; the last entry is largest.
    fn attachment_id(&self) -> Option<&str> {
        if let Some(doc) = &self.document {
            return Some(&doc.file_id);
        }
        if let Some(video) = &self.video {
            return Some(&video.file_id);
        }
        if let Some(audio) = &self.audio {
            return Some(&audio.file_id);
        }
        self.photo
            .as_ref()
            .and_then(|sizes| sizes.last())
            .map(|p| p.file_id.as_str())
    }
}

impl TelegramBackend {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{API_BASE}/bot{}/{method}", self.token)
    }

    fn download_url(&self, file_path: &str) -> String {
        format!("{API_BASE}/file/bot{}/{file_path}", self.token)
    }

    /// JSON-bodied API call with rate-limit retries.
    async fn call_json<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<T, BackendError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = async {
                let resp = self
                    .client
                    .post(self.method_url(method))
                    .json(payload)
                    .send()
                    .await
                    .map_err(|err| BackendError::transient(err.to_string()))?;
                let envelope: ApiEnvelope<T> = resp
                    .json()
                    .await
                    .map_err(|err| BackendError::transient(err.to_string()))?;
                unwrap_envelope(envelope)
            }
            .await;

            match result {
                Ok(value) => return Ok(value),
                Err(err) => self.maybe_retry(method, attempt, err).await?,
            }
        }
    }

    /// Multipart attachment upload with rate-limit retries. The form has to
    /// be rebuilt per attempt; `Bytes` clones are cheap.
    async fn send_attachment(
        &self,
        method: &str,
        field: &'static str,
        key: &str,
        bytes: &Bytes,
        content_type: &str,
    ) -> Result<SentMessage, BackendError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let part = Part::bytes(bytes.to_vec())
                .file_name(key.to_string())
                .mime_str(content_type)
                .map_err(|err| BackendError::permanent(err.to_string()))?;
            let form = Form::new()
                .text("chat_id", self.chat_id.clone())
                .part(field, part);

            let result = async {
                let resp = self
                    .client
                    .post(self.method_url(method))
                    .multipart(form)
                    .send()
                    .await
                    .map_err(|err| BackendError::transient(err.to_string()))?;
                let envelope: ApiEnvelope<SentMessage> = resp
                    .json()
                    .await
                    .map_err(|err| BackendError::transient(err.to_string()))?;
                unwrap_envelope(envelope)
            }
            .await;

            match result {
                Ok(message) => return Ok(message),
                Err(err) => self.maybe_retry(method, attempt, err).await?,
            }
        }
    }

    /// Sleep and signal another attempt for transient failures under the
    /// ceiling; propagate everything else.
    async fn maybe_retry(
        &self,
        method: &str,
        attempt: u32,
        err: BackendError,
    ) -> Result<(), BackendError> {
        match &err {
            BackendError::Transient { retry_after, .. } if attempt < MAX_API_ATTEMPTS => {
                let delay = retry_after
                    .unwrap_or_else(|| Duration::from_secs(1 << (attempt - 1)))
                    .min(RETRY_CAP);
                warn!(method, attempt, ?delay, "telegram call failed, retrying");
                tokio::time::sleep(delay).await;
                Ok(())
            }
            _ => Err(err),
        }
    }
}

fn unwrap_envelope<T>(envelope: ApiEnvelope<T>) -> Result<T, BackendError> {
    if envelope.ok {
        return envelope
            .result
            .ok_or_else(|| BackendError::permanent("telegram response missing result"));
    }
    let description = envelope
        .description
        .unwrap_or_else(|| "telegram api error".to_string());
    match envelope.error_code {
        Some(429) => Err(BackendError::Transient {
            message: description,
            retry_after: envelope
                .parameters
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs),
        }),
        Some(code) if code >= 500 => Err(BackendError::transient(description)),
        _ => Err(BackendError::permanent(description)),
    }
}

/// Pick the type-specific upload method. Animated GIFs go through the
/// generic document path — `sendPhoto` strips the animation.
fn upload_method(content_type: &str) -> (&'static str, &'static str) {
    if content_type.starts_with("image/") && content_type != "image/gif" {
        ("sendPhoto", "photo")
    } else {
        ("sendDocument", "document")
    }
}

#[async_trait]
impl BlobBackend for TelegramBackend {
    fn supports_range(&self) -> bool {
        false
    }

    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<Locator, BackendError> {
        let (method, field) = upload_method(content_type);
        let sent = match self
            .send_attachment(method, field, key, &bytes, content_type)
            .await
        {
            Ok(sent) => sent,
            // Telegram rejects some payloads on the type-specific method
            // (e.g. oversized or odd-dimensioned photos); the generic
            // document method accepts anything once.
            Err(BackendError::Permanent { message }) if method != "sendDocument" => {
                debug!(%message, "type-specific upload rejected, retrying as document");
                self.send_attachment("sendDocument", "document", key, &bytes, content_type)
                    .await?
            }
            Err(err) => return Err(err),
        };

        let file_id = sent
            .attachment_id()
            .ok_or_else(|| BackendError::permanent("telegram message carries no attachment"))?;
        Ok(Locator {
            key: file_id.to_string(),
            message_id: sent.message_id,
        })
    }

    async fn fetch(
        &self,
        locator: &Locator,
        _range: Option<ByteRange>,
    ) -> Result<FetchedBlob, BackendError> {
        let remote: RemoteFile = self
            .call_json("getFile", &json!({ "file_id": locator.key }))
            .await?;
        let file_path = remote
            .file_path
            .ok_or_else(|| BackendError::permanent("getFile returned no download path"))?;

        let resp = self
            .client
            .get(self.download_url(&file_path))
            .send()
            .await
            .map_err(|err| BackendError::transient(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(BackendError::transient(format!(
                "attachment download failed with status {}",
                resp.status()
            )));
        }

        let total_len = resp.content_length().unwrap_or(0);
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let stream = resp
            .bytes_stream()
            .map_err(io::Error::other);
        Ok(FetchedBlob {
            stream: Box::pin(stream),
            total_len,
            content_type,
        })
    }

    async fn delete(&self, locator: &Locator) -> Result<bool, BackendError> {
        if locator.message_id <= 0 {
            return Ok(false);
        }
        let payload = json!({
            "chat_id": self.chat_id,
            "message_id": locator.message_id,
        });
        match self.call_json::<bool>("deleteMessage", &payload).await {
            Ok(deleted) => Ok(deleted),
            // Already gone (or too old to delete) — the attachment is
            // unreachable either way.
            Err(BackendError::Permanent { message }) => {
                debug!(%message, "deleteMessage rejected");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_photo_method_for_still_images() {
        assert_eq!(upload_method("image/png"), ("sendPhoto", "photo"));
        assert_eq!(upload_method("image/gif"), ("sendDocument", "document"));
        assert_eq!(upload_method("video/mp4"), ("sendDocument", "document"));
    }

    #[test]
    fn rate_limit_envelope_becomes_transient_with_delay() {
        let envelope: ApiEnvelope<SentMessage> = serde_json::from_str(
            r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 7",
                "parameters":{"retry_after":7}}"#,
        )
        .unwrap();
        let err = unwrap_envelope(envelope).unwrap_err();
        match err {
            BackendError::Transient { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected transient, got {other:?}"),
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        let envelope: ApiEnvelope<SentMessage> = serde_json::from_str(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
        )
        .unwrap();
        assert!(matches!(
            unwrap_envelope(envelope).unwrap_err(),
            BackendError::Permanent { .. }
        ));
    }

    #[test]
    fn attachment_id_prefers_document_then_largest_photo() {
        let sent: SentMessage = serde_json::from_str(
            r#"{"message_id":5,"photo":[{"file_id":"small"},{"file_id":"large"}]}"#,
        )
        .unwrap();
        assert_eq!(sent.attachment_id(), Some("large"));

        let sent: SentMessage = serde_json::from_str(
            r#"{"message_id":6,"document":{"file_id":"doc"},"photo":[{"file_id":"p"}]}"#,
        )
        .unwrap();
        assert_eq!(sent.attachment_id(), Some("doc"));
    }
}
