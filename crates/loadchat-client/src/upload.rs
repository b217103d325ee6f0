//! Attachment upload side-channel.
//!
//! The socket carries only small JSON control frames, so file bytes go to
//! the REST API as multipart. The channel announces the stored resource over
//! the socket afterwards.

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use loadchat_core::RecordId;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// A file to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    file_name: String,
    mime_type: Option<String>,
    bytes: Vec<u8>,
}

impl Attachment {
    /// An attachment with no declared MIME type.
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: None,
            bytes: bytes.into(),
        }
    }

    /// Declare the MIME type sent with the file part.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Read a file from disk, naming the attachment after it.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Ok(Self::new(file_name, bytes))
    }

    /// File name sent with the file part.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Declared MIME type, if any.
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the file has no content.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// HTTP client for the attachment endpoint.
#[derive(Debug, Clone)]
pub(crate) struct Uploader {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
}

impl Uploader {
    pub(crate) fn new(config: &ChannelConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.upload_url(),
            token: config.auth_token.clone(),
            timeout: Duration::from_millis(config.upload_timeout_ms),
        }
    }

    /// POST the attachment and return the response body.
    pub(crate) async fn upload(
        &self,
        attachment: Attachment,
        message: &str,
        conversation_id: &RecordId,
        user_id: &RecordId,
    ) -> Result<Value, ChannelError> {
        let size = attachment.len();
        let mut part = Part::bytes(attachment.bytes).file_name(attachment.file_name);
        if let Some(mime_type) = attachment.mime_type.as_deref() {
            part = part
                .mime_str(mime_type)
                .map_err(|e| ChannelError::UploadFailed(format!("bad mime type: {e}")))?;
        }

        let form = Form::new()
            .part("file", part)
            .text("message", message.to_string())
            .text("load_id", conversation_id.to_string())
            .text("user", user_id.to_string());

        let mut request = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .multipart(form);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(endpoint = %self.endpoint, size, "uploading attachment");
        let response = request
            .send()
            .await
            .map_err(|e| ChannelError::UploadFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::UploadFailed(format!(
                "server returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ChannelError::UploadFailed(format!("unreadable response: {e}")))
    }
}

/// The stored resource id in an upload response, if it has a usable one.
pub(crate) fn resource_id(body: &Value) -> Option<RecordId> {
    match body.get("id")? {
        Value::Number(n) => n.as_i64().map(RecordId::Int),
        Value::String(s) if !s.is_empty() => Some(RecordId::from(s.as_str())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resource_id_accepts_numbers_and_text() {
        assert_eq!(resource_id(&json!({ "id": 42 })), Some(RecordId::Int(42)));
        assert_eq!(
            resource_id(&json!({ "id": "att_9" })),
            Some(RecordId::Text("att_9".into()))
        );
    }

    #[test]
    fn resource_id_rejects_missing_or_unusable() {
        assert_eq!(resource_id(&json!({ "detail": "stored" })), None);
        assert_eq!(resource_id(&json!({ "id": null })), None);
        assert_eq!(resource_id(&json!({ "id": "" })), None);
        assert_eq!(resource_id(&json!([42])), None);
    }

    #[tokio::test]
    async fn attachment_from_path_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bol-1042.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let attachment = Attachment::from_path(&path).await.unwrap();
        assert_eq!(attachment.file_name(), "bol-1042.pdf");
        assert_eq!(attachment.len(), 8);
        assert_eq!(attachment.mime_type(), None);
    }
}
