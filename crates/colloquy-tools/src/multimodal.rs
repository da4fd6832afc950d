//! Media payload plumbing for image/audio/file tools: base64 round-trips,
//! data-URL parsing, URL download, and temporary artifact staging.

use std::io::Write;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, ToolError};

/// Where a media payload comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Raw base64 content (already stripped of any data-URL header).
    Base64(String),
    /// Remote content to download.
    Url(String),
}

/// A media reference extracted from tool arguments.
#[derive(Debug, Clone)]
pub struct MediaRef {
    pub source: MediaSource,
    pub media_type: String,
}

/// A staged temporary artifact. The underlying file is removed when this
/// guard drops, which covers every exit path of the invoker.
pub struct TempArtifact {
    file: tempfile::NamedTempFile,
    pub media_type: String,
}

impl TempArtifact {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Encode bytes to base64 text.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode base64 text back to bytes.
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text.trim())
        .map_err(|e| ToolError::InvalidArgument(format!("invalid base64 payload: {e}")))
}

/// Pull a media reference out of tool arguments. Recognized shapes:
/// a `data:` URL string, an http(s) URL string, or an object carrying
/// `url` / `data` (+ optional `media_type`).
pub fn extract_media(args: &Value) -> Option<MediaRef> {
    match args {
        Value::String(s) => classify_str(s),
        Value::Object(map) => {
            let media_type = map
                .get("media_type")
                .and_then(|v| v.as_str())
                .unwrap_or("application/octet-stream")
                .to_string();
            if let Some(url) = map.get("url").and_then(|v| v.as_str()) {
                return classify_str(url).or(Some(MediaRef {
                    source: MediaSource::Url(url.to_string()),
                    media_type,
                }));
            }
            if let Some(data) = map.get("data").and_then(|v| v.as_str()) {
                return Some(MediaRef {
                    source: MediaSource::Base64(data.to_string()),
                    media_type,
                });
            }
            None
        }
        _ => None,
    }
}

fn classify_str(s: &str) -> Option<MediaRef> {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix("data:") {
        // data:<media_type>;base64,<payload>
        let (header, payload) = rest.split_once(",")?;
        let media_type = header
            .strip_suffix(";base64")
            .unwrap_or(header)
            .to_string();
        return Some(MediaRef {
            source: MediaSource::Base64(payload.to_string()),
            media_type: if media_type.is_empty() {
                "application/octet-stream".to_string()
            } else {
                media_type
            },
        });
    }
    if s.starts_with("http://") || s.starts_with("https://") {
        return Some(MediaRef {
            source: MediaSource::Url(s.to_string()),
            media_type: "application/octet-stream".to_string(),
        });
    }
    None
}

/// Download or decode a media reference into a temporary file.
pub async fn stage_media(media: &MediaRef) -> Result<TempArtifact> {
    let bytes = match &media.source {
        MediaSource::Base64(b64) => decode_base64(b64)?,
        MediaSource::Url(url) => {
            let response = reqwest::get(url)
                .await
                .map_err(|e| ToolError::Execution(format!("media download failed: {e}")))?;
            if !response.status().is_success() {
                return Err(ToolError::Execution(format!(
                    "media download failed: HTTP {}",
                    response.status()
                )));
            }
            response
                .bytes()
                .await
                .map_err(|e| ToolError::Execution(format!("media download failed: {e}")))?
                .to_vec()
        }
    };
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(&bytes)?;
    file.flush()?;
    debug!(bytes = bytes.len(), media_type = %media.media_type, "media staged to temp artifact");
    Ok(TempArtifact {
        file,
        media_type: media.media_type.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_roundtrip_preserves_bytes() {
        let original: Vec<u8> = (0u8..=255).collect();
        let encoded = encode_base64(&original);
        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn data_url_is_classified_as_base64() {
        let args = Value::String("data:image/png;base64,aGVsbG8=".to_string());
        let media = extract_media(&args).unwrap();
        assert_eq!(media.media_type, "image/png");
        assert_eq!(media.source, MediaSource::Base64("aGVsbG8=".to_string()));
    }

    #[test]
    fn http_url_is_classified_as_url() {
        let args = Value::String("https://example.com/cat.jpg".to_string());
        let media = extract_media(&args).unwrap();
        assert!(matches!(media.source, MediaSource::Url(_)));
    }

    #[test]
    fn object_args_carry_explicit_media_type() {
        let args = serde_json::json!({"data": "aGVsbG8=", "media_type": "audio/wav"});
        let media = extract_media(&args).unwrap();
        assert_eq!(media.media_type, "audio/wav");
    }

    #[test]
    fn plain_text_is_not_media() {
        assert!(extract_media(&Value::String("what is 1+2".into())).is_none());
        assert!(extract_media(&serde_json::json!(42)).is_none());
    }

    #[tokio::test]
    async fn staged_artifact_is_cleaned_up_on_drop() {
        let media = MediaRef {
            source: MediaSource::Base64(encode_base64(b"artifact bytes")),
            media_type: "application/octet-stream".to_string(),
        };
        let path = {
            let artifact = stage_media(&media).await.unwrap();
            let p = artifact.path().to_path_buf();
            assert_eq!(std::fs::read(&p).unwrap(), b"artifact bytes");
            p
        };
        assert!(!path.exists());
    }
}
