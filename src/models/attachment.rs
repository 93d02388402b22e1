//! Attachment values stored inside record sections.
//!
//! A field holds either inline content that travels with the record or a
//! reference to a file under the record's data directory in the remote store.
//! The serialized form is an explicit envelope tagged by `kind`, so a text
//! payload that happens to look like JSON is never mistaken for a reference.

use crate::errors::{RaftError, RaftResult};
use crate::models::record::Section;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_BINARY_MIME: &str = "application/octet-stream";
const DEFAULT_TEXT_MIME: &str = "text/plain";

/// How an inline payload is encoded.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    Text,
    Base64,
}

/// Content carried directly inside the record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InlineContent {
    pub encoding: ContentEncoding,

    /// Raw text, or base64 (bare or as a `data:` URL).
    pub payload: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Pointer to a file stored at `{data_directory}/{filename}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteReference {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// Value of an attachment field.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttachmentValue {
    Inline(InlineContent),
    RemoteReference(RemoteReference),
}

/// Resolved bytes of an attachment, whatever its storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentContent {
    pub bytes: Bytes,
    pub mime_type: String,
}

impl InlineContent {
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            encoding: ContentEncoding::Text,
            payload: payload.into(),
            mime_type: None,
        }
    }

    pub fn base64(payload: impl Into<String>, mime_type: Option<String>) -> Self {
        Self {
            encoding: ContentEncoding::Base64,
            payload: payload.into(),
            mime_type,
        }
    }

    /// Wrap raw bytes, keeping text types readable in the record.
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) if is_text_mime(mime_type) => Self {
                encoding: ContentEncoding::Text,
                payload: text.to_string(),
                mime_type: Some(mime_type.to_string()),
            },
            _ => Self::base64(
                general_purpose::STANDARD.encode(bytes),
                Some(mime_type.to_string()),
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payload.trim().is_empty()
    }

    /// Decode the payload into bytes plus its best-known MIME type.
    pub fn decode(&self) -> RaftResult<AttachmentContent> {
        match self.encoding {
            ContentEncoding::Text => Ok(AttachmentContent {
                bytes: Bytes::from(self.payload.clone().into_bytes()),
                mime_type: self
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TEXT_MIME.into()),
            }),
            ContentEncoding::Base64 => {
                let (url_mime, data) = split_data_url(&self.payload);
                let bytes = general_purpose::STANDARD
                    .decode(data.trim())
                    .map_err(|err| {
                        RaftError::InvalidAttachment(format!("invalid base64 payload: {}", err))
                    })?;
                let mime_type = url_mime
                    .map(str::to_string)
                    .or_else(|| self.mime_type.clone())
                    .unwrap_or_else(|| DEFAULT_BINARY_MIME.into());
                Ok(AttachmentContent {
                    bytes: Bytes::from(bytes),
                    mime_type,
                })
            }
        }
    }
}

impl AttachmentValue {
    /// Interpret a stored field value.
    ///
    /// Enveloped objects are decoded by their `kind`. Bare strings are legacy
    /// inline content: a `data:...;base64,` URL is base64, anything else is text.
    /// Null and blank strings mean the field is empty.
    pub fn from_field(value: &Value) -> RaftResult<Option<Self>> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => {
                if s.starts_with("data:") && s.contains(";base64,") {
                    Ok(Some(AttachmentValue::Inline(InlineContent::base64(
                        s.clone(),
                        None,
                    ))))
                } else {
                    Ok(Some(AttachmentValue::Inline(InlineContent::text(s.clone()))))
                }
            }
            Value::Object(map) if map.contains_key("kind") => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|err| RaftError::InvalidAttachment(err.to_string())),
            Value::Object(_) => Err(RaftError::InvalidAttachment(
                "attachment object has no `kind` discriminator".into(),
            )),
            other => Err(RaftError::InvalidAttachment(format!(
                "unexpected attachment value: {}",
                other
            ))),
        }
    }

    pub fn as_reference(&self) -> Option<&RemoteReference> {
        match self {
            AttachmentValue::RemoteReference(reference) => Some(reference),
            AttachmentValue::Inline(_) => None,
        }
    }
}

impl AttachmentContent {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// UTF-8 view of the bytes, when they are valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

/// An attachment-bearing field of the RAFT form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentField {
    pub section: Section,
    pub field: &'static str,
    pub default_filename: &'static str,
    pub mime_type: &'static str,
    pub binary: bool,
}

pub const ATTACHMENT_FIELDS: [AttachmentField; 5] = [
    AttachmentField {
        section: Section::ObservationInfo,
        field: "figure",
        default_filename: "figure.png",
        mime_type: "image/png",
        binary: true,
    },
    AttachmentField {
        section: Section::TechnicalInfo,
        field: "ephemeris",
        default_filename: "ephemeris.txt",
        mime_type: "text/plain",
        binary: false,
    },
    AttachmentField {
        section: Section::TechnicalInfo,
        field: "orbitalElements",
        default_filename: "orbital.txt",
        mime_type: "text/plain",
        binary: false,
    },
    AttachmentField {
        section: Section::TechnicalInfo,
        field: "spectroscopy",
        default_filename: "spectrum.txt",
        mime_type: "text/plain",
        binary: false,
    },
    AttachmentField {
        section: Section::TechnicalInfo,
        field: "astrometry",
        default_filename: "astrometry.xml",
        mime_type: "text/xml",
        binary: false,
    },
];

impl AttachmentField {
    /// Look up a catalogue entry by its field name.
    pub fn by_name(field: &str) -> Option<&'static AttachmentField> {
        ATTACHMENT_FIELDS.iter().find(|f| f.field == field)
    }

    /// Storage filename for content of the given type.
    ///
    /// Binary fields take their extension from the actual image type, so a
    /// JPEG figure is stored as `figure.jpg`.
    pub fn filename_for(&self, mime_type: &str) -> String {
        if self.binary {
            if let Some(ext) = extension_for_mime(mime_type) {
                return format!("{}{}", file_base_name(self.default_filename), ext);
            }
        }
        self.default_filename.to_string()
    }
}

/// Make a filename safe for use as a remote node name.
pub fn sanitize_filename(name: &str) -> RaftResult<String> {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        return Err(RaftError::InvalidAttachment(format!(
            "filename `{}` has no usable characters",
            name
        )));
    }
    Ok(trimmed.to_string())
}

pub fn mime_from_extension(filename: &str) -> &'static str {
    match file_extension(filename).to_ascii_lowercase().as_str() {
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".gif" => "image/gif",
        ".txt" | ".psv" | ".mpc" => "text/plain",
        ".xml" => "application/xml",
        ".json" => "application/json",
        _ => DEFAULT_BINARY_MIME,
    }
}

pub fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "image/png" => Some(".png"),
        "image/jpeg" | "image/jpg" => Some(".jpg"),
        "image/gif" => Some(".gif"),
        "text/plain" => Some(".txt"),
        "application/xml" | "text/xml" => Some(".xml"),
        "application/json" => Some(".json"),
        _ => None,
    }
}

pub fn is_text_mime(mime_type: &str) -> bool {
    let essence = mime_type.split(';').next().unwrap_or("").trim();
    essence.starts_with("text/") || essence == "application/xml" || essence == "application/json"
}

fn file_extension(filename: &str) -> &str {
    filename.rfind('.').map(|i| &filename[i..]).unwrap_or("")
}

fn file_base_name(filename: &str) -> &str {
    filename.rfind('.').map(|i| &filename[..i]).unwrap_or(filename)
}

/// Split `data:<mime>;base64,<data>` into its MIME type and data.
/// Anything else is returned unchanged as data.
fn split_data_url(payload: &str) -> (Option<&str>, &str) {
    if let Some(rest) = payload.strip_prefix("data:") {
        if let Some((header, data)) = rest.split_once(',') {
            let mime = header.split(';').next().filter(|m| !m.is_empty());
            return (mime, data);
        }
    }
    (None, payload)
}
