//! src/services/attachment_service.rs
//!
//! AttachmentResolver: fills record fields with inline content or remote
//! references, and turns either back into bytes.

use crate::errors::{RaftError, RaftResult};
use crate::models::attachment::{
    AttachmentContent, AttachmentValue, RemoteReference, mime_from_extension, sanitize_filename,
};
use crate::models::job::NodeKind;
use crate::services::transfer_service::TransferClient;
use bytes::Bytes;
use chrono::Utc;
use std::{collections::HashMap, path::Path, sync::Mutex};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// A remote delete that failed while the field was cleared anyway.
#[derive(Debug)]
pub struct RemovalWarning {
    pub filename: String,
    pub error: RaftError,
}

/// Result of `AttachmentResolver::remove`. The field is always cleared.
#[derive(Debug, Default)]
pub struct RemovalOutcome {
    pub warning: Option<RemovalWarning>,
}

impl RemovalOutcome {
    pub fn is_clean(&self) -> bool {
        self.warning.is_none()
    }
}

pub struct AttachmentResolver {
    transfer: TransferClient,

    /// Downloads keyed by `(data_directory, filename)`.
    cache: Mutex<HashMap<(String, String), AttachmentContent>>,
    memoize: bool,
}

impl AttachmentResolver {
    pub fn new(transfer: TransferClient, memoize: bool) -> Self {
        Self {
            transfer,
            cache: Mutex::new(HashMap::new()),
            memoize,
        }
    }

    pub fn transfer(&self) -> &TransferClient {
        &self.transfer
    }

    /// Store `bytes` as `{data_directory}/{filename}`.
    ///
    /// The node is ensured, a transfer negotiated and the bytes PUT, strictly
    /// in that order. A reference is returned only when the PUT succeeded.
    pub async fn upload(
        &self,
        data_directory: &str,
        filename: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> RaftResult<RemoteReference> {
        let filename = sanitize_filename(filename)?;
        let path = attachment_path(data_directory, &filename);
        let size = bytes.len() as u64;

        let endpoint = self.prepare(&path).await?;
        self.transfer
            .put_bytes(&endpoint, bytes, content_type)
            .await?;
        self.forget(data_directory, &filename);

        info!("stored {} ({} bytes)", path, size);
        Ok(RemoteReference {
            filename,
            mime_type: content_type.to_string(),
            size,
            uploaded_at: Utc::now(),
        })
    }

    /// Stream a local file into the data directory.
    ///
    /// The remote name defaults to the local file name and the MIME type to
    /// the one implied by the extension.
    pub async fn upload_file(
        &self,
        data_directory: &str,
        local: &Path,
        filename: Option<&str>,
        content_type: Option<&str>,
    ) -> RaftResult<RemoteReference> {
        let name = match filename {
            Some(name) => name.to_string(),
            None => local
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    RaftError::InvalidAttachment(format!(
                        "`{}` has no file name",
                        local.display()
                    ))
                })?,
        };
        let filename = sanitize_filename(&name)?;
        let mime_type = content_type
            .map(str::to_string)
            .unwrap_or_else(|| mime_from_extension(&filename).to_string());

        let file = File::open(local).await?;
        let size = file.metadata().await?.len();
        let path = attachment_path(data_directory, &filename);

        let endpoint = self.prepare(&path).await?;
        self.transfer
            .put_stream(&endpoint, ReaderStream::new(file), &mime_type)
            .await?;
        self.forget(data_directory, &filename);

        info!("streamed {} into {} ({} bytes)", local.display(), path, size);
        Ok(RemoteReference {
            filename,
            mime_type,
            size,
            uploaded_at: Utc::now(),
        })
    }

    /// Upload and point `slot` at the result. On any failure `slot` keeps
    /// its previous value.
    pub async fn upload_into(
        &self,
        slot: &mut Option<AttachmentValue>,
        data_directory: &str,
        filename: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> RaftResult<RemoteReference> {
        let reference = self
            .upload(data_directory, filename, bytes, content_type)
            .await?;
        *slot = Some(AttachmentValue::RemoteReference(reference.clone()));
        Ok(reference)
    }

    /// Bytes behind a field value. Empty fields resolve to `None`; inline
    /// content is decoded in place; references are downloaded (or served
    /// from the memo) and need the record's data directory.
    pub async fn resolve(
        &self,
        value: Option<&AttachmentValue>,
        data_directory: Option<&str>,
    ) -> RaftResult<Option<AttachmentContent>> {
        let reference = match value {
            None => return Ok(None),
            Some(AttachmentValue::Inline(inline)) => return inline.decode().map(Some),
            Some(AttachmentValue::RemoteReference(reference)) => reference,
        };

        let data_directory = data_directory
            .filter(|dir| !dir.trim().is_empty())
            .ok_or_else(|| RaftError::MissingContext {
                filename: reference.filename.clone(),
            })?;

        let key = (data_directory.to_string(), reference.filename.clone());
        if let Some(hit) = self.cached(&key) {
            debug!("memoized read of {}/{}", key.0, key.1);
            return Ok(Some(hit));
        }

        let path = attachment_path(data_directory, &reference.filename);
        let mut content = self.transfer.negotiate_download(&path).await?;
        if content.mime_type.is_empty() || content.mime_type == "application/octet-stream" {
            content.mime_type = reference.mime_type.clone();
        }

        if self.memoize {
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(key, content.clone());
            }
        }
        Ok(Some(content))
    }

    /// Clear `slot`, deleting the remote file when it held a reference.
    ///
    /// A failed delete never stops the clear; it comes back as a warning.
    pub async fn remove(
        &self,
        slot: &mut Option<AttachmentValue>,
        data_directory: Option<&str>,
    ) -> RemovalOutcome {
        let Some(AttachmentValue::RemoteReference(reference)) = slot.take() else {
            return RemovalOutcome::default();
        };

        let Some(data_directory) = data_directory.filter(|dir| !dir.trim().is_empty()) else {
            warn!(
                "cleared {} without deleting it: record has no data directory",
                reference.filename
            );
            return RemovalOutcome {
                warning: Some(RemovalWarning {
                    filename: reference.filename.clone(),
                    error: RaftError::MissingContext {
                        filename: reference.filename,
                    },
                }),
            };
        };

        self.forget(data_directory, &reference.filename);
        let path = attachment_path(data_directory, &reference.filename);
        match self.transfer.delete_remote(&path).await {
            Ok(()) => {
                debug!("deleted {}", path);
                RemovalOutcome::default()
            }
            Err(err) => {
                warn!("remote delete of {} failed: {}", path, err);
                RemovalOutcome {
                    warning: Some(RemovalWarning {
                        filename: reference.filename,
                        error: err,
                    }),
                }
            }
        }
    }

    /// Ensure the data node, then negotiate. An unavailable node is logged
    /// and the transfer attempted anyway.
    async fn prepare(&self, path: &str) -> RaftResult<String> {
        match self.transfer.ensure_node_exists(path, NodeKind::Data).await {
            Ok(status) => debug!("node {} existed={} created={}", path, status.existed, status.created),
            Err(err) if err.is_soft() => warn!("continuing without node {}: {}", path, err),
            Err(err) => return Err(err),
        }
        self.transfer.negotiate_upload(path).await
    }

    fn cached(&self, key: &(String, String)) -> Option<AttachmentContent> {
        if !self.memoize {
            return None;
        }
        self.cache.lock().ok()?.get(key).cloned()
    }

    fn forget(&self, data_directory: &str, filename: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(&(data_directory.to_string(), filename.to_string()));
        }
    }
}

/// Remote path of `filename` inside a data directory.
pub fn attachment_path(data_directory: &str, filename: &str) -> String {
    format!("{}/{}", data_directory.trim_end_matches('/'), filename)
}
