//! src/services/submission_service.rs
//!
//! SubmissionOrchestrator: the only component that writes records. Every
//! mutating call derives its target `(status, reviewer)` from the snapshot
//! the caller passes in and persists it with a single request.

use crate::config::{AppConfig, data_directory};
use crate::errors::{RaftError, RaftResult};
use crate::models::attachment::{
    ATTACHMENT_FIELDS, AttachmentField, AttachmentValue, RemoteReference,
};
use crate::models::job::NodeKind;
use crate::models::record::{Section, SubmissionRecord};
use crate::services::attachment_service::{AttachmentResolver, RemovalOutcome};
use crate::services::credentials::CredentialProvider;
use crate::services::record_client::RecordClient;
use crate::services::transfer_service::TransferClient;
use crate::services::workflow::{self, ReviewAction, ReviewState};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Checks one section before a record may go to review.
pub trait SectionValidator: Send + Sync {
    fn validate(&self, section: Section, content: Option<&Value>) -> Result<(), String>;
}

/// Requires every required section to be a non-empty object.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequiredSections;

impl SectionValidator for RequiredSections {
    fn validate(&self, section: Section, content: Option<&Value>) -> Result<(), String> {
        if !section.is_required() {
            return Ok(());
        }
        match content {
            Some(Value::Object(fields)) if !fields.is_empty() => Ok(()),
            Some(Value::Object(_)) => Err(format!("section `{}` is empty", section)),
            Some(_) => Err(format!("section `{}` must be an object", section)),
            None => Err(format!("section `{}` is required", section)),
        }
    }
}

/// An inline attachment that could not be moved to the store during a save.
/// The field keeps its inline value.
#[derive(Debug)]
pub struct AttachmentWarning {
    pub field: &'static str,
    pub error: RaftError,
}

/// Outcome of a successful persist.
#[derive(Debug)]
pub struct PersistReceipt {
    pub id: String,
    /// Whether this call created the record.
    pub created: bool,
    /// The record as it now stands on the service.
    pub record: SubmissionRecord,
    pub attachment_warnings: Vec<AttachmentWarning>,
    /// Set when the record was created but a follow-up write failed. The
    /// record keeps its id and shows what the service holds, so saving it
    /// again updates instead of creating a second record.
    pub incomplete: Option<RaftError>,
}

impl PersistReceipt {
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_none()
    }
}

pub struct SubmissionOrchestrator {
    records: RecordClient,
    attachments: AttachmentResolver,
    validator: Box<dyn SectionValidator>,
    doi_root: String,
}

impl SubmissionOrchestrator {
    pub fn new(
        records: RecordClient,
        attachments: AttachmentResolver,
        doi_root: impl Into<String>,
    ) -> Self {
        Self {
            records,
            attachments,
            validator: Box::new(RequiredSections),
            doi_root: doi_root.into(),
        }
    }

    /// Wire the clients from configuration, sharing one HTTP client and the
    /// configured session token.
    pub fn from_config(cfg: &AppConfig) -> RaftResult<Self> {
        let http = cfg.http_client()?;
        let credentials: Arc<dyn CredentialProvider> = Arc::new(cfg.token.clone());
        let transfer = TransferClient::new(http.clone(), cfg, credentials.clone());
        let records = RecordClient::new(http, cfg, credentials);
        let attachments = AttachmentResolver::new(transfer, cfg.memoize_downloads);
        Ok(Self::new(records, attachments, cfg.doi_root.clone()))
    }

    pub fn with_validator(mut self, validator: impl SectionValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn attachments(&self) -> &AttachmentResolver {
        &self.attachments
    }

    /// Data directory of a record: the one it carries, or the one the service
    /// lays out for its id.
    pub fn data_directory_of(&self, record: &SubmissionRecord) -> Option<String> {
        record
            .data_directory
            .clone()
            .or_else(|| record.id.as_deref().map(|id| data_directory(&self.doi_root, id)))
    }

    /// Create or update `record`.
    ///
    /// A non-draft save validates every section and submits the record for
    /// review. Inline attachments are moved to the store once the data
    /// directory is known; a failed move keeps the inline value and is
    /// reported on the receipt.
    pub async fn save(
        &self,
        record: &SubmissionRecord,
        as_draft: bool,
    ) -> RaftResult<PersistReceipt> {
        ensure_editable("save", record)?;

        let target = if as_draft {
            None
        } else {
            if !workflow::can_submit(record.status) {
                return Err(RaftError::IllegalTransition {
                    from: record.status,
                    action: ReviewAction::SubmitForReview,
                });
            }
            self.validate(record)?;
            Some(workflow::transition(
                &ReviewState::of(record),
                &ReviewAction::SubmitForReview,
            )?)
        };

        let mut next = record.clone();
        let mut warnings = Vec::new();
        let mut incomplete = None;

        let (id, created) = match record.id.clone() {
            Some(id) => {
                let dir = self.data_directory_of(&next).unwrap_or_default();
                self.migrate_inline(&mut next, &dir, &mut warnings).await?;
                next.data_directory = Some(dir);
                if let Some(state) = &target {
                    stamp(&mut next, state);
                }
                self.records
                    .update(&id, Some(&next), target.as_ref())
                    .await?;
                info!("updated record {} ({})", id, next.status);
                (id, false)
            }
            None => {
                let id = self.records.create(&next).await?;
                info!("created record {}", id);
                next.id = Some(id.clone());

                let dir = data_directory(&self.doi_root, &id);
                self.ensure_container(&dir).await;
                next.data_directory = Some(dir.clone());

                if let Err(error) = self
                    .finish_create(&id, &mut next, &dir, target.as_ref(), &mut warnings)
                    .await
                {
                    warn!("record {} created but left {}: {}", id, next.status, error);
                    incomplete = Some(error);
                }
                (id, true)
            }
        };

        Ok(PersistReceipt {
            id,
            created,
            record: next,
            attachment_warnings: warnings,
            incomplete,
        })
    }

    /// Follow-up writes of a create. `record` only takes on a change once the
    /// service has accepted it.
    async fn finish_create(
        &self,
        id: &str,
        record: &mut SubmissionRecord,
        dir: &str,
        target: Option<&ReviewState>,
        warnings: &mut Vec<AttachmentWarning>,
    ) -> RaftResult<()> {
        let mut migrated = record.clone();
        if self.migrate_inline(&mut migrated, dir, warnings).await? > 0 {
            self.records.update(id, Some(&migrated), None).await?;
        }
        *record = migrated;

        if let Some(state) = target {
            self.records.update_node(id, state).await?;
            stamp(record, state);
        }
        Ok(())
    }

    /// Upload a local file into `field` and save the record as a draft.
    ///
    /// Refused before anything is uploaded when the record may not be edited.
    pub async fn attach_file(
        &self,
        record: &SubmissionRecord,
        field: &AttachmentField,
        file: &Path,
        name: Option<&str>,
        mime_type: Option<&str>,
    ) -> RaftResult<(RemoteReference, PersistReceipt)> {
        ensure_editable("attach", record)?;
        let dir = self
            .data_directory_of(record)
            .ok_or(RaftError::NotPersisted)?;

        let reference = self
            .attachments
            .upload_file(&dir, file, name, mime_type)
            .await?;
        let mut next = record.clone();
        next.set_attachment(
            field,
            Some(&AttachmentValue::RemoteReference(reference.clone())),
        )?;
        let receipt = self.save(&next, true).await?;
        Ok((reference, receipt))
    }

    /// Clear `field`, delete its stored file and save the record as a draft.
    ///
    /// Refused before anything is deleted when the record may not be edited.
    /// A failed remote delete does not stop the save and is returned as the
    /// removal outcome's warning.
    pub async fn detach(
        &self,
        record: &SubmissionRecord,
        field: &AttachmentField,
    ) -> RaftResult<(RemovalOutcome, PersistReceipt)> {
        ensure_editable("detach", record)?;

        let mut next = record.clone();
        let mut slot = next.attachment(field)?;
        let dir = self.data_directory_of(&next);
        let outcome = self.attachments.remove(&mut slot, dir.as_deref()).await;
        next.set_attachment(field, slot.as_ref())?;
        let receipt = self.save(&next, true).await?;
        Ok((outcome, receipt))
    }

    /// Apply a workflow action to `snapshot` and persist the resulting
    /// `(status, reviewer)` pair in one call.
    pub async fn apply(
        &self,
        snapshot: &SubmissionRecord,
        action: ReviewAction,
    ) -> RaftResult<PersistReceipt> {
        let id = snapshot.id.clone().ok_or(RaftError::NotPersisted)?;
        let state = workflow::transition(&ReviewState::of(snapshot), &action)?;
        if action == ReviewAction::SubmitForReview {
            self.validate(snapshot)?;
        }

        self.records.update_node(&id, &state).await?;
        info!(
            "{} on {}: {} -> {}",
            action, id, snapshot.status, state.status
        );

        let mut next = snapshot.clone();
        stamp(&mut next, &state);
        Ok(PersistReceipt {
            id,
            created: false,
            record: next,
            attachment_warnings: Vec::new(),
            incomplete: None,
        })
    }

    pub async fn claim_review(
        &self,
        snapshot: &SubmissionRecord,
        reviewer: &str,
    ) -> RaftResult<PersistReceipt> {
        self.apply(
            snapshot,
            ReviewAction::Claim {
                reviewer: reviewer.to_string(),
            },
        )
        .await
    }

    pub async fn release_review(
        &self,
        snapshot: &SubmissionRecord,
        caller: &str,
    ) -> RaftResult<PersistReceipt> {
        self.apply(
            snapshot,
            ReviewAction::Release {
                caller: caller.to_string(),
            },
        )
        .await
    }

    /// Delete a draft record.
    pub async fn delete(&self, snapshot: &SubmissionRecord) -> RaftResult<()> {
        let id = snapshot.id.as_deref().ok_or(RaftError::NotPersisted)?;
        if !workflow::can_delete(snapshot.status) {
            return Err(RaftError::OperationNotPermitted {
                operation: "delete",
                status: snapshot.status,
            });
        }
        self.records.delete(id).await?;
        info!("deleted record {}", id);
        Ok(())
    }

    /// Current snapshot of a record, with its data directory filled in.
    pub async fn load(&self, id: &str) -> RaftResult<SubmissionRecord> {
        let mut record = self.records.fetch(id).await?;
        if record.data_directory.is_none() {
            record.data_directory = self.data_directory_of(&record);
        }
        Ok(record)
    }

    fn validate(&self, record: &SubmissionRecord) -> RaftResult<()> {
        let failures: Vec<String> = Section::ALL
            .iter()
            .filter_map(|section| {
                self.validator
                    .validate(*section, record.section(*section))
                    .err()
            })
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RaftError::ValidationFailed(failures))
        }
    }

    async fn ensure_container(&self, dir: &str) {
        match self
            .attachments
            .transfer()
            .ensure_node_exists(dir, NodeKind::Container)
            .await
        {
            Ok(status) => debug!("data directory {} created={}", dir, status.created),
            Err(err) => warn!("data directory {} not ensured: {}", dir, err),
        }
    }

    /// Upload every inline attachment field into `dir`, returning how many
    /// fields now hold references.
    async fn migrate_inline(
        &self,
        record: &mut SubmissionRecord,
        dir: &str,
        warnings: &mut Vec<AttachmentWarning>,
    ) -> RaftResult<usize> {
        let mut migrated = 0;
        for field in ATTACHMENT_FIELDS.iter() {
            let inline = match record.attachment(field) {
                Ok(Some(AttachmentValue::Inline(inline))) if !inline.is_empty() => inline,
                Ok(_) => continue,
                Err(error) => {
                    warnings.push(AttachmentWarning {
                        field: field.field,
                        error,
                    });
                    continue;
                }
            };

            let content = match inline.decode() {
                Ok(content) => content,
                Err(error) => {
                    warnings.push(AttachmentWarning {
                        field: field.field,
                        error,
                    });
                    continue;
                }
            };

            let (filename, mime_type) = storage_name(field, &content.mime_type);
            let mut slot = Some(AttachmentValue::Inline(inline));
            match self
                .attachments
                .upload_into(&mut slot, dir, &filename, content.bytes, &mime_type)
                .await
            {
                Ok(_) => {
                    record.set_attachment(field, slot.as_ref())?;
                    migrated += 1;
                }
                Err(error) => {
                    warn!("kept {} inline: {}", field.field, error);
                    warnings.push(AttachmentWarning {
                        field: field.field,
                        error,
                    });
                }
            }
        }
        Ok(migrated)
    }
}

/// Remote filename and content type for a field's content.
fn storage_name(field: &AttachmentField, mime_type: &str) -> (String, String) {
    let mime_type = if field.binary {
        mime_type.to_string()
    } else {
        field.mime_type.to_string()
    };
    (field.filename_for(&mime_type), mime_type)
}

fn ensure_editable(operation: &'static str, record: &SubmissionRecord) -> RaftResult<()> {
    if workflow::can_edit(record.status) {
        Ok(())
    } else {
        Err(RaftError::OperationNotPermitted {
            operation,
            status: record.status,
        })
    }
}

fn stamp(record: &mut SubmissionRecord, state: &ReviewState) {
    record.status = state.status;
    record.reviewer = state.reviewer.clone();
}
