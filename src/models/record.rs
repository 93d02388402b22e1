//! Represents a RAFT submission record as exchanged with the record service.

use crate::errors::{RaftError, RaftResult};
use crate::models::attachment::{AttachmentField, AttachmentValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, fmt};

/// Review lifecycle status of a submission record.
///
/// Serialized with the strings the record service stores on its nodes;
/// the snake_case names are accepted when reading.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum RecordStatus {
    #[default]
    #[serde(rename = "in progress", alias = "draft")]
    Draft,
    #[serde(rename = "review ready", alias = "review_ready")]
    ReviewReady,
    #[serde(rename = "in review", alias = "in_review")]
    InReview,
    #[serde(rename = "approved")]
    Approved,
    #[serde(rename = "rejected")]
    Rejected,
    #[serde(rename = "minted")]
    Minted,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 6] = [
        RecordStatus::Draft,
        RecordStatus::ReviewReady,
        RecordStatus::InReview,
        RecordStatus::Approved,
        RecordStatus::Rejected,
        RecordStatus::Minted,
    ];

    /// Value written to the record service.
    pub fn as_wire(&self) -> &'static str {
        match self {
            RecordStatus::Draft => "in progress",
            RecordStatus::ReviewReady => "review ready",
            RecordStatus::InReview => "in review",
            RecordStatus::Approved => "approved",
            RecordStatus::Rejected => "rejected",
            RecordStatus::Minted => "minted",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Draft => "draft",
            RecordStatus::ReviewReady => "review_ready",
            RecordStatus::InReview => "in_review",
            RecordStatus::Approved => "approved",
            RecordStatus::Rejected => "rejected",
            RecordStatus::Minted => "minted",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named sections of a RAFT form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    AuthorInfo,
    ObservationInfo,
    TechnicalInfo,
    MiscInfo,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::AuthorInfo,
        Section::ObservationInfo,
        Section::TechnicalInfo,
        Section::MiscInfo,
    ];

    /// Key of the section inside the record's `sections` map.
    pub fn key(&self) -> &'static str {
        match self {
            Section::AuthorInfo => "authorInfo",
            Section::ObservationInfo => "observationInfo",
            Section::TechnicalInfo => "technicalInfo",
            Section::MiscInfo => "miscInfo",
        }
    }

    /// Whether a record must carry this section before it can go to review.
    pub fn is_required(&self) -> bool {
        matches!(self, Section::AuthorInfo | Section::ObservationInfo)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A RAFT submission record.
///
/// `id` and `data_directory` are assigned by the record service on the first
/// successful create; a record without an id has never been persisted.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub status: RecordStatus,

    /// Username of the assigned reviewer. Only meaningful while `in_review`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,

    /// Section name to arbitrary structured content.
    #[serde(default)]
    pub sections: BTreeMap<String, Value>,

    /// Remote path prefix under which attachments are stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_directory: Option<String>,
}

impl SubmissionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn section(&self, section: Section) -> Option<&Value> {
        self.sections.get(section.key())
    }

    pub fn set_section(&mut self, section: Section, content: Value) {
        self.sections.insert(section.key().to_string(), content);
    }

    /// Read an attachment field. Missing, null and empty-string fields are `None`.
    pub fn attachment(&self, field: &AttachmentField) -> RaftResult<Option<AttachmentValue>> {
        match self
            .section(field.section)
            .and_then(|content| content.get(field.field))
        {
            Some(value) => AttachmentValue::from_field(value),
            None => Ok(None),
        }
    }

    /// Write (or clear, with `None`) an attachment field, creating the section if needed.
    pub fn set_attachment(
        &mut self,
        field: &AttachmentField,
        value: Option<&AttachmentValue>,
    ) -> RaftResult<()> {
        let entry = self
            .sections
            .entry(field.section.key().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(content) = entry else {
            return Err(RaftError::InvalidAttachment(format!(
                "section `{}` is not an object",
                field.section
            )));
        };
        match value {
            Some(value) => {
                content.insert(field.field.to_string(), serde_json::to_value(value)?);
            }
            None => {
                content.remove(field.field);
            }
        }
        Ok(())
    }
}
