//! Client for the record persistence endpoint.
//!
//! Writes are multipart POSTs carrying a `doiMetaData` part (the record
//! document), a `doiNodeData` part (`{reviewer, status}`), or both. The
//! endpoint answers a successful write with 303.

use crate::config::AppConfig;
use crate::errors::{RaftError, RaftResult};
use crate::models::record::SubmissionRecord;
use crate::services::credentials::{CredentialProvider, session_cookie};
use crate::services::workflow::ReviewState;
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    header::{ACCEPT, COOKIE, LOCATION},
    multipart::{Form, Part},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

const METADATA_PART: &str = "doiMetaData";
const NODE_PART: &str = "doiNodeData";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Workflow fields written together in one call.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeUpdate {
    /// Empty when no reviewer is assigned.
    pub reviewer: String,
    pub status: &'static str,
}

impl From<&ReviewState> for NodeUpdate {
    fn from(state: &ReviewState) -> Self {
        Self {
            reviewer: state.reviewer.clone().unwrap_or_default(),
            status: state.status.as_wire(),
        }
    }
}

#[derive(Clone)]
pub struct RecordClient {
    http: Client,
    records_url: String,
    cookie_name: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl RecordClient {
    pub fn new(http: Client, cfg: &AppConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http,
            records_url: cfg.records_url.trim_end_matches('/').to_string(),
            cookie_name: cfg.cookie_name.clone(),
            credentials,
        }
    }

    /// Create a record and return the id assigned by the service.
    pub async fn create(&self, record: &SubmissionRecord) -> RaftResult<String> {
        let form = Form::new().part(METADATA_PART, json_part(record)?);
        debug!("creating record at {}", self.records_url);
        let response = self
            .authed(self.http.post(&self.records_url))?
            .multipart(form)
            .send()
            .await?;
        let response = expect_persisted(response).await?;

        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|location| location.trim_end_matches('/').rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| RaftError::PersistFailed {
                status: response.status().as_u16(),
                body: "create answered without a Location naming the record".into(),
            })
    }

    /// Write the record document and, when given, the workflow fields in the
    /// same request.
    pub async fn update(
        &self,
        id: &str,
        record: Option<&SubmissionRecord>,
        state: Option<&ReviewState>,
    ) -> RaftResult<()> {
        let mut form = Form::new();
        if let Some(record) = record {
            form = form.part(METADATA_PART, json_part(record)?);
        }
        if let Some(state) = state {
            form = form.part(NODE_PART, json_part(&NodeUpdate::from(state))?);
        }

        let url = self.record_url(id);
        debug!(
            "updating {} (metadata: {}, workflow: {})",
            url,
            record.is_some(),
            state.is_some()
        );
        let response = self.authed(self.http.post(&url))?.multipart(form).send().await?;
        expect_persisted(response).await?;
        Ok(())
    }

    pub async fn update_node(&self, id: &str, state: &ReviewState) -> RaftResult<()> {
        self.update(id, None, Some(state)).await
    }

    /// Current snapshot of a record.
    pub async fn fetch(&self, id: &str) -> RaftResult<SubmissionRecord> {
        let url = self.record_url(id);
        debug!("fetching {}", url);
        let response = self
            .authed(self.http.get(&url))?
            .header(ACCEPT, JSON_CONTENT_TYPE)
            .send()
            .await?;
        let response = expect_persisted(response).await?;
        let body = response.bytes().await?;
        let mut record: SubmissionRecord = serde_json::from_slice(&body)?;
        if record.id.is_none() {
            record.id = Some(id.to_string());
        }
        Ok(record)
    }

    pub async fn delete(&self, id: &str) -> RaftResult<()> {
        let url = self.record_url(id);
        debug!("deleting {}", url);
        let response = self.authed(self.http.delete(&url))?.send().await?;
        expect_persisted(response).await?;
        Ok(())
    }

    fn record_url(&self, id: &str) -> String {
        format!("{}/{}", self.records_url, id)
    }

    fn authed(&self, request: RequestBuilder) -> RaftResult<RequestBuilder> {
        let cookie = session_cookie(self.credentials.as_ref(), &self.cookie_name)?;
        Ok(request.header(COOKIE, cookie))
    }
}

fn json_part<T: Serialize>(value: &T) -> RaftResult<Part> {
    let json = serde_json::to_vec(value)?;
    Ok(Part::bytes(json).mime_str(JSON_CONTENT_TYPE)?)
}

/// 303 and any 2xx count as persisted.
async fn expect_persisted(response: Response) -> RaftResult<Response> {
    let status = response.status();
    if status == StatusCode::SEE_OTHER || status.is_success() {
        return Ok(response);
    }
    Err(RaftError::PersistFailed {
        status: status.as_u16(),
        body: response.text().await.unwrap_or_default(),
    })
}
