//! src/services/transfer_service.rs
//!
//! TransferClient: moves one named file's bytes to or from the remote
//! object store. Writes go through the negotiated transfer protocol
//! (node probe, transfer intent, job poll, delegated PUT); reads hit the
//! store's file endpoint directly.

use crate::config::AppConfig;
use crate::errors::{RaftError, RaftResult};
use crate::models::attachment::{AttachmentContent, mime_from_extension};
use crate::models::job::{JobPhase, NodeKind, NodeStatus, TransferJob};
use crate::services::credentials::{CredentialProvider, session_cookie};
use crate::services::vospace_xml::{
    TRANSFER_DETAILS_ID, node_document, parse_endpoint, parse_job, transfer_document, vos_uri,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{
    Body, Client, RequestBuilder, Response, StatusCode, Url,
    header::{ACCEPT, CONTENT_TYPE, COOKIE, HeaderValue, LOCATION},
};
use std::{io, sync::Arc, time::Duration};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

const XML_CONTENT_TYPE: &str = "text/xml";

#[derive(Clone)]
pub struct TransferClient {
    http: Client,
    nodes_url: String,
    synctrans_url: String,
    files_url: String,
    authority: String,
    cookie_name: String,
    credentials: Arc<dyn CredentialProvider>,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl TransferClient {
    pub fn new(http: Client, cfg: &AppConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http,
            nodes_url: cfg.nodes_url.clone(),
            synctrans_url: cfg.synctrans_url.clone(),
            files_url: cfg.files_url.clone(),
            authority: cfg.vospace_authority.clone(),
            cookie_name: cfg.cookie_name.clone(),
            credentials,
            poll_attempts: cfg.job_poll_attempts.max(1),
            poll_interval: cfg.job_poll_interval,
        }
    }

    /// Make sure a node exists at `remote_path`, creating it when the probe
    /// misses. A conflict on creation means someone else created it first.
    pub async fn ensure_node_exists(
        &self,
        remote_path: &str,
        kind: NodeKind,
    ) -> RaftResult<NodeStatus> {
        let cookie = self.cookie()?;
        let url = join_url(&self.nodes_url, remote_path);

        debug!("probing node {}", url);
        let probe = self
            .authed(self.http.get(&url), &cookie)
            .header(ACCEPT, XML_CONTENT_TYPE)
            .send()
            .await?;
        if probe.status().is_success() {
            return Ok(NodeStatus {
                existed: true,
                created: false,
            });
        }

        debug!(
            "node {} missing ({}), creating {}",
            remote_path,
            probe.status(),
            kind.xsi_type()
        );
        let document = node_document(&vos_uri(&self.authority, remote_path), kind);
        let response = self
            .authed(self.http.put(&url), &cookie)
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .body(document)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(NodeStatus {
                existed: false,
                created: true,
            })
        } else if status == StatusCode::CONFLICT {
            Ok(NodeStatus {
                existed: true,
                created: false,
            })
        } else {
            Err(RaftError::NodeUnavailable {
                path: remote_path.to_string(),
                status: status.as_u16(),
                body: body_text(response).await,
            })
        }
    }

    /// Negotiate a push transfer for `remote_path` and return the delegated
    /// endpoint the bytes must be PUT to.
    pub async fn negotiate_upload(&self, remote_path: &str) -> RaftResult<String> {
        let cookie = self.cookie()?;
        let target = vos_uri(&self.authority, remote_path);
        let document = transfer_document(&target);

        debug!("submitting transfer intent for {}", target);
        let response = self
            .authed(self.http.post(&self.synctrans_url), &cookie)
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .body(document)
            .send()
            .await
            .map_err(negotiation_error)?;

        let status = response.status();
        if status != StatusCode::SEE_OTHER {
            return Err(RaftError::TransferNegotiationFailed {
                reason: format!(
                    "transfer intent answered {} instead of a redirect: {}",
                    status,
                    body_text(response).await
                ),
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| RaftError::TransferNegotiationFailed {
                reason: "transfer intent redirect has no Location".into(),
            })?;
        let job_url = job_url_from_location(&self.synctrans_url, location)?;

        self.await_endpoint(remote_path, &job_url, &cookie).await
    }

    /// Read a stored file in one piece. The MIME type comes from the
    /// response, or from the file extension when the store sends none.
    pub async fn negotiate_download(&self, remote_path: &str) -> RaftResult<AttachmentContent> {
        let response = self.open_read(remote_path).await?;
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| mime_from_extension(remote_path).to_string());
        let bytes = response.bytes().await?;
        debug!("read {} bytes from {}", bytes.len(), remote_path);
        Ok(AttachmentContent { bytes, mime_type })
    }

    /// Stream a stored file into `writer`, returning the number of bytes written.
    pub async fn download_to<W>(&self, remote_path: &str, writer: &mut W) -> RaftResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let response = self.open_read(remote_path).await?;
        let mut total: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            total += chunk.len() as u64;
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        debug!("streamed {} bytes from {}", total, remote_path);
        Ok(total)
    }

    /// Single PUT of `bytes` to a negotiated endpoint.
    pub async fn put_bytes(
        &self,
        endpoint: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> RaftResult<()> {
        self.put_body(endpoint, Body::from(bytes), content_type).await
    }

    /// PUT a chunked body to a negotiated endpoint.
    pub async fn put_stream<S>(
        &self,
        endpoint: &str,
        stream: S,
        content_type: &str,
    ) -> RaftResult<()>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.put_body(endpoint, Body::wrap_stream(stream), content_type)
            .await
    }

    /// Delete the node at `remote_path`. A node that is already gone counts
    /// as deleted.
    pub async fn delete_remote(&self, remote_path: &str) -> RaftResult<()> {
        let cookie = self.cookie()?;
        let url = join_url(&self.nodes_url, remote_path);

        debug!("deleting node {}", url);
        let response = self.authed(self.http.delete(&url), &cookie).send().await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(RaftError::RemoteDeleteFailed {
            path: remote_path.to_string(),
            status: status.as_u16(),
            body: body_text(response).await,
        })
    }

    async fn await_endpoint(
        &self,
        remote_path: &str,
        job_url: &str,
        cookie: &HeaderValue,
    ) -> RaftResult<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let job = self.fetch_job(job_url, cookie).await?;
            debug!(
                "transfer job {} phase {} (attempt {}/{})",
                job_url, job.phase, attempt, self.poll_attempts
            );

            match job.phase {
                JobPhase::Error => {
                    return Err(RaftError::TransferNegotiationFailed {
                        reason: job
                            .error_message
                            .unwrap_or_else(|| "transfer job failed".into()),
                    });
                }
                JobPhase::Aborted => {
                    return Err(RaftError::TransferNegotiationFailed {
                        reason: "transfer job was aborted".into(),
                    });
                }
                _ => {}
            }

            if let Some(details) = job.transfer_details_url.as_deref() {
                let details_url = resolve_url(job_url, details)?;
                return match self.fetch_endpoint(&details_url, cookie).await? {
                    Some(endpoint) => {
                        info!("negotiated upload endpoint for {}", remote_path);
                        Ok(endpoint)
                    }
                    None => Err(RaftError::NoEndpointResolved {
                        path: remote_path.to_string(),
                    }),
                };
            }

            if job.phase.is_terminal() {
                return Err(RaftError::NoEndpointResolved {
                    path: remote_path.to_string(),
                });
            }
            if attempt >= self.poll_attempts {
                return Err(RaftError::NotYetReady {
                    job_url: job_url.to_string(),
                    phase: job.phase,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn fetch_job(
        &self,
        job_url: &str,
        cookie: &HeaderValue,
    ) -> RaftResult<TransferJob> {
        let text = self.fetch_document(job_url, cookie, "job").await?;
        parse_job(&text)
    }

    async fn fetch_endpoint(
        &self,
        details_url: &str,
        cookie: &HeaderValue,
    ) -> RaftResult<Option<String>> {
        debug!("fetching {} from {}", TRANSFER_DETAILS_ID, details_url);
        let text = self
            .fetch_document(details_url, cookie, TRANSFER_DETAILS_ID)
            .await?;
        parse_endpoint(&text)
    }

    async fn fetch_document(
        &self,
        url: &str,
        cookie: &HeaderValue,
        what: &str,
    ) -> RaftResult<String> {
        let response = self
            .authed(self.http.get(url), cookie)
            .header(ACCEPT, XML_CONTENT_TYPE)
            .send()
            .await
            .map_err(negotiation_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RaftError::TransferNegotiationFailed {
                reason: format!(
                    "fetching {} answered {}: {}",
                    what,
                    status,
                    body_text(response).await
                ),
            });
        }
        response.text().await.map_err(negotiation_error)
    }

    async fn open_read(&self, remote_path: &str) -> RaftResult<Response> {
        let cookie = self.cookie()?;
        let url = join_url(&self.files_url, remote_path);

        debug!("reading {}", url);
        let response = self.authed(self.http.get(&url), &cookie).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RaftError::DownloadFailed {
                path: remote_path.to_string(),
                status: status.as_u16(),
                body: body_text(response).await,
            });
        }
        Ok(response)
    }

    async fn put_body(
        &self,
        endpoint: &str,
        body: Body,
        content_type: &str,
    ) -> RaftResult<()> {
        let cookie = self.cookie()?;
        let request = self
            .authed(self.http.put(endpoint), &cookie)
            .header(CONTENT_TYPE, content_type)
            .body(body);

        debug!("putting {} to negotiated endpoint", content_type);
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                RaftError::UploadFailed {
                    status: StatusCode::REQUEST_TIMEOUT.as_u16(),
                    body: err.to_string(),
                }
            } else {
                RaftError::Http(err)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(RaftError::UploadFailed {
            status: status.as_u16(),
            body: body_text(response).await,
        })
    }

    fn cookie(&self) -> RaftResult<HeaderValue> {
        session_cookie(self.credentials.as_ref(), &self.cookie_name)
    }

    fn authed(&self, request: RequestBuilder, cookie: &HeaderValue) -> RequestBuilder {
        request.header(COOKIE, cookie.clone())
    }
}

/// Job URL named by a transfer intent's redirect. The redirect points at the
/// job's transfer details; the job itself sits above that sub-path.
fn job_url_from_location(base: &str, location: &str) -> RaftResult<String> {
    let resolved = resolve_url(base, location)?;
    let suffix = format!("/results/{}", TRANSFER_DETAILS_ID);
    Ok(match resolved.strip_suffix(suffix.as_str()) {
        Some(job) => job.to_string(),
        None => resolved,
    })
}

fn resolve_url(base: &str, reference: &str) -> RaftResult<String> {
    Url::parse(base)
        .and_then(|base| base.join(reference))
        .map(String::from)
        .map_err(|err| RaftError::TransferNegotiationFailed {
            reason: format!("cannot resolve `{}` against `{}`: {}", reference, base, err),
        })
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn negotiation_error(err: reqwest::Error) -> RaftError {
    if err.is_timeout() {
        RaftError::TransferNegotiationFailed {
            reason: format!("timed out: {}", err),
        }
    } else {
        RaftError::Http(err)
    }
}

async fn body_text(response: Response) -> String {
    response.text().await.unwrap_or_default()
}
