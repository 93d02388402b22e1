//! Documents exchanged with the object store during transfer negotiation.
//!
//! Outgoing documents are assembled from a fixed template. Incoming job and
//! transfer documents are read with an event parser that matches on local
//! element and attribute names only, so namespace prefixes, attribute order
//! and unrecognised elements have no effect.

use crate::errors::{RaftError, RaftResult};
use crate::models::job::{JobPhase, NodeKind, TransferJob};
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use std::fmt;

const VOSPACE_NS: &str = "http://www.ivoa.net/xml/VOSpace/v2.0";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Result id of the job output that carries the negotiated endpoint.
pub const TRANSFER_DETAILS_ID: &str = "transferDetails";

/// Build the `vos://` URI of a path in the store.
pub fn vos_uri(authority: &str, path: &str) -> String {
    format!("vos://{}/{}", authority, path.trim_start_matches('/'))
}

/// Uploads are the only transfers negotiated; reads go to the files endpoint.
const PUSH_DIRECTION: &str = "pushToVoSpace";
const HTTPS_PUT_PROTOCOL: &str = "ivo://ivoa.net/vospace/core#httpsput";

/// Push transfer-intent document for `target_uri`.
pub fn transfer_document(target_uri: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            "\n",
            r#"<vos:transfer xmlns:vos="{ns}" version="2.1">"#,
            "<vos:target>{target}</vos:target>",
            "<vos:direction>{direction}</vos:direction>",
            r#"<vos:protocol uri="{protocol}"/>"#,
            "</vos:transfer>"
        ),
        ns = VOSPACE_NS,
        target = xml_escape(target_uri),
        direction = PUSH_DIRECTION,
        protocol = HTTPS_PUT_PROTOCOL,
    )
}

/// Node creation document for a data or container node at `node_uri`.
pub fn node_document(node_uri: &str, kind: NodeKind) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            "\n",
            r#"<vos:node xmlns:vos="{ns}" xmlns:xsi="{xsi}" xsi:type="{kind}" uri="{uri}"/>"#
        ),
        ns = VOSPACE_NS,
        xsi = XSI_NS,
        kind = kind.xsi_type(),
        uri = xml_escape(node_uri),
    )
}

/// Read phase, `transferDetails` link and error message from a job document.
pub fn parse_job(xml: &str) -> RaftResult<TransferJob> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut phase = None;
    let mut transfer_details_url = None;
    let mut error_message = None;
    let mut current: Option<Vec<u8>> = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                if e.local_name().as_ref() == b"result" && transfer_details_url.is_none() {
                    transfer_details_url = transfer_details_href(&e)?;
                }
                current = Some(e.local_name().as_ref().to_vec());
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"result" && transfer_details_url.is_none() {
                    transfer_details_url = transfer_details_href(&e)?;
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(malformed)?;
                match current.as_deref() {
                    Some(b"phase") if phase.is_none() => phase = Some(text.trim().to_string()),
                    Some(b"message") if error_message.is_none() => {
                        error_message = Some(text.trim().to_string())
                    }
                    _ => {}
                }
            }
            Event::End(_) => current = None,
            Event::Eof => break,
            _ => {}
        }
    }

    let phase = phase.ok_or_else(|| malformed("job document has no phase element"))?;
    Ok(TransferJob {
        phase: JobPhase::from_wire(&phase),
        transfer_details_url,
        error_message,
    })
}

/// Read the negotiated endpoint from a transfer document.
///
/// Only an `endpoint` nested in a `protocol` element counts; the first
/// non-empty one wins.
pub fn parse_endpoint(xml: &str) -> RaftResult<Option<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut protocol_depth = 0usize;
    let mut in_endpoint = false;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"protocol" => protocol_depth += 1,
                b"endpoint" if protocol_depth > 0 => in_endpoint = true,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"protocol" => protocol_depth = protocol_depth.saturating_sub(1),
                b"endpoint" => in_endpoint = false,
                _ => {}
            },
            Event::Text(t) if in_endpoint => {
                let text = t.unescape().map_err(malformed)?;
                let text = text.trim();
                if !text.is_empty() {
                    return Ok(Some(text.to_string()));
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Href of a `result` element whose id is `transferDetails`.
fn transfer_details_href(element: &BytesStart<'_>) -> RaftResult<Option<String>> {
    let mut id = None;
    let mut href = None;
    for attr in element.attributes() {
        let attr = attr.map_err(malformed)?;
        let value = attr.unescape_value().map_err(malformed)?;
        match attr.key.local_name().as_ref() {
            b"id" => id = Some(value.into_owned()),
            b"href" => href = Some(value.into_owned()),
            _ => {}
        }
    }
    Ok(match id.as_deref() {
        Some(TRANSFER_DETAILS_ID) => href,
        _ => None,
    })
}

fn malformed(err: impl fmt::Display) -> RaftError {
    RaftError::MalformedDocument(err.to_string())
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
