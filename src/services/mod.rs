//! Services of the submission core: the pure review workflow, the transfer
//! protocol client, attachment resolution and record persistence.

pub mod attachment_service;
pub mod credentials;
pub mod record_client;
pub mod submission_service;
pub mod transfer_service;
pub mod vospace_xml;
pub mod workflow;
