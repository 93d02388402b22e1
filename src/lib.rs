//! Core of the RAFT submission portal: review lifecycle rules, negotiated
//! attachment transfers against a VOSpace store, and record persistence.

pub mod config;
pub mod errors;
pub mod models;
pub mod services;

pub use errors::{RaftError, RaftResult};
