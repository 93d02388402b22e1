use crate::errors::RaftResult;
use crate::services::credentials::StaticToken;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

const DEFAULT_NODES_URL: &str = "https://ws-cadc.canfar.net/vault/nodes";
const DEFAULT_SYNCTRANS_URL: &str = "https://ws-cadc.canfar.net/vault/synctrans";
const DEFAULT_FILES_URL: &str = "https://ws-cadc.canfar.net/vault/files";
const DEFAULT_AUTHORITY: &str = "cadc.nrc.ca~vault";
const DEFAULT_RECORDS_URL: &str = "https://ws-cadc.canfar.net/doi/instances";
const DEFAULT_DOI_ROOT: &str = "rafts";
const DEFAULT_COOKIE_NAME: &str = "CADC_SSO";

/// Centralized client configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Node resource base (existence probe, creation, deletion).
    pub nodes_url: String,
    /// Synchronous transfer negotiation endpoint.
    pub synctrans_url: String,
    /// Direct read endpoint for stored files.
    pub files_url: String,
    /// Authority part of `vos://` URIs.
    pub vospace_authority: String,
    /// Record persistence endpoint.
    pub records_url: String,
    /// Root container holding one folder per record.
    pub doi_root: String,
    pub cookie_name: String,
    pub token: StaticToken,
    pub job_poll_attempts: u32,
    pub job_poll_interval: Duration,
    pub request_timeout: Duration,
    pub memoize_downloads: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "RAFT submission workflow and attachment client")]
pub struct Args {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand. Each overrides its `RAFTS_*` variable.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct GlobalArgs {
    /// Node endpoint (overrides RAFTS_NODES_URL)
    #[arg(long, global = true)]
    pub nodes_url: Option<String>,

    /// Transfer negotiation endpoint (overrides RAFTS_SYNCTRANS_URL)
    #[arg(long, global = true)]
    pub synctrans_url: Option<String>,

    /// File read endpoint (overrides RAFTS_FILES_URL)
    #[arg(long, global = true)]
    pub files_url: Option<String>,

    /// Record service endpoint (overrides RAFTS_RECORDS_URL)
    #[arg(long, global = true)]
    pub records_url: Option<String>,

    /// Session token (overrides RAFTS_TOKEN)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Disable download memoization
    #[arg(long, global = true)]
    pub no_memoize: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a record as JSON
    Show { id: String },

    /// Submit a draft for review
    Submit { id: String },

    /// Claim a review-ready record
    Claim {
        id: String,
        #[arg(long)]
        reviewer: String,
    },

    /// Release a claimed record back to review-ready
    Release {
        id: String,
        #[arg(long)]
        reviewer: String,
    },

    /// Apply a reviewer or publisher decision
    Review {
        id: String,
        #[arg(value_enum)]
        decision: Decision,
    },

    /// Delete a draft record
    Delete { id: String },

    /// Upload a file into the record's data directory
    Upload {
        id: String,
        #[arg(long)]
        file: PathBuf,
        /// Remote filename (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        mime: Option<String>,
        /// Attachment field to point at the upload, e.g. `figure`
        #[arg(long)]
        field: Option<String>,
    },

    /// Fetch an attachment field or a named file
    Fetch {
        id: String,
        #[arg(long, conflicts_with = "name")]
        field: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Clear an attachment field and delete its remote file
    Remove {
        id: String,
        #[arg(long)]
        field: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
    Revise,
    Publish,
    Reopen,
    AllowRevision,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nodes_url: DEFAULT_NODES_URL.into(),
            synctrans_url: DEFAULT_SYNCTRANS_URL.into(),
            files_url: DEFAULT_FILES_URL.into(),
            vospace_authority: DEFAULT_AUTHORITY.into(),
            records_url: DEFAULT_RECORDS_URL.into(),
            doi_root: DEFAULT_DOI_ROOT.into(),
            cookie_name: DEFAULT_COOKIE_NAME.into(),
            token: StaticToken::anonymous(),
            job_poll_attempts: 3,
            job_poll_interval: Duration::from_millis(250),
            request_timeout: Duration::from_secs(30),
            memoize_downloads: true,
        }
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the requested command.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // Parse CLI once
        let args = Args::parse();
        let cfg = Self::from_sources(args.global, |key| env::var(key).ok())?;
        Ok((cfg, args.command))
    }

    /// Merge CLI overrides over values read through `lookup` over defaults.
    pub fn from_sources(
        args: GlobalArgs,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();

        // --- Environment fallback ---
        let env_string = |key: &str, default: String| lookup(key).unwrap_or(default);
        let job_poll_attempts = parse_var(&lookup, "RAFTS_JOB_POLL_ATTEMPTS", 3u32)?;
        let poll_interval_ms = parse_var(&lookup, "RAFTS_JOB_POLL_INTERVAL_MS", 250u64)?;
        let timeout_secs = parse_var(&lookup, "RAFTS_REQUEST_TIMEOUT_SECS", 30u64)?;
        let memoize = parse_var(&lookup, "RAFTS_MEMOIZE", true)?;

        // --- Merge ---
        let cfg = Self {
            nodes_url: args
                .nodes_url
                .unwrap_or_else(|| env_string("RAFTS_NODES_URL", defaults.nodes_url)),
            synctrans_url: args
                .synctrans_url
                .unwrap_or_else(|| env_string("RAFTS_SYNCTRANS_URL", defaults.synctrans_url)),
            files_url: args
                .files_url
                .unwrap_or_else(|| env_string("RAFTS_FILES_URL", defaults.files_url)),
            vospace_authority: env_string("RAFTS_VOSPACE_AUTHORITY", defaults.vospace_authority),
            records_url: args
                .records_url
                .unwrap_or_else(|| env_string("RAFTS_RECORDS_URL", defaults.records_url)),
            doi_root: env_string("RAFTS_DOI_ROOT", defaults.doi_root),
            cookie_name: env_string("RAFTS_COOKIE_NAME", defaults.cookie_name),
            token: StaticToken::from_option(args.token.or_else(|| lookup("RAFTS_TOKEN"))),
            job_poll_attempts: job_poll_attempts.max(1),
            job_poll_interval: Duration::from_millis(poll_interval_ms),
            request_timeout: Duration::from_secs(timeout_secs),
            memoize_downloads: memoize && !args.no_memoize,
        };

        Ok(cfg)
    }

    /// Shared HTTP client. Redirects are never followed: the 303 answers of
    /// the negotiation and record endpoints are interpreted by the caller.
    pub fn http_client(&self) -> RaftResult<reqwest::Client> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(self.request_timeout)
            .build()?;
        Ok(client)
    }
}

/// `{doi_root}/{id}/data`, the layout the record service creates.
pub fn data_directory(doi_root: &str, id: &str) -> String {
    format!("{}/{}/data", doi_root.trim_matches('/'), id)
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}
