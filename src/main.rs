use raft_portal_core::{
    config::{AppConfig, Command, Decision},
    errors::{RaftError, RaftResult},
    models::{
        attachment::AttachmentField,
        record::SubmissionRecord,
    },
    services::{
        attachment_service::attachment_path,
        submission_service::{PersistReceipt, SubmissionOrchestrator},
        workflow::ReviewAction,
    },
};
use serde::Serialize;
use std::process::ExitCode;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config + command ---
    let (cfg, command) = match AppConfig::from_env_and_args() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("CONFIG_ERROR: {:#}", err);
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!("Starting raftctl with config: {:?}", cfg);

    match run(&cfg, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}: {}", err.code(), err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: &AppConfig, command: Command) -> RaftResult<()> {
    let orchestrator = SubmissionOrchestrator::from_config(cfg)?;

    match command {
        Command::Show { id } => {
            let record = orchestrator.load(&id).await?;
            print_json(&record)?;
        }

        Command::Submit { id } => {
            let record = orchestrator.load(&id).await?;
            let receipt = orchestrator.save(&record, false).await?;
            print_receipt(&receipt);
        }

        Command::Claim { id, reviewer } => {
            let record = orchestrator.load(&id).await?;
            let receipt = orchestrator.claim_review(&record, &reviewer).await?;
            print_receipt(&receipt);
        }

        Command::Release { id, reviewer } => {
            let record = orchestrator.load(&id).await?;
            let receipt = orchestrator.release_review(&record, &reviewer).await?;
            print_receipt(&receipt);
        }

        Command::Review { id, decision } => {
            let record = orchestrator.load(&id).await?;
            let receipt = orchestrator.apply(&record, action_for(decision)).await?;
            print_receipt(&receipt);
        }

        Command::Delete { id } => {
            let record = orchestrator.load(&id).await?;
            orchestrator.delete(&record).await?;
            println!("{} deleted", id);
        }

        Command::Upload {
            id,
            file,
            name,
            mime,
            field,
        } => {
            let record = orchestrator.load(&id).await?;
            let reference = match field.as_deref() {
                Some(field) => {
                    let field = lookup_field(field)?;
                    let (reference, receipt) = orchestrator
                        .attach_file(&record, field, &file, name.as_deref(), mime.as_deref())
                        .await?;
                    print_warnings(&receipt);
                    reference
                }
                None => {
                    let dir = data_directory(&orchestrator, &record)?;
                    orchestrator
                        .attachments()
                        .upload_file(&dir, &file, name.as_deref(), mime.as_deref())
                        .await?
                }
            };
            print_json(&reference)?;
        }

        Command::Fetch {
            id,
            field,
            name,
            output,
        } => {
            let record = orchestrator.load(&id).await?;
            match (field, name) {
                (Some(field), _) => {
                    let field = lookup_field(&field)?;
                    let value = record.attachment(field)?;
                    let content = orchestrator
                        .attachments()
                        .resolve(value.as_ref(), record.data_directory.as_deref())
                        .await?;
                    let bytes = content.map(|c| c.bytes).unwrap_or_default();
                    match output.as_deref() {
                        Some(path) => tokio::fs::write(path, &bytes).await?,
                        None => write_all(&mut tokio::io::stdout(), &bytes).await?,
                    }
                }
                (None, Some(name)) => {
                    let dir = data_directory(&orchestrator, &record)?;
                    let path = attachment_path(&dir, &name);
                    let transfer = orchestrator.attachments().transfer();
                    let written = match output.as_deref() {
                        Some(local) => {
                            let mut file = tokio::fs::File::create(local).await?;
                            transfer.download_to(&path, &mut file).await?
                        }
                        None => transfer.download_to(&path, &mut tokio::io::stdout()).await?,
                    };
                    tracing::info!("fetched {} ({} bytes)", path, written);
                }
                (None, None) => {
                    return Err(RaftError::InvalidAttachment(
                        "pass --field or --name to choose what to fetch".into(),
                    ));
                }
            }
        }

        Command::Remove { id, field } => {
            let record = orchestrator.load(&id).await?;
            let field = lookup_field(&field)?;
            let (outcome, receipt) = orchestrator.detach(&record, field).await?;

            if let Some(warning) = outcome.warning {
                eprintln!(
                    "warning: {} was cleared but not deleted: {} ({})",
                    warning.filename,
                    warning.error,
                    warning.error.code()
                );
            }
            print_receipt(&receipt);
        }
    }

    Ok(())
}

fn action_for(decision: Decision) -> ReviewAction {
    match decision {
        Decision::Approve => ReviewAction::Approve,
        Decision::Reject => ReviewAction::Reject,
        Decision::Revise => ReviewAction::RequestRevision,
        Decision::Publish => ReviewAction::Publish,
        Decision::Reopen => ReviewAction::Reopen,
        Decision::AllowRevision => ReviewAction::AllowRevision,
    }
}

fn lookup_field(name: &str) -> RaftResult<&'static AttachmentField> {
    AttachmentField::by_name(name)
        .ok_or_else(|| RaftError::InvalidAttachment(format!("unknown attachment field `{}`", name)))
}

fn data_directory(
    orchestrator: &SubmissionOrchestrator,
    record: &SubmissionRecord,
) -> RaftResult<String> {
    orchestrator
        .data_directory_of(record)
        .ok_or(RaftError::NotPersisted)
}

async fn write_all<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> RaftResult<()> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> RaftResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_receipt(receipt: &PersistReceipt) {
    println!(
        "{} status={} reviewer={}",
        receipt.id,
        receipt.record.status,
        receipt.record.reviewer.as_deref().unwrap_or("-")
    );
    print_warnings(receipt);
}

fn print_warnings(receipt: &PersistReceipt) {
    if let Some(error) = &receipt.incomplete {
        eprintln!(
            "warning: {} was created but not fully saved: {} ({})",
            receipt.id,
            error,
            error.code()
        );
    }
    for warning in &receipt.attachment_warnings {
        eprintln!(
            "warning: {} kept inline: {} ({})",
            warning.field,
            warning.error,
            warning.error.code()
        );
    }
}
