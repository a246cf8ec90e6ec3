//! recsink-ingest - run one ingestion invocation from an event document

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recsink_common::logging::{init_logging, LogConfig, LogLevel};
use recsink_ingest::{
    config::Config,
    context::AppContext,
    dispatch::InvocationReport,
    events::{ObjectNotificationEvent, QueueMessageEvent},
    store::MemoryStore,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "recsink-ingest")]
#[command(author, version, about = "Load S3 and SQS event payloads into DynamoDB")]
struct Cli {
    #[command(subcommand)]
    trigger: Trigger,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write to an in-memory table instead of DynamoDB
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Trigger {
    /// Ingest CSV objects named by an S3 notification event
    Objects {
        /// Event JSON file, or "-" for stdin
        #[arg(short, long, default_value = "-")]
        event: PathBuf,
    },

    /// Ingest JSON records from an SQS event
    Messages {
        /// Event JSON file, or "-" for stdin
        #[arg(short, long, default_value = "-")]
        event: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("recsink-ingest")
        .filter_directives("aws_smithy_runtime=warn,aws_config=warn,hyper=warn")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = Config::from_env().context("Invalid configuration")?;
    let timeout = config.invocation_timeout();
    let table = config.table.clone();

    let mut context = AppContext::initialize(config).await;
    let dry_run_store = cli.dry_run.then(|| Arc::new(MemoryStore::new()));
    if let Some(store) = &dry_run_store {
        info!(table = %table, "Dry run: records go to an in-memory table");
        context = context.with_store(store.clone());
    }
    let dispatcher = context.dispatcher();

    let invocation = async {
        match &cli.trigger {
            Trigger::Objects { event } => {
                let event: ObjectNotificationEvent = read_event(event)?;
                Ok::<_, anyhow::Error>(dispatcher.handle_object_notifications(&event).await?)
            },
            Trigger::Messages { event } => {
                let event: QueueMessageEvent = read_event(event)?;
                Ok::<_, anyhow::Error>(dispatcher.handle_queue_messages(&event).await?)
            },
        }
    };

    let report: InvocationReport = match timeout {
        Some(limit) => tokio::time::timeout(limit, invocation)
            .await
            .with_context(|| format!("Invocation exceeded its {:?} deadline", limit))??,
        None => invocation.await?,
    };

    summarize(&report);

    if let Some(store) = dry_run_store {
        for record in store.records(&table).await {
            debug!(
                id = %record.id,
                name = record.name.as_deref(),
                email = record.email.as_deref(),
                "Dry run record"
            );
        }
    }
    Ok(())
}

fn read_event<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file {}", path.display()))?
    };

    serde_json::from_str(&raw).context("Event is not a valid trigger payload")
}

fn summarize(report: &InvocationReport) {
    if let Some(write) = &report.write {
        for failure in &write.failures {
            warn!(
                chunk = failure.chunk_index(),
                ids = ?failure.ids(),
                error = %failure,
                "Records not persisted"
            );
        }
    }

    info!(
        trigger = %report.trigger,
        sub_events = report.sub_events.len(),
        failed_sub_events = report.source_failures().count(),
        records = report.records,
        written = report.written(),
        dropped = report.dropped_records(),
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "Ingestion complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_event_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"Records":[{{"s3":{{"bucket":{{"name":"uploads"}},"object":{{"key":"a+b.csv"}}}}}}]}}"#
        )
        .unwrap();

        let event: ObjectNotificationEvent = read_event(file.path()).unwrap();
        assert_eq!(event.records.len(), 1);
        assert_eq!(event.records[0].s3.bucket.name, "uploads");
    }

    #[test]
    fn test_read_event_rejects_wrong_shape() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"Records":[{{"s3":{{}}}}]}}"#).unwrap();

        assert!(read_event::<ObjectNotificationEvent>(file.path()).is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["recsink-ingest", "messages", "--event", "ev.json", "--dry-run"]).unwrap();
        assert!(cli.dry_run);
        assert!(matches!(cli.trigger, Trigger::Messages { ref event } if event == Path::new("ev.json")));
    }
}
