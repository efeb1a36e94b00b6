//! History command implementation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use wta_core::{ExportEnd, ExportSummary, SessionConfig, SessionEvent};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_history_json, format_history_text};
use crate::util::{connect, open_session, write_output};

/// Arguments for the history command.
pub struct HistoryArgs<'a> {
    pub device: String,
    pub all: bool,
    pub timeout: Duration,
    pub config: SessionConfig,
    pub format: OutputFormat,
    pub output: Option<&'a PathBuf>,
    pub quiet: bool,
    pub opts: &'a FormatOptions,
}

pub async fn cmd_history(args: HistoryArgs<'_>) -> Result<()> {
    let HistoryArgs {
        device,
        all,
        timeout,
        config,
        format,
        output,
        quiet,
        opts,
    } = args;

    let session = open_session(config).await?;
    connect(&session, &device, timeout, quiet).await?;

    let mut events = session.subscribe();
    session.request_history().await?;
    if !quiet {
        eprintln!("Downloading history...");
    }

    // The session's export timeout guarantees an ExportFinished event.
    let finished: Option<(ExportEnd, ExportSummary)> = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break None,
            event = events.recv() => match event {
                Ok(SessionEvent::ExportFinished { reason, summary }) => break Some((reason, summary)),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break None,
            }
        }
    };

    let history = if all {
        session.history().to_vec()
    } else {
        session.recent_history(OffsetDateTime::now_utc())
    };
    session.shutdown().await;

    let Some((reason, summary)) = finished else {
        bail!("History download interrupted");
    };
    match reason {
        ExportEnd::Aborted => bail!("Connection lost during history download"),
        ExportEnd::RequestFailed => bail!("Failed to send the history request to the controller"),
        ExportEnd::Timeout => eprintln!(
            "Warning: controller did not signal the end of its log; showing what was received."
        ),
        ExportEnd::Sentinel => {}
    }

    if !quiet {
        eprintln!(
            "Downloaded {} entries ({} duplicates, {} malformed).",
            summary.accepted, summary.duplicates, summary.malformed
        );
    }

    let content = match format {
        OutputFormat::Json => format_history_json(&history, reason, &summary, opts)?,
        OutputFormat::Text => format_history_text(&history, opts),
    };
    write_output(output, &content)
}
