//! Subcommand handlers. Results go to stdout; logs go to stderr.

use std::path::Path;

use anyhow::Context as _;
use pumpsync::{DeviceReport, SyncConfig};
use pumpsync_core::{
  store::{HistoryQuery, TreatmentStore},
  treatment::TreatmentKind,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, BufReader};

use crate::Reconciler;

// ─── ingest ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct IngestSummary {
  stored:  usize,
  ignored: usize,
  failed:  usize,
}

pub async fn ingest(sync: &Reconciler, input: &Path) -> anyhow::Result<()> {
  let summary = if input == Path::new("-") {
    replay(sync, BufReader::new(tokio::io::stdin())).await?
  } else {
    let file = tokio::fs::File::open(input)
      .await
      .with_context(|| format!("failed to open {}", input.display()))?;
    replay(sync, BufReader::new(file)).await?
  };

  println!(
    "{} stored, {} ignored, {} failed",
    summary.stored, summary.ignored, summary.failed
  );
  if summary.failed > 0 {
    anyhow::bail!("{} report(s) failed", summary.failed);
  }
  Ok(())
}

async fn replay(
  sync: &Reconciler,
  reader: impl AsyncBufRead + Unpin,
) -> anyhow::Result<IngestSummary> {
  let mut summary = IngestSummary::default();
  let mut lines = reader.lines();
  let mut line_no = 0usize;

  while let Some(line) = lines.next_line().await.context("failed to read input")? {
    line_no += 1;
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }

    let report: DeviceReport = match serde_json::from_str(line) {
      Ok(report) => report,
      Err(e) => {
        tracing::error!(line = line_no, error = %e, "unreadable device report");
        println!("{line_no}: invalid report");
        summary.failed += 1;
        continue;
      }
    };

    let op = report.name();
    match sync.apply(report).await {
      Ok(true) => {
        println!("{line_no}: {op}: stored");
        summary.stored += 1;
      }
      Ok(false) => {
        println!("{line_no}: {op}: ignored");
        summary.ignored += 1;
      }
      Err(e) => {
        println!("{line_no}: {op}: failed: {e}");
        summary.failed += 1;
      }
    }
  }
  Ok(summary)
}

// ─── state / history / identity ──────────────────────────────────────────────

pub async fn state(sync: &Reconciler, config: &SyncConfig) -> anyhow::Result<()> {
  let state = sync
    .expected_pump_state(&config.profile())
    .await
    .context("failed to read pump state")?;
  println!("{}", serde_json::to_string_pretty(&state)?);
  Ok(())
}

pub async fn history(
  sync: &Reconciler,
  kinds: Vec<TreatmentKind>,
  include_invalid: bool,
  limit: Option<usize>,
) -> anyhow::Result<()> {
  let query = HistoryQuery { kinds, include_invalid, limit, ..Default::default() };
  let rows = sync
    .store()
    .history(&query)
    .await
    .context("failed to read history")?;
  println!("{}", serde_json::to_string_pretty(&rows)?);
  Ok(())
}

pub async fn identity(sync: &Reconciler) -> anyhow::Result<()> {
  match sync.guard().current().await.context("failed to read pump identity")? {
    Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
    None => println!("no pump registered"),
  }
  Ok(())
}

pub async fn connect_new_pump(sync: &Reconciler, end_running: bool) -> anyhow::Result<()> {
  sync
    .connect_new_pump(end_running)
    .await
    .context("failed to reset pump identity")?;
  tracing::info!(end_running, "ready for a new pump");
  Ok(())
}
