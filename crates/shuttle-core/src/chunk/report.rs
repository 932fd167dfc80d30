//! Table report output: a header row once, then one CSV row per unit.
//!
//! Rows are written to `<file>.partial` and renamed into place on finalize, so
//! a failed run never leaves a file that looks complete.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use super::{ChunkSink, JobPlan, JobPlanner, PlanError, SinkError, UnitRange};
use crate::domain::TaskId;

pub const DEFAULT_REPORT_ROWS: u64 = 86_400;

const HEADER: &str = "Name,Email,Country,Name,Email,Country\n";
const ROW: &str = "Castille,castille@example.com,Spain,David,david@example.com,Sweden\n";

/// Rows rendered per write, whatever the chunk size.
const ROWS_PER_WRITE: u64 = 1_024;

pub struct TableReportSink {
    path: PathBuf,
    partial_path: PathBuf,
    writer: BufWriter<File>,
    rows: u64,
    chunks: u64,
}

impl TableReportSink {
    /// Open `<path>.partial` for writing.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let partial_path = partial_path_for(&path);
        let file = File::create(&partial_path).await?;
        Ok(Self {
            path,
            partial_path,
            writer: BufWriter::new(file),
            rows: 0,
            chunks: 0,
        })
    }
}

fn partial_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

#[async_trait]
impl ChunkSink for TableReportSink {
    async fn append(&mut self, chunk: UnitRange) -> Result<(), SinkError> {
        if self.chunks == 0 {
            self.writer.write_all(HEADER.as_bytes()).await?;
        }
        let mut remaining = chunk.len();
        while remaining > 0 {
            let rows = remaining.min(ROWS_PER_WRITE);
            self.writer
                .write_all(ROW.repeat(rows as usize).as_bytes())
                .await?;
            remaining -= rows;
        }

        self.rows += chunk.len();
        self.chunks += 1;
        Ok(())
    }

    async fn finalize(mut self: Box<Self>) -> Result<serde_json::Value, SinkError> {
        if self.chunks == 0 {
            self.writer.write_all(HEADER.as_bytes()).await?;
        }
        self.writer.flush().await?;
        self.writer.get_ref().sync_all().await?;
        fs::rename(&self.partial_path, &self.path).await?;
        debug!(path = %self.path.display(), rows = self.rows, "report written");

        Ok(json!({
            "path": self.path.display().to_string(),
            "rows": self.rows,
            "chunks": self.chunks,
        }))
    }

    async fn discard(self: Box<Self>) {
        let Self {
            writer,
            partial_path,
            ..
        } = *self;
        drop(writer);
        if let Err(e) = fs::remove_file(&partial_path).await {
            warn!(path = %partial_path.display(), error = %e, "failed to remove partial report");
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReportRequest {
    rows: Option<u64>,
    name: Option<String>,
}

/// Plans one table report per task inside `output_dir`.
///
/// Payload: `{"rows": <u64>, "name": "<file name>"}`, both optional. Any
/// non-object payload (a bare string label, `null`) gets the defaults:
/// 86400 rows written to `<task id>.csv`.
#[derive(Debug, Clone)]
pub struct ReportPlanner {
    output_dir: PathBuf,
    default_rows: u64,
}

impl ReportPlanner {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            default_rows: DEFAULT_REPORT_ROWS,
        }
    }

    pub fn with_default_rows(mut self, rows: u64) -> Self {
        self.default_rows = rows;
        self
    }

    fn parse(payload: &serde_json::Value) -> Result<ReportRequest, PlanError> {
        match payload {
            serde_json::Value::Object(_) => serde_json::from_value(payload.clone())
                .map_err(|e| PlanError::InvalidPayload(e.to_string())),
            _ => Ok(ReportRequest::default()),
        }
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

#[async_trait]
impl JobPlanner for ReportPlanner {
    async fn plan(
        &self,
        task_id: TaskId,
        payload: &serde_json::Value,
    ) -> Result<JobPlan, PlanError> {
        let request = Self::parse(payload)?;
        let file_name = match request.name {
            Some(name) if is_plain_file_name(&name) => name,
            Some(name) => {
                return Err(PlanError::InvalidPayload(format!(
                    "name must be a plain file name, got {name:?}"
                )));
            }
            None => format!("{task_id}.csv"),
        };

        let sink = TableReportSink::create(self.output_dir.join(file_name)).await?;
        Ok(JobPlan {
            total_units: request.rows.unwrap_or(self.default_rows),
            sink: Box::new(sink),
        })
    }
}
