use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const APPLICATION_LOG_FILE: &str = "application_log.csv";
const HEADER: [&str; 4] = ["Timestamp", "JobTitle", "Company", "Status"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Skipped,
    AiResumeFailed,
    AiCoverLetterFailed,
    AppliedSuccessfully,
    ApplicationFailed,
    CriticalFailure,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Skipped => "SKIPPED",
            JobStatus::AiResumeFailed => "AI_RESUME_FAILED",
            JobStatus::AiCoverLetterFailed => "AI_COVER_LETTER_FAILED",
            JobStatus::AppliedSuccessfully => "APPLIED_SUCCESSFULLY",
            JobStatus::ApplicationFailed => "APPLICATION_FAILED",
            JobStatus::CriticalFailure => "CRITICAL_FAILURE",
        })
    }
}

/// Append-only CSV record of every processed job.
#[derive(Debug, Clone)]
pub struct ApplicationLog {
    path: PathBuf,
}

impl ApplicationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, title: &str, company: &str, status: JobStatus) -> Result<()> {
        self.record_at(Local::now(), title, company, status)
    }

    pub fn record_at(
        &self,
        at: DateTime<Local>,
        title: &str,
        company: &str,
        status: JobStatus,
    ) -> Result<()> {
        let is_new = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer.write_record(HEADER).context("writing log header")?;
        }
        let timestamp = at.format("%Y-%m-%d %H:%M:%S%.6f").to_string();
        let status = status.to_string();
        writer
            .write_record([timestamp.as_str(), title, company, status.as_str()])
            .context("writing log record")?;
        writer.flush().context("flushing application log")?;
        debug!(%title, %company, %status, "logged");
        Ok(())
    }
}
