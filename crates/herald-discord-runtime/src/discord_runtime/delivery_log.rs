//! Append-only JSONL log of delivery runs.

use std::{
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub(super) struct DeliveryLogRecord {
    pub(super) timestamp_unix_ms: u64,
    pub(super) origin: &'static str,
    pub(super) action: &'static str,
    pub(super) attempted: usize,
    pub(super) delivered: usize,
    pub(super) failed: usize,
}

#[derive(Clone)]
pub(super) struct JsonlDeliveryLog {
    path: PathBuf,
    file: Arc<Mutex<std::fs::File>>,
}

impl JsonlDeliveryLog {
    pub(super) fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub(super) fn append(&self, record: &DeliveryLogRecord) -> Result<()> {
        let line =
            serde_json::to_string(record).context("failed to encode delivery log record")?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("delivery log mutex is poisoned"))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(())
    }
}
