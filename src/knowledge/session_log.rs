//! Single-slot record linking a session-start injection to its session-end
//! scoring. Last writer wins; no history is kept.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::write_core::{AtomicWriter, WriteOptions};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    pub session_id: Option<String>,
    /// RFC3339, UTC
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_head_at_start: Option<String>,
    #[serde(default)]
    pub injected_cards: Vec<String>,
}

impl SessionLog {
    /// Pending until the session-end scorer consumes it.
    pub fn is_pending(&self) -> bool {
        !self.injected_cards.is_empty()
    }

    /// Missing or corrupt log is treated as empty.
    pub fn load(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize session log")?;
        AtomicWriter::new(WriteOptions::fast())
            .write_str(path, &format!("{json}\n"))
            .with_context(|| format!("Failed to write session log {}", path.display()))?;
        Ok(())
    }

    pub fn clear(path: &Path) -> Result<()> {
        SessionLog::default().save(path)
    }
}
