//! # Event Log
//!
//! Append-only JSONL audit trail for a research run. Each entry is one
//! JSON line flushed to the OS before the append returns; the
//! checkpoint store is responsible for fsync durability. Provenance is
//! reconstructible by following `parent_id` links.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Kind of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NodeEnter,
    NodeExit,
    Error,
    BudgetTick,
    TierChange,
    CheckpointWritten,
}

/// A single event in the run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub step_id: String,
    #[serde(default)]
    pub parent_id: String,
    pub event: EventKind,
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(event: EventKind, node: &str) -> Self {
        Self {
            ts: Utc::now(),
            step_id: generate_step_id(node),
            parent_id: String::new(),
            event,
            node: node.to_string(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_step(mut self, step_id: &str) -> Self {
        self.step_id = step_id.to_string();
        self
    }

    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.parent_id = parent_id.to_string();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Generate a unique step identifier with the node name as prefix.
pub fn generate_step_id(node: &str) -> String {
    let suffix = rand::random::<u32>();
    if node.is_empty() {
        format!("step-{suffix:08x}")
    } else {
        format!("{node}-{suffix:08x}")
    }
}

/// Append-only JSONL event logger for one run.
pub struct EventLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl EventLog {
    /// Open (or create) the log file in append mode.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open event log: {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a single event, flushed before returning.
    pub fn append(&self, event: &Event) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|e| anyhow::anyhow!("event log lock poisoned: {e}"))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        tracing::debug!(
            event = ?event.event,
            step_id = %event.step_id,
            node = %event.node,
            "event_logged"
        );
        Ok(())
    }

    /// Read all events in chronological (append) order.
    pub fn read_events(&self) -> Result<Vec<Event>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let mut events = Vec::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                events.push(serde_json::from_str(trimmed)?);
            }
        }
        Ok(events)
    }

    /// Walk `parent_id` links backward from a step, returning the chain
    /// root-first. Each step is represented by its first logged event.
    pub fn provenance_chain(&self, step_id: &str) -> Result<Vec<Event>> {
        let all = self.read_events()?;

        let mut chain = Vec::new();
        let mut current = step_id.to_string();
        let mut visited = std::collections::HashSet::new();

        while !current.is_empty() && visited.insert(current.clone()) {
            let Some(event) = all.iter().find(|e| e.step_id == current) else {
                break;
            };
            chain.push(event.clone());
            current = event.parent_id.clone();
        }

        chain.reverse();
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_id_prefix() {
        let id = generate_step_id("search");
        assert!(id.starts_with("search-"));
        assert_ne!(generate_step_id("search"), id);
    }

    #[test]
    fn test_append_and_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path().join("events.jsonl")).unwrap();

        log.append(&Event::new(EventKind::NodeEnter, "plan")).unwrap();
        log.append(
            &Event::new(EventKind::NodeExit, "plan").with_payload(json!({"subtopics": 3})),
        )
        .unwrap();

        let events = log.read_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, EventKind::NodeEnter);
        assert_eq!(events[1].payload["subtopics"], 3);
        // Timestamps are monotone within a single appender.
        assert!(events[0].ts <= events[1].ts);
    }

    #[test]
    fn test_provenance_chain_follows_parents() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path().join("events.jsonl")).unwrap();

        log.append(&Event::new(EventKind::NodeEnter, "plan").with_step("plan-1"))
            .unwrap();
        log.append(
            &Event::new(EventKind::NodeEnter, "search")
                .with_step("search-1")
                .with_parent("plan-1"),
        )
        .unwrap();
        log.append(
            &Event::new(EventKind::NodeEnter, "scrape")
                .with_step("scrape-1")
                .with_parent("search-1"),
        )
        .unwrap();

        let chain = log.provenance_chain("scrape-1").unwrap();
        let steps: Vec<&str> = chain.iter().map(|e| e.step_id.as_str()).collect();
        assert_eq!(steps, vec!["plan-1", "search-1", "scrape-1"]);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::CheckpointWritten).unwrap();
        assert_eq!(json, "\"checkpoint_written\"");
    }
}
