//! JSONL snapshots of an event log.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use super::{Event, EventLog};
use crate::error::Result;

/// Write events to `path`, one JSON object per line.
pub fn write_jsonl(path: impl AsRef<Path>, events: &[Event]) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    for event in events {
        writeln!(writer, "{}", serde_json::to_string(event)?)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read an ordered event sequence back from a JSONL snapshot.
pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<Event>> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            events.push(serde_json::from_str(&line)?);
        }
    }
    Ok(events)
}

impl EventLog {
    /// Snapshot the whole log to a JSONL file.
    pub fn write_jsonl(&self, path: impl AsRef<Path>) -> Result<()> {
        write_jsonl(path, &self.get_all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_snapshot_restores_order_and_payloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let log = EventLog::new();
        log.append(EventKind::UserInput, json!({"content": "open the settings"}));
        log.append(
            EventKind::ToolCallRequest,
            json!({"call_id": "c1", "tool_name": "click", "arguments": {"x": 1}}),
        );
        log.append(EventKind::AssistantMessage, json!({"content": "done", "final": true}));
        log.write_jsonl(&path).unwrap();

        let restored = read_jsonl(&path).unwrap();
        assert_eq!(restored, log.get_all());
        assert!(restored[2].is_final_answer());
    }

    #[test]
    fn test_read_skips_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let log = EventLog::new();
        log.append(EventKind::System, json!({"status": "executing"}));
        let line = serde_json::to_string(&log.get_all()[0]).unwrap();
        std::fs::write(&path, format!("{}\n\n{}\n", line, "   ")).unwrap();

        assert_eq!(read_jsonl(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = read_jsonl(dir.path().join("nope.jsonl")).unwrap_err();
        assert!(matches!(err, crate::error::ActloopError::Io(_)));
    }
}
