//! Timing Ledger (C8): an in-memory ordered list of step durations, flushed
//! on process exit when enabled. See SPEC_FULL.md §4.8, §9.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::warn;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct TimingRecord {
    pub tag: String,
    pub absolute_secs: f64,
    pub delta_since_previous: f64,
    pub delta_since_matching_start: f64,
}

fn sanitize(tag: &str) -> String {
    let re = Regex::new(r"[^a-zA-Z0-9_]+").expect("valid regex");
    re.replace_all(tag, "_").into_owned()
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

/// Process-wide ordered list of timing records. Not a process-global
/// singleton: threaded explicitly through the orchestrator as part of the
/// session context (§9), constructed once at process start.
pub struct TimingLedger {
    start_wall: f64,
    records: Vec<TimingRecord>,
    enabled: bool,
}

impl Default for TimingLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingLedger {
    pub fn new() -> Self {
        let mut ledger = TimingLedger {
            start_wall: now_secs(),
            records: Vec::new(),
            enabled: false,
        };
        let start_wall = ledger.start_wall;
        ledger.records.push(TimingRecord {
            tag: "gdt_start".to_string(),
            absolute_secs: start_wall,
            delta_since_previous: 0.0,
            delta_since_matching_start: -1.0,
        });
        ledger
    }

    /// Enables the flush-on-exit behavior; unset by default.
    pub fn enable_flush(&mut self) {
        self.enabled = true;
    }

    pub fn flush_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a timing sample. Tags ending in `_end` resolve
    /// `delta_since_matching_start` by scanning backward for the most
    /// recent record whose tag equals the same name with `_end` replaced
    /// by `_start`; `-1` when no match exists.
    pub fn push(&mut self, tag: &str) {
        let tag = sanitize(tag);
        let now = now_secs();
        let delta_since_previous = self
            .records
            .last()
            .map(|r| now - r.absolute_secs)
            .unwrap_or(0.0);

        let delta_since_matching_start = if let Some(base) = tag.strip_suffix("_end") {
            let start_tag = format!("{base}_start");
            self.records
                .iter()
                .rev()
                .find(|r| r.tag == start_tag)
                .map(|r| now - r.absolute_secs)
                .unwrap_or(-1.0)
        } else {
            -1.0
        };

        self.records.push(TimingRecord {
            tag,
            absolute_secs: now,
            delta_since_previous,
            delta_since_matching_start,
        });
    }

    pub fn records(&self) -> &[TimingRecord] {
        &self.records
    }

    /// Fixed dump path, per §4.8 and the open question in DESIGN.md: this
    /// assumes a writable `/var/log/deploy` and is not reconfigurable.
    fn dump_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "/var/log/deploy/timing_gdt-{}.txt",
            self.start_wall as i64
        ))
    }

    /// Writes the ledger to the fixed dump path if flushing was enabled.
    /// I/O errors are warned, never fatal — the timing dump is diagnostic,
    /// not load-bearing.
    pub fn flush(&self, invocation_args: &[String]) {
        if !self.enabled {
            return;
        }
        let path = self.dump_path();
        let mut out = format!("# {}\n", invocation_args.join(" "));
        for record in &self.records {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                record.tag,
                record.absolute_secs,
                record.delta_since_previous,
                record.delta_since_matching_start
            ));
        }
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("could not create timing dump directory {}: {e}", parent.display());
                return;
            }
        }
        if let Err(e) = fs::write(&path, out) {
            warn!("could not write timing dump to {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sanitize_replaces_non_word_chars() {
        assert_eq!(sanitize("action-start"), "action_start");
        assert_eq!(sanitize("a.b/c"), "a_b_c");
    }

    #[test]
    fn test_first_record_is_synthetic_start() {
        let ledger = TimingLedger::new();
        assert_eq!(ledger.records()[0].tag, "gdt_start");
        assert_eq!(ledger.records()[0].delta_since_matching_start, -1.0);
    }

    #[test]
    fn test_end_resolves_delta_since_matching_start() {
        let mut ledger = TimingLedger::new();
        ledger.push("action_start");
        std::thread::sleep(Duration::from_millis(5));
        ledger.push("action_end");
        let last = ledger.records().last().unwrap();
        assert_eq!(last.tag, "action_end");
        assert!(last.delta_since_matching_start >= 0.0);
    }

    #[test]
    fn test_end_without_matching_start_is_negative_one() {
        let mut ledger = TimingLedger::new();
        ledger.push("orphan_end");
        let last = ledger.records().last().unwrap();
        assert_eq!(last.delta_since_matching_start, -1.0);
    }

    #[test]
    fn test_flush_noop_when_disabled() {
        let ledger = TimingLedger::new();
        assert!(!ledger.flush_enabled());
        // No assertion beyond "does not panic": flush must be a no-op
        // without a writable /var/log/deploy in the test sandbox.
        ledger.flush(&["git-deploy".to_string(), "start".to_string()]);
    }

    #[test]
    fn test_enable_flush_sets_flag() {
        let mut ledger = TimingLedger::new();
        assert!(!ledger.flush_enabled());
        ledger.enable_flush();
        assert!(ledger.flush_enabled());
    }
}
