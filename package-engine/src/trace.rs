//! Per-request execution trace.
//!
//! A [`Tracer`] collects a tree of timestamped sections while a request runs.
//! Sections are opened with [`Tracer::begin_section`] and must be ended on
//! every exit path; the returned [`Section`] guard ends itself on drop as a
//! backstop. The collected records render to the request's stdout/stderr
//! streams and serialize for reporting and for the durable trace buffer that
//! survives a reboot mid-transition.
//!
//! The tracer is single-threaded per request; interior mutability keeps the
//! sections appendable while collaborators hold shared references.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error};

/// One section of the request trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub operation: String,
    #[serde(default)]
    pub depth: usize,
    pub start: u64,
    #[serde(default)]
    pub stop: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub exit_code: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub info_out: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub debug_out: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_out: String,
}

#[derive(Default)]
struct TracerInner {
    prior: Vec<TraceRecord>,
    records: Vec<TraceRecord>,
    open: Vec<usize>,
}

#[derive(Default)]
pub struct Tracer {
    inner: RefCell<TracerInner>,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new section nested under the currently open one.
    pub fn begin_section(&self, operation: &str) -> Section<'_> {
        let mut inner = self.inner.borrow_mut();
        let depth = inner.open.len();
        debug!(operation, depth, "trace section started");
        let idx = inner.records.len();
        inner.records.push(TraceRecord {
            operation: operation.to_string(),
            depth,
            start: unix_now(),
            stop: 0,
            error: None,
            exit_code: 0,
            info_out: String::new(),
            debug_out: String::new(),
            error_out: String::new(),
        });
        inner.open.push(idx);
        Section {
            tracer: self,
            idx,
            ended: false,
        }
    }

    /// Records an error on the innermost open section (or a synthetic root
    /// section when none is open).
    pub fn error_current(&self, err: &dyn Display) {
        let idx = self.current_idx();
        self.with_record(idx, |record| {
            error!(operation = %record.operation, "{err}");
            record.error = Some(match record.error.take() {
                Some(prior) => format!("{prior}; {err}"),
                None => err.to_string(),
            });
        });
    }

    /// Appends an info message to the innermost open section.
    pub fn info_current(&self, message: &str) {
        let idx = self.current_idx();
        self.with_record(idx, |record| append_line(&mut record.info_out, message));
    }

    /// Loads records persisted by a previous invocation (e.g. before a
    /// reboot); they are reported ahead of the current invocation's records
    /// so the report covers the whole transition.
    pub fn load_prior(&self, prior: Vec<TraceRecord>) {
        self.inner.borrow_mut().prior = prior;
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        let inner = self.inner.borrow();
        let mut records = inner.prior.clone();
        records.extend(inner.records.iter().cloned());
        records
    }

    /// Start timestamp of the earliest recorded section.
    pub fn earliest_start(&self) -> u64 {
        let inner = self.inner.borrow();
        inner
            .prior
            .iter()
            .chain(inner.records.iter())
            .map(|record| record.start)
            .min()
            .unwrap_or_default()
    }

    /// Renders the trace to the request (stdout, stderr) streams.
    pub fn render(&self) -> (String, String) {
        let records = self.records();
        let mut stdout = String::new();
        let mut stderr = String::new();
        for record in &records {
            let indent = "  ".repeat(record.depth);
            for line in record.info_out.lines() {
                stdout.push_str(&format!("{indent}{line}\n"));
            }
            if let Some(err) = &record.error {
                stderr.push_str(&format!("{indent}{}: {err}\n", record.operation));
            }
            for line in record.error_out.lines() {
                stderr.push_str(&format!("{indent}{line}\n"));
            }
        }
        (stdout, stderr)
    }

    fn current_idx(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        match inner.open.last() {
            Some(idx) => *idx,
            None => {
                let idx = inner.records.len();
                inner.records.push(TraceRecord {
                    operation: "request".to_string(),
                    depth: 0,
                    start: unix_now(),
                    stop: 0,
                    error: None,
                    exit_code: 0,
                    info_out: String::new(),
                    debug_out: String::new(),
                    error_out: String::new(),
                });
                inner.open.push(idx);
                idx
            }
        }
    }

    fn with_record(&self, idx: usize, f: impl FnOnce(&mut TraceRecord)) {
        let mut inner = self.inner.borrow_mut();
        if let Some(record) = inner.records.get_mut(idx) {
            f(record);
        }
    }
}

/// Guard over one open trace section. Ends the section on drop if it was not
/// ended explicitly.
pub struct Section<'t> {
    tracer: &'t Tracer,
    idx: usize,
    ended: bool,
}

impl Section<'_> {
    pub fn append_info(&self, message: &str) -> &Self {
        self.tracer.with_record(self.idx, |record| {
            append_line(&mut record.info_out, message);
        });
        self
    }

    pub fn append_debug(&self, message: &str) -> &Self {
        self.tracer.with_record(self.idx, |record| {
            debug!(operation = %record.operation, "{message}");
            append_line(&mut record.debug_out, message);
        });
        self
    }

    pub fn append_error(&self, message: &str) -> &Self {
        self.tracer.with_record(self.idx, |record| {
            append_line(&mut record.error_out, message);
        });
        self
    }

    pub fn with_error(&self, err: &dyn Display) -> &Self {
        self.tracer.with_record(self.idx, |record| {
            error!(operation = %record.operation, "{err}");
            record.error = Some(match record.error.take() {
                Some(prior) => format!("{prior}; {err}"),
                None => err.to_string(),
            });
        });
        self
    }

    pub fn with_exit_code(&self, exit_code: i64) -> &Self {
        self.tracer.with_record(self.idx, |record| {
            record.exit_code = exit_code;
        });
        self
    }

    pub fn end(mut self) {
        self.finish();
        self.ended = true;
    }

    fn finish(&self) {
        self.tracer.with_record(self.idx, |record| {
            record.stop = unix_now();
        });
        let mut inner = self.tracer.inner.borrow_mut();
        let idx = self.idx;
        inner.open.retain(|open_idx| *open_idx != idx);
    }
}

impl Drop for Section<'_> {
    fn drop(&mut self) {
        if !self.ended {
            self.finish();
        }
    }
}

fn append_line(buf: &mut String, line: &str) {
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(line);
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_nest_and_close() {
        let tracer = Tracer::new();
        let outer = tracer.begin_section("outer");
        let inner = tracer.begin_section("inner");
        inner.append_info("inner message");
        inner.end();
        outer.end();

        let records = tracer.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].operation, "outer");
        assert_eq!(records[0].depth, 0);
        assert_eq!(records[1].operation, "inner");
        assert_eq!(records[1].depth, 1);
        assert!(records.iter().all(|record| record.stop >= record.start));
    }

    #[test]
    fn dropped_section_is_closed() {
        let tracer = Tracer::new();
        {
            let _section = tracer.begin_section("scoped");
        }
        assert!(tracer.records()[0].stop > 0);
    }

    #[test]
    fn error_reaches_current_section_and_render() {
        let tracer = Tracer::new();
        let section = tracer.begin_section("download manifest");
        tracer.error_current(&"connection refused");
        section.end();

        let (stdout, stderr) = tracer.render();
        assert!(stdout.is_empty());
        assert!(stderr.contains("download manifest: connection refused"));
    }

    #[test]
    fn error_without_open_section_creates_root() {
        let tracer = Tracer::new();
        tracer.error_current(&"boom");
        let records = tracer.records();
        assert_eq!(records[0].operation, "request");
        assert_eq!(records[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn prior_records_are_prepended() {
        let tracer = Tracer::new();
        let section = tracer.begin_section("resumed");
        section.append_info("after reboot");
        section.end();

        let prior = vec![TraceRecord {
            operation: "before reboot".to_string(),
            depth: 0,
            start: 1,
            stop: 2,
            error: None,
            exit_code: 0,
            info_out: String::new(),
            debug_out: String::new(),
            error_out: String::new(),
        }];
        tracer.load_prior(prior);

        let records = tracer.records();
        assert_eq!(records[0].operation, "before reboot");
        assert_eq!(records[1].operation, "resumed");
        assert_eq!(tracer.earliest_start(), 1);
    }

    #[test]
    fn records_round_trip_through_json() {
        let tracer = Tracer::new();
        let section = tracer.begin_section("persisted");
        section.with_exit_code(3010);
        section.end();

        let serialized = serde_json::to_string(&tracer.records()).unwrap();
        let restored: Vec<TraceRecord> = serde_json::from_str(&serialized).unwrap();
        assert_eq!(restored, tracer.records());
    }
}
