//! Bounded per-holder call trace.
//!
//! Every time the engine runs a task it records two entries against the
//! task's holder: the site that drove the call and the site that
//! registered the task. The buffer is a FIFO bounded by the configured
//! capacity (see [`TraceConfig`](crate::TraceConfig)); the oldest entries
//! are evicted first. Serial numbers come from one process-wide counter,
//! so records from different holders interleave in a total order.

use crate::loc::Loc;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::SystemTime;

static CALL_SERIAL: AtomicU32 = AtomicU32::new(0);

/// Hands out the next process-wide call serial number.
pub(crate) fn next_serial() -> u32 {
    CALL_SERIAL.fetch_add(1, Ordering::Relaxed)
}

/// One recorded call site.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    /// The recorded site.
    pub loc: Loc,
    /// Process-wide serial number at record time.
    pub serial: u32,
    /// Wall-clock time at record time.
    pub at: SystemTime,
}

impl fmt::Display for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = DateTime::<Local>::from(self.at).format("%Y-%m-%d_%H:%M:%S");
        write!(
            f,
            "{},{},{},{}",
            self.serial,
            stamp,
            self.loc.line(),
            self.loc.file()
        )
    }
}

/// The holder-internal bounded record buffer.
#[derive(Debug, Default)]
pub(crate) struct CallTrace {
    records: VecDeque<CallRecord>,
}

impl CallTrace {
    /// Appends a record for `loc`, evicting the oldest past `capacity`.
    pub(crate) fn record(&mut self, loc: Loc, capacity: usize) {
        self.records.push_back(CallRecord {
            loc,
            serial: next_serial(),
            at: SystemTime::now(),
        });
        while self.records.len() > capacity {
            self.records.pop_front();
        }
    }

    /// Moves `older`'s records in front of this buffer's, then trims.
    ///
    /// Used by `join`: the absorbed holder's history predates the
    /// boundary, so it goes first.
    pub(crate) fn prepend(&mut self, mut older: CallTrace, capacity: usize) {
        while let Some(record) = older.records.pop_back() {
            self.records.push_front(record);
        }
        while self.records.len() > capacity {
            self.records.pop_front();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Clones the buffer into a public snapshot.
    pub(crate) fn snapshot(&self) -> CallStack {
        CallStack {
            records: self.records.iter().cloned().collect(),
        }
    }
}

/// A snapshot of one holder's call trace, oldest first.
///
/// Obtained from [`Promise::call_stack`](crate::Promise::call_stack) or
/// the free [`call_stack`](crate::call_stack) while inside a
/// continuation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallStack {
    records: Vec<CallRecord>,
}

impl CallStack {
    /// Number of records in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true when no records were captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The records, oldest first.
    #[must_use]
    pub fn records(&self) -> &[CallRecord] {
        &self.records
    }

    /// Logs the snapshot newest-first at error level.
    pub fn dump(&self) {
        if self.records.is_empty() {
            tracing::error!("call stack is empty");
            return;
        }
        tracing::error!(size = self.records.len(), "call stack");
        for record in self.records.iter().rev() {
            tracing::error!("  {record}");
        }
    }
}

impl fmt::Display for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in self.records.iter().rev() {
            writeln!(f, "  {record}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_respects_capacity() {
        let mut trace = CallTrace::default();
        for _ in 0..10 {
            trace.record(Loc::here(), 4);
        }
        assert_eq!(trace.len(), 4);
    }

    #[test]
    fn serials_are_monotonic() {
        let mut trace = CallTrace::default();
        trace.record(Loc::here(), 8);
        trace.record(Loc::here(), 8);
        let snap = trace.snapshot();
        assert!(snap.records()[0].serial < snap.records()[1].serial);
    }

    #[test]
    fn prepend_puts_older_history_first() {
        let mut newer = CallTrace::default();
        let mut older = CallTrace::default();
        older.record(Loc::here(), 8);
        let boundary = older.snapshot().records()[0].serial;
        newer.record(Loc::here(), 8);
        newer.prepend(older, 8);
        let snap = newer.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.records()[0].serial, boundary);
    }

    #[test]
    fn prepend_trims_to_capacity() {
        let mut newer = CallTrace::default();
        let mut older = CallTrace::default();
        for _ in 0..3 {
            older.record(Loc::here(), 8);
            newer.record(Loc::here(), 8);
        }
        newer.prepend(older, 4);
        assert_eq!(newer.len(), 4);
        // The survivors are the newest four.
        let snap = newer.snapshot();
        assert!(snap.records()[0].serial < snap.records()[3].serial);
    }

    #[test]
    fn display_lists_newest_first() {
        let mut trace = CallTrace::default();
        trace.record(Loc::here(), 8);
        trace.record(Loc::here(), 8);
        let snap = trace.snapshot();
        let text = snap.to_string();
        let first_line = text.lines().next().unwrap();
        let newest = snap.records()[1].serial;
        assert!(first_line.trim_start().starts_with(&newest.to_string()));
    }
}
