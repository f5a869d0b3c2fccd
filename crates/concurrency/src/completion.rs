//! Completion tracking for one scatter-gather request
//!
//! The driver registers how many members it dispatched to, each member's
//! dispatch reports completion exactly once, and a single-winner success (or
//! an authoritative home copy) marks the request satisfied. The driver blocks
//! in [`CompletionTracker::wait`] until one of those terminates the wait or
//! the budget runs out.
//!
//! ## State machine
//!
//! ```text
//!              all reported, no success, errors captured
//! Collecting ─────────────────────────────────────────────▶ Failed
//!     │
//!     │ satisfied, or all reported with a success / nothing to report
//!     ▼
//! Satisfied
//! ```

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Externally visible state of an accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    /// Members are still outstanding
    Collecting,
    /// Enough has been gathered to answer
    Satisfied,
    /// Every member reported and none produced a usable result
    Failed,
}

/// Why [`CompletionTracker::wait`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every dispatched member reported
    AllReported,
    /// A single-winner success or authoritative copy arrived
    Satisfied,
    /// The budget ran out; these members had not reported
    TimedOut {
        /// Members still outstanding
        outstanding: Vec<String>,
    },
}

#[derive(Debug, Default)]
struct Progress {
    dispatched: BTreeSet<String>,
    reported: BTreeSet<String>,
    abandoned: BTreeSet<String>,
    successes: usize,
    satisfied: bool,
    sealed: bool,
}

impl Progress {
    fn all_reported(&self) -> bool {
        self.dispatched.iter().all(|m| self.reported.contains(m))
    }
}

/// Why an outcome was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// The answer is already being materialized
    Sealed,
    /// The driver stopped waiting for this member
    Abandoned,
}

/// Permission to record one outcome.
///
/// While any admission is alive, [`CompletionTracker::seal`] and
/// [`CompletionTracker::abandon`] block, so an outcome admitted before
/// either call is fully recorded before it returns.
#[must_use]
#[derive(Debug)]
pub struct Admission<'a> {
    _gate: RwLockReadGuard<'a, ()>,
}

/// Tracks dispatched versus reported members for one request
#[derive(Debug, Default)]
pub struct CompletionTracker {
    progress: Mutex<Progress>,
    changed: Condvar,
    gate: RwLock<()>,
}

impl CompletionTracker {
    /// Create a tracker with nothing dispatched
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a request is about to be issued to `member`
    pub fn dispatched(&self, member: &str) {
        self.progress.lock().dispatched.insert(member.to_string());
    }

    /// Record that `member` has finished, successfully or not.
    ///
    /// Reporting twice for the same member counts once.
    pub fn completed(&self, member: &str) {
        let mut progress = self.progress.lock();
        progress.reported.insert(member.to_string());
        self.changed.notify_all();
    }

    /// Count one usable result
    pub fn succeeded(&self) {
        self.progress.lock().successes += 1;
    }

    /// Mark the request as answerable now
    pub fn satisfy(&self) {
        let mut progress = self.progress.lock();
        progress.satisfied = true;
        self.changed.notify_all();
    }

    /// Stop accepting late outcomes; the answer is being materialized.
    ///
    /// Waits for outcomes already admitted to finish recording.
    pub fn seal(&self) {
        let _gate = self.gate.write();
        self.progress.lock().sealed = true;
    }

    /// Stop accepting outcomes from members the driver stopped waiting for.
    ///
    /// Waits for outcomes already admitted to finish recording.
    pub fn abandon(&self, members: &[String]) {
        let _gate = self.gate.write();
        let mut progress = self.progress.lock();
        progress.abandoned.extend(members.iter().cloned());
    }

    /// Admit one outcome from `member`, unless the tracker is sealed or the
    /// member abandoned.
    ///
    /// Hold the admission until the outcome is merged. Admissions nest on
    /// one thread.
    pub fn admit(&self, member: &str) -> Result<Admission<'_>, Refusal> {
        let gate = self.gate.read_recursive();
        let progress = self.progress.lock();
        if progress.sealed {
            return Err(Refusal::Sealed);
        }
        if progress.abandoned.contains(member) {
            return Err(Refusal::Abandoned);
        }
        Ok(Admission { _gate: gate })
    }

    /// Block until `member` has reported or `timeout` elapses.
    ///
    /// Returns true if the member reported in time.
    pub fn wait_for(&self, member: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut progress = self.progress.lock();
        while !progress.reported.contains(member) {
            if self.changed.wait_until(&mut progress, deadline).timed_out() {
                return progress.reported.contains(member);
            }
        }
        true
    }

    /// True if the driver stopped waiting for `member`
    pub fn is_abandoned(&self, member: &str) -> bool {
        self.progress.lock().abandoned.contains(member)
    }

    /// True once [`seal`](Self::seal) has been called
    pub fn is_sealed(&self) -> bool {
        self.progress.lock().sealed
    }

    /// True once the request has been satisfied
    pub fn is_satisfied(&self) -> bool {
        self.progress.lock().satisfied
    }

    /// Number of usable results recorded
    pub fn successes(&self) -> usize {
        self.progress.lock().successes
    }

    /// Members dispatched to but not yet reported
    pub fn outstanding(&self) -> Vec<String> {
        let progress = self.progress.lock();
        progress
            .dispatched
            .difference(&progress.reported)
            .cloned()
            .collect()
    }

    /// Members that have reported, in id order
    pub fn reported(&self) -> Vec<String> {
        self.progress.lock().reported.iter().cloned().collect()
    }

    /// Current state, given whether any error has been captured
    pub fn state(&self, errors_captured: bool) -> AccumulatorState {
        let progress = self.progress.lock();
        if progress.satisfied {
            return AccumulatorState::Satisfied;
        }
        if !progress.all_reported() {
            return AccumulatorState::Collecting;
        }
        if progress.successes == 0 && errors_captured {
            AccumulatorState::Failed
        } else {
            AccumulatorState::Satisfied
        }
    }

    /// Block until every dispatched member reported, the request is
    /// satisfied, or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut progress = self.progress.lock();
        loop {
            if progress.satisfied {
                return WaitOutcome::Satisfied;
            }
            if progress.all_reported() {
                return WaitOutcome::AllReported;
            }
            if self.changed.wait_until(&mut progress, deadline).timed_out() {
                if progress.satisfied {
                    return WaitOutcome::Satisfied;
                }
                if progress.all_reported() {
                    return WaitOutcome::AllReported;
                }
                let outstanding = progress
                    .dispatched
                    .difference(&progress.reported)
                    .cloned()
                    .collect();
                return WaitOutcome::TimedOut { outstanding };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_nothing_dispatched_is_immediately_complete() {
        let tracker = CompletionTracker::new();
        assert_eq!(tracker.wait(Duration::from_millis(10)), WaitOutcome::AllReported);
        assert_eq!(tracker.state(false), AccumulatorState::Satisfied);
    }

    #[test]
    fn test_all_reported_from_other_threads() {
        let tracker = Arc::new(CompletionTracker::new());
        for m in ["a", "b", "c"] {
            tracker.dispatched(m);
        }
        let handles: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|m| {
                let t = Arc::clone(&tracker);
                thread::spawn(move || t.completed(m))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.wait(Duration::from_secs(5)), WaitOutcome::AllReported);
    }

    #[test]
    fn test_satisfied_stops_waiting_early() {
        let tracker = Arc::new(CompletionTracker::new());
        tracker.dispatched("a");
        tracker.dispatched("b");
        let t = Arc::clone(&tracker);
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            t.satisfy();
        });
        assert_eq!(tracker.wait(Duration::from_secs(5)), WaitOutcome::Satisfied);
        h.join().unwrap();
    }

    #[test]
    fn test_timeout_names_outstanding_members() {
        let tracker = CompletionTracker::new();
        tracker.dispatched("fast");
        tracker.dispatched("slow");
        tracker.completed("fast");
        match tracker.wait(Duration::from_millis(20)) {
            WaitOutcome::TimedOut { outstanding } => assert_eq!(outstanding, vec!["slow"]),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(tracker.state(false), AccumulatorState::Collecting);
    }

    #[test]
    fn test_state_failed_when_only_errors() {
        let tracker = CompletionTracker::new();
        tracker.dispatched("a");
        tracker.completed("a");
        assert_eq!(tracker.state(true), AccumulatorState::Failed);
        tracker.succeeded();
        assert_eq!(tracker.state(true), AccumulatorState::Satisfied);
    }

    #[test]
    fn test_abandon_is_per_member() {
        let tracker = CompletionTracker::new();
        tracker.abandon(&["slow".to_string()]);
        assert!(tracker.is_abandoned("slow"));
        assert!(!tracker.is_abandoned("fast"));
        assert!(!tracker.is_sealed());
    }

    #[test]
    fn test_admission_refused_after_seal_or_abandon() {
        let tracker = CompletionTracker::new();
        assert!(tracker.admit("a").is_ok());
        tracker.abandon(&["a".to_string()]);
        assert_eq!(tracker.admit("a").unwrap_err(), Refusal::Abandoned);
        assert!(tracker.admit("b").is_ok());
        tracker.seal();
        assert_eq!(tracker.admit("b").unwrap_err(), Refusal::Sealed);
    }

    #[test]
    fn test_abandon_waits_for_admitted_outcome() {
        let tracker = Arc::new(CompletionTracker::new());
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let admission = tracker.admit("slow").unwrap();

        let t = Arc::clone(&tracker);
        let abandoning = thread::spawn(move || t.abandon(&["slow".to_string()]));
        thread::sleep(Duration::from_millis(50));
        assert!(!abandoning.is_finished());

        recorded.lock().push("slow");
        drop(admission);
        abandoning.join().unwrap();
        assert!(tracker.admit("slow").is_err());
        assert_eq!(*recorded.lock(), vec!["slow"]);
    }

    #[test]
    fn test_nested_admissions_on_one_thread() {
        let tracker = CompletionTracker::new();
        let outer = tracker.admit("a").unwrap();
        let inner = tracker.admit("a").unwrap();
        drop(inner);
        drop(outer);
        tracker.seal();
        assert!(tracker.is_sealed());
    }

    #[test]
    fn test_wait_for_one_member() {
        let tracker = Arc::new(CompletionTracker::new());
        tracker.dispatched("a");
        tracker.dispatched("b");
        assert!(!tracker.wait_for("a", Duration::from_millis(20)));
        let t = Arc::clone(&tracker);
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            t.completed("a");
        });
        assert!(tracker.wait_for("a", Duration::from_secs(5)));
        h.join().unwrap();
        assert_eq!(tracker.outstanding(), vec!["b"]);
    }

    #[test]
    fn test_double_report_counts_once() {
        let tracker = CompletionTracker::new();
        tracker.dispatched("a");
        tracker.dispatched("b");
        tracker.completed("a");
        tracker.completed("a");
        assert_eq!(tracker.outstanding(), vec!["b"]);
    }
}
