//! Federation control: how an executor reaches the members
//!
//! Two dispatch strategies:
//!
//! | Strategy | Used for | Thread | Stops when |
//! |----------|----------|--------|------------|
//! | [`scatter`](FederationControl::scatter) | queries, retrievals, verification | worker pool | all reported, satisfied, or `max_wait` |
//! | [`in_turn_bounded`](FederationControl::in_turn_bounded) | maintenance | worker pool, one member at a time | first member that satisfies |
//!
//! `scatter` falls back to [`in_turn`](FederationControl::in_turn) on the
//! calling thread when parallel queries are disabled.
//!
//! Every member call is wrapped in `catch_unwind`: a panicking member is
//! recorded as an `Unclassified` failure for that member and always reports
//! completion, so a wait can never hang on it.
//!
//! Members still outstanding when the budget runs out are captured as timed
//! out and abandoned. Their calls are not cancelled; whatever they return
//! later is dropped by the accumulator. A call already running is detached
//! from the pool so a hung member cannot starve later requests, and a call
//! still queued is skipped when a worker reaches it.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cohort_concurrency::WaitOutcome;
use cohort_core::{CohortError, CohortResult, MetadataCollection};
use cohort_executor::RepositoryExecutor;
use tracing::{debug, error, warn};

use crate::config::FederationConfig;
use crate::registry::CohortMember;
use crate::scheduler::{FederationScheduler, SchedulerStats, TaskTicket};

/// Counters for federated requests
///
/// Relaxed ordering throughout; the values are observational only.
#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    member_calls: AtomicU64,
    member_panics: AtomicU64,
    member_timeouts: AtomicU64,
}

/// Snapshot of federation counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlMetrics {
    /// Requests dispatched, counting each phase separately
    pub requests: u64,
    /// Individual member calls issued
    pub member_calls: u64,
    /// Member calls that panicked
    pub member_panics: u64,
    /// Members abandoned because the wait budget ran out
    pub member_timeouts: u64,
}

/// Drives executors across the cohort
pub struct FederationControl {
    scheduler: FederationScheduler,
    max_wait: Duration,
    parallel: bool,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for FederationControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationControl")
            .field("max_wait", &self.max_wait)
            .field("parallel", &self.parallel)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl FederationControl {
    /// Start the worker pool described by `config`
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an invalid config and `RepositoryError`
    /// if the workers cannot be started.
    pub fn new(config: &FederationConfig) -> CohortResult<Self> {
        config.validate()?;
        Ok(FederationControl {
            scheduler: FederationScheduler::new(
                config.worker_threads,
                config.max_queue_depth,
                config.max_detached_calls,
            )?,
            max_wait: config.max_wait(),
            parallel: config.parallel_queries,
            counters: Arc::new(Counters::default()),
        })
    }

    /// Wait budget for one parallel request
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// True if `scatter` uses the worker pool
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Worker pool metrics
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Request counters
    pub fn metrics(&self) -> ControlMetrics {
        ControlMetrics {
            requests: self.counters.requests.load(Ordering::Relaxed),
            member_calls: self.counters.member_calls.load(Ordering::Relaxed),
            member_panics: self.counters.member_panics.load(Ordering::Relaxed),
            member_timeouts: self.counters.member_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Ask every member and wait for the outcome.
    ///
    /// Returns once every member reported, the executor's tracker is
    /// satisfied, or the wait budget runs out.
    pub fn scatter<E>(&self, executor: Arc<E>, members: &[CohortMember]) -> WaitOutcome
    where
        E: RepositoryExecutor + 'static,
    {
        if !self.parallel {
            return self.in_turn(executor.as_ref(), members);
        }
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "cohort::federation",
            operation = executor.operation(),
            members = members.len(),
            "scattering request"
        );

        let tracker = executor.tracker();
        for member in members {
            tracker.dispatched(member.id());
        }
        let tickets: Vec<(String, TaskTicket)> = members
            .iter()
            .filter_map(|member| {
                self.submit(&executor, member)
                    .map(|ticket| (member.id().to_string(), ticket))
            })
            .collect();

        let outcome = tracker.wait(self.max_wait);
        match &outcome {
            WaitOutcome::TimedOut { outstanding } => {
                self.time_out(executor.as_ref(), outstanding, &tickets);
            }
            WaitOutcome::Satisfied => {
                let outstanding = tracker.outstanding();
                if !outstanding.is_empty() {
                    debug!(
                        target: "cohort::federation",
                        operation = executor.operation(),
                        outstanding = outstanding.len(),
                        "satisfied before every member answered"
                    );
                    tracker.abandon(&outstanding);
                    self.release(&outstanding, &tickets);
                }
            }
            WaitOutcome::AllReported => {}
        }
        outcome
    }

    /// Ask members one at a time on the calling thread.
    ///
    /// The executor's preferred member goes first, then the rest in
    /// registration order. Stops at the first member that satisfies the
    /// request.
    pub fn in_turn<E>(&self, executor: &E, members: &[CohortMember]) -> WaitOutcome
    where
        E: RepositoryExecutor + ?Sized,
    {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "cohort::federation",
            operation = executor.operation(),
            members = members.len(),
            preferred = executor.preferred_repository(),
            "asking members in turn"
        );
        for member in preferred_first(members, executor.preferred_repository()) {
            executor.tracker().dispatched(member.id());
            if issue(executor, member.id(), member.collection().as_ref(), &self.counters) {
                return WaitOutcome::Satisfied;
            }
        }
        WaitOutcome::AllReported
    }

    /// Ask members one at a time through the worker pool, giving each
    /// attempt the wait budget.
    ///
    /// Same order and stopping rule as [`in_turn`](Self::in_turn). A member
    /// that does not answer in time is captured as timed out, abandoned, and
    /// the next member is asked.
    pub fn in_turn_bounded<E>(&self, executor: Arc<E>, members: &[CohortMember]) -> WaitOutcome
    where
        E: RepositoryExecutor + 'static,
    {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "cohort::federation",
            operation = executor.operation(),
            members = members.len(),
            preferred = executor.preferred_repository(),
            "asking members in turn with a deadline"
        );
        let tracker = executor.tracker();
        let mut timed_out = Vec::new();
        for member in preferred_first(members, executor.preferred_repository()) {
            tracker.dispatched(member.id());
            let ticket = match self.submit(&executor, member) {
                Some(ticket) => ticket,
                None => continue,
            };
            if !tracker.wait_for(member.id(), self.max_wait) {
                let id = member.id().to_string();
                self.time_out(executor.as_ref(), std::slice::from_ref(&id), &[(id.clone(), ticket)]);
                timed_out.push(id);
            }
            if tracker.is_satisfied() {
                return WaitOutcome::Satisfied;
            }
        }
        if timed_out.is_empty() {
            WaitOutcome::AllReported
        } else {
            WaitOutcome::TimedOut {
                outstanding: timed_out,
            }
        }
    }

    /// Queue one member call. A refused submission is captured as that
    /// member's failure and reported at once.
    fn submit<E>(&self, executor: &Arc<E>, member: &CohortMember) -> Option<TaskTicket>
    where
        E: RepositoryExecutor + 'static,
    {
        let task_executor = Arc::clone(executor);
        let id = member.id().to_string();
        let collection = Arc::clone(member.collection());
        let counters = Arc::clone(&self.counters);
        let submitted = self.scheduler.submit(move || {
            let tracker = task_executor.tracker();
            if tracker.is_abandoned(&id) || tracker.is_sealed() {
                debug!(
                    target: "cohort::federation",
                    operation = task_executor.operation(),
                    member = id.as_str(),
                    "skipping member request nobody waits for"
                );
                tracker.completed(&id);
                return;
            }
            issue(task_executor.as_ref(), &id, collection.as_ref(), &counters);
        });
        match submitted {
            Ok(ticket) => Some(ticket),
            Err(e) => {
                warn!(
                    target: "cohort::federation",
                    operation = executor.operation(),
                    member = member.id(),
                    "could not queue member request: {}",
                    e
                );
                executor.capture_failure(member.id(), e.into());
                executor.tracker().completed(member.id());
                None
            }
        }
    }

    /// Capture `outstanding` members as timed out, stop listening to them
    /// and give their workers back to the pool
    fn time_out<E>(&self, executor: &E, outstanding: &[String], tickets: &[(String, TaskTicket)])
    where
        E: RepositoryExecutor + ?Sized,
    {
        self.counters
            .member_timeouts
            .fetch_add(outstanding.len() as u64, Ordering::Relaxed);
        for member in outstanding {
            warn!(
                target: "cohort::federation",
                operation = executor.operation(),
                member = member.as_str(),
                "member did not answer within {} ms",
                self.max_wait.as_millis()
            );
            executor.capture_failure(
                member,
                CohortError::repository_error(format!(
                    "member {} did not answer {} within {} ms",
                    member,
                    executor.operation(),
                    self.max_wait.as_millis()
                )),
            );
        }
        executor.tracker().abandon(outstanding);
        self.release(outstanding, tickets);
    }

    /// Detach the running calls of abandoned members. Queued calls skip
    /// themselves once a worker reaches them.
    fn release(&self, abandoned: &[String], tickets: &[(String, TaskTicket)]) {
        for (member, ticket) in tickets {
            if abandoned.contains(member) && ticket.is_started() && !ticket.is_done() {
                self.scheduler.detach(ticket);
            }
        }
    }
}

/// Members with `preferred` moved to the front; the rest keep their order
fn preferred_first<'a>(members: &'a [CohortMember], preferred: Option<&str>) -> Vec<&'a CohortMember> {
    let mut ordered: Vec<&CohortMember> = Vec::with_capacity(members.len());
    if let Some(preferred) = preferred {
        ordered.extend(members.iter().filter(|m| m.id() == preferred));
    }
    ordered.extend(members.iter().filter(|m| Some(m.id()) != preferred));
    ordered
}

/// Issue one member call and report its completion, whatever happens
fn issue<E>(executor: &E, member: &str, collection: &dyn MetadataCollection, counters: &Counters) -> bool
where
    E: RepositoryExecutor + ?Sized,
{
    counters.member_calls.fetch_add(1, Ordering::Relaxed);
    debug!(
        target: "cohort::federation",
        operation = executor.operation(),
        member,
        "issuing member request"
    );
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        executor.issue_request_to_repository(member, collection)
    }));
    let satisfied = match outcome {
        Ok(satisfied) => satisfied,
        Err(payload) => {
            counters.member_panics.fetch_add(1, Ordering::Relaxed);
            let reason = panic_message(payload.as_ref());
            error!(
                target: "cohort::federation",
                operation = executor.operation(),
                member,
                "member call panicked: {}",
                reason
            );
            executor.capture_failure(
                member,
                CohortError::unclassified(format!("member call panicked: {}", reason)),
            );
            false
        }
    };
    executor.tracker().completed(member);
    satisfied
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic)".to_string()
    }
}
