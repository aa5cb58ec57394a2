//! Cross-thread scheduling state shared by the two worker stages.
//!
//! One [`SchedCoord`] instance is the single source of truth for
//! start/stop signaling, the two transfer mailboxes, drift bookkeeping,
//! scheduling statistics, and the stored-error slot the driver polls
//! after a call. Every blocking wait in the system re-checks its
//! predicate in a loop and observes the exit flags inside that loop, so
//! a stage parked at any wait point can always be released.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::contact::ContactBatch;
use crate::mailbox::Mailbox;
use crate::params::DriftConfig;
use crate::state::StateSnapshot;
use crate::SolverError;

/// Which worker stage an event belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageId {
    /// Contact detection (broad phase).
    Kinematic,
    /// Force computation and time integration.
    Dynamic,
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageId::Kinematic => write!(f, "kT"),
            StageId::Dynamic => write!(f, "dT"),
        }
    }
}

/// Counters accumulated over one user call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulingStats {
    /// State snapshots handed to the kinematic stage.
    pub n_kinematic_updates: u64,
    /// Times the dynamic stage stalled on the drift policy.
    pub n_dynamic_held_back: u64,
    /// Kinematic cycles completed.
    pub n_kinematic_cycles: u64,
    /// Dynamic cycles completed.
    pub current_stamp_dynamic: i64,
    /// Dynamic cycle at which fresh contact data was last swapped in.
    pub stamp_last_update_dynamic: i64,
}

/// A boolean latch with condvar wakeup, used for the start and call-done
/// signals.
struct Gate {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            flag: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn signal(&self) {
        *self.lock() = true;
        self.cv.notify_all();
    }

    fn reset(&self) {
        *self.lock() = false;
    }

    fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Wait for the latch, consuming it (the next waiter blocks again).
    /// Returns false if released by `cancelled` instead.
    fn wait_and_clear(&self, cancelled: impl Fn() -> bool) -> bool {
        let mut flag = self.lock();
        while !*flag {
            if cancelled() {
                return false;
            }
            flag = self.cv.wait(flag).unwrap_or_else(PoisonError::into_inner);
        }
        *flag = false;
        true
    }

    /// Wait for the latch without consuming it.
    fn wait(&self, cancelled: impl Fn() -> bool) -> bool {
        let mut flag = self.lock();
        while !*flag {
            if cancelled() {
                return false;
            }
            flag = self.cv.wait(flag).unwrap_or_else(PoisonError::into_inner);
        }
        true
    }

    fn interrupt(&self) {
        let _flag = self.lock();
        self.cv.notify_all();
    }
}

/// Shared scheduling state for one solver instance.
pub struct SchedCoord {
    /// Permanent cooperative-shutdown request.
    should_join: AtomicBool,
    /// A stage hit a fatal error; the run is dead but threads unwind
    /// through their normal exits.
    run_aborted: AtomicBool,

    start_gate: Gate,
    done_gate: Gate,

    /// dT → kT: position/orientation snapshots.
    pub state_mailbox: Mailbox<StateSnapshot>,
    /// kT → dT: candidate contact pairs.
    pub contact_mailbox: Mailbox<ContactBatch>,

    drift: DriftConfig,
    cycle_budget: AtomicU64,

    current_stamp_dynamic: AtomicI64,
    stamp_last_update_dynamic: AtomicI64,
    /// Stamp of the snapshot behind the freshest batch kT has published.
    kinematic_snapshot_stamp: AtomicI64,

    n_kinematic_cycles: AtomicU64,
    n_kinematic_updates: AtomicU64,
    n_dynamic_held_back: AtomicU64,

    dynamic_done: AtomicBool,

    error: Mutex<Option<SolverError>>,
}

impl SchedCoord {
    pub fn new(n_clumps: usize, pair_capacity: usize, drift: DriftConfig) -> Self {
        Self {
            should_join: AtomicBool::new(false),
            run_aborted: AtomicBool::new(false),
            start_gate: Gate::new(),
            done_gate: Gate::new(),
            state_mailbox: Mailbox::new(StateSnapshot::with_len(n_clumps)),
            contact_mailbox: Mailbox::new(ContactBatch::with_capacity(pair_capacity)),
            drift,
            cycle_budget: AtomicU64::new(0),
            current_stamp_dynamic: AtomicI64::new(0),
            stamp_last_update_dynamic: AtomicI64::new(-1),
            kinematic_snapshot_stamp: AtomicI64::new(-1),
            n_kinematic_cycles: AtomicU64::new(0),
            n_kinematic_updates: AtomicU64::new(0),
            n_dynamic_held_back: AtomicU64::new(0),
            dynamic_done: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }

    // ---- lifecycle -----------------------------------------------------

    /// True once shutdown or a fatal error makes further work pointless.
    /// Every wait loop in both stages uses this as its cancellation
    /// predicate.
    pub fn should_exit(&self) -> bool {
        self.should_join.load(Ordering::SeqCst) || self.run_aborted.load(Ordering::SeqCst)
    }

    pub fn join_requested(&self) -> bool {
        self.should_join.load(Ordering::SeqCst)
    }

    /// Cooperative shutdown: set the flag first, then wake every wait
    /// point so blocked stages observe it inside their loops.
    pub fn request_join(&self) {
        self.should_join.store(true, Ordering::SeqCst);
        self.interrupt_all();
    }

    fn interrupt_all(&self) {
        self.start_gate.interrupt();
        self.done_gate.interrupt();
        self.state_mailbox.interrupt();
        self.contact_mailbox.interrupt();
    }

    /// Record a fatal stage error. The first error wins; the run is
    /// aborted and every wait point released.
    pub fn record_error(&self, err: SolverError) {
        {
            let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(err);
            } else {
                log::warn!("secondary stage error dropped: {}", err);
            }
        }
        self.run_aborted.store(true, Ordering::SeqCst);
        self.interrupt_all();
    }

    /// Fetch-and-clear the stored stage error (driver side, after a call).
    pub fn take_error(&self) -> Option<SolverError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn run_aborted(&self) -> bool {
        self.run_aborted.load(Ordering::SeqCst)
    }

    // ---- per-call driver protocol --------------------------------------

    /// Arm the next user call: cycle budget, stamp and stat resets, and a
    /// drain of any stale mailbox content from the previous call's tail.
    pub fn reset_user_call(&self, n_cycles: u64) {
        self.cycle_budget.store(n_cycles, Ordering::SeqCst);
        self.current_stamp_dynamic.store(0, Ordering::SeqCst);
        self.stamp_last_update_dynamic.store(-1, Ordering::SeqCst);
        self.kinematic_snapshot_stamp.store(-1, Ordering::SeqCst);
        self.n_kinematic_cycles.store(0, Ordering::SeqCst);
        self.n_kinematic_updates.store(0, Ordering::SeqCst);
        self.n_dynamic_held_back.store(0, Ordering::SeqCst);
        self.dynamic_done.store(false, Ordering::SeqCst);
        self.done_gate.reset();
        self.state_mailbox.consume_with(|_| ());
        self.contact_mailbox.consume_with(|_| ());
    }

    /// Signal the dynamic stage to begin the armed call.
    pub fn start_dynamic(&self) {
        self.start_gate.signal();
    }

    /// Dynamic stage: block until the next call starts. False on exit.
    pub fn wait_for_start(&self) -> bool {
        self.start_gate.wait_and_clear(|| self.should_exit())
    }

    pub fn cycle_budget(&self) -> u64 {
        self.cycle_budget.load(Ordering::SeqCst)
    }

    /// Dynamic stage: the armed call's cycles are all done.
    pub fn mark_user_call_done(&self) {
        self.done_gate.signal();
    }

    pub fn is_user_call_done(&self) -> bool {
        self.done_gate.is_set()
    }

    /// Driver: block until the in-flight call completes (or the run dies,
    /// in which case the exiting stage still signals the gate).
    pub fn wait_user_call_done(&self) {
        self.done_gate.wait(|| false);
    }

    // ---- drift policy --------------------------------------------------

    pub fn current_stamp_dynamic(&self) -> i64 {
        self.current_stamp_dynamic.load(Ordering::SeqCst)
    }

    pub fn advance_dynamic_stamp(&self) {
        self.current_stamp_dynamic.fetch_add(1, Ordering::SeqCst);
    }

    /// Dynamic stage consumed fresh contact data at its current cycle.
    pub fn note_dynamic_update(&self, cycle_stamp: i64) {
        self.stamp_last_update_dynamic
            .store(cycle_stamp, Ordering::SeqCst);
    }

    /// Kinematic stage published a batch detected from a snapshot taken
    /// at `snapshot_stamp`.
    pub fn note_kinematic_cycle(&self, snapshot_stamp: i64) {
        self.kinematic_snapshot_stamp
            .store(snapshot_stamp, Ordering::SeqCst);
        self.n_kinematic_cycles.fetch_add(1, Ordering::SeqCst);
    }

    pub fn note_kinematic_update_sent(&self) {
        self.n_kinematic_updates.fetch_add(1, Ordering::SeqCst);
    }

    pub fn note_dynamic_held_back(&self) {
        self.n_dynamic_held_back.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_dynamic_done(&self) {
        self.dynamic_done.store(true, Ordering::SeqCst);
    }

    pub fn dynamic_done(&self) -> bool {
        self.dynamic_done.load(Ordering::SeqCst)
    }

    /// Drift policy: must the dynamic stage stall before its next cycle?
    ///
    /// Blocks when EITHER bound is reached (both inclusive):
    /// - `lag`: cycles integrated since contact data was last swapped in
    ///   reaches `max_drift`, or
    /// - `ahead`: the cycle stamp leads the snapshot stamp behind kT's
    ///   freshest published batch by `max_lookahead`.
    ///
    /// This is backpressure, not an error: it bounds how long the
    /// dynamic stage may integrate on stale contact topology.
    pub fn dynamic_should_wait(&self) -> bool {
        let current = self.current_stamp_dynamic.load(Ordering::SeqCst);
        let lag = current - self.stamp_last_update_dynamic.load(Ordering::SeqCst);
        let ahead = current - self.kinematic_snapshot_stamp.load(Ordering::SeqCst);
        lag >= self.drift.max_drift || ahead >= self.drift.max_lookahead
    }

    pub fn drift_config(&self) -> DriftConfig {
        self.drift
    }

    /// Snapshot of this call's counters.
    pub fn stats(&self) -> SchedulingStats {
        SchedulingStats {
            n_kinematic_updates: self.n_kinematic_updates.load(Ordering::SeqCst),
            n_dynamic_held_back: self.n_dynamic_held_back.load(Ordering::SeqCst),
            n_kinematic_cycles: self.n_kinematic_cycles.load(Ordering::SeqCst),
            current_stamp_dynamic: self.current_stamp_dynamic.load(Ordering::SeqCst),
            stamp_last_update_dynamic: self.stamp_last_update_dynamic.load(Ordering::SeqCst),
        }
    }
}
