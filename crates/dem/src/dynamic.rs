//! The dynamic worker stage (dT): force computation and integration.
//!
//! Outer loop: block on the start gate until the driver arms a call.
//! Each call bootstraps the pipeline by pushing the current state to the
//! kinematic stage (forces need an initial contact list) and blocking on
//! the first batch; after that the two stages overlap freely, bounded by
//! the drift policy. Per cycle: swap in fresh contacts if available,
//! compute forces, integrate, republish state if the peer is idle,
//! advance the cycle stamp, and stall when the drift policy trips.

use std::sync::{Arc, Mutex, PoisonError};

use crate::contact::ContactStore;
use crate::kernels::{ForceModel, Integrator, KernelScene};
use crate::scheduler::{SchedCoord, StageId};
use crate::state::ClumpState;
use crate::SolverError;

pub struct DynamicStage {
    scene: KernelScene,
    sched: Arc<SchedCoord>,
    /// Live clump state; this stage is the sole mutator during a run.
    /// The driver reads it between calls (trackers, writers).
    state: Arc<Mutex<ClumpState>>,
    contacts: ContactStore,
    force_model: Box<dyn ForceModel>,
    integrator: Box<dyn Integrator>,
}

impl DynamicStage {
    pub fn new(
        scene: KernelScene,
        sched: Arc<SchedCoord>,
        state: Arc<Mutex<ClumpState>>,
        pair_capacity: usize,
        force_model: Box<dyn ForceModel>,
        integrator: Box<dyn Integrator>,
    ) -> Self {
        Self {
            scene,
            sched,
            state,
            contacts: ContactStore::with_capacity(pair_capacity),
            force_model,
            integrator,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ClumpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer half of the dT → kT handoff: snapshot the live state into
    /// the peer's mailbox, stamped with the current cycle.
    fn send_to_their_buffer(&self) {
        let stamp = self.sched.current_stamp_dynamic();
        let state = self.lock_state();
        self.sched
            .state_mailbox
            .publish_with(|payload| payload.copy_from(&state, stamp));
        self.sched.note_kinematic_update_sent();
    }

    /// Consumer half of the kT → dT handoff: swap a fresh batch into the
    /// contact store (growing it first if the incoming count exceeds
    /// capacity). Returns false when the mailbox held nothing new.
    fn unpack_my_buffer(&mut self) -> bool {
        let contacts = &mut self.contacts;
        self.sched
            .contact_mailbox
            .consume_with(|batch| contacts.ingest(batch))
            .is_some()
    }

    fn calculate_forces(&mut self) -> Result<(), SolverError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.force_model
            .calculate_forces(&self.scene, &mut state, &mut self.contacts)
            .map_err(|e| SolverError::Kernel {
                stage: StageId::Dynamic,
                message: e.to_string(),
            })
    }

    fn integrate_clump_motions(&mut self) -> Result<(), SolverError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.integrator
            .integrate(&self.scene, &mut state)
            .map_err(|e| SolverError::Kernel {
                stage: StageId::Dynamic,
                message: e.to_string(),
            })
    }

    /// Thread body. Runs until join or a fatal kernel error.
    pub fn run(mut self) {
        log::info!("dT up: {} clumps", self.scene.params.n_clumps);

        // One-time kernel setup (device acquisition for GPU backends).
        let bound = self
            .force_model
            .bind(&self.scene)
            .and_then(|_| self.integrator.bind(&self.scene));
        if let Err(e) = bound {
            self.sched.record_error(SolverError::Kernel {
                stage: StageId::Dynamic,
                message: e.to_string(),
            });
            self.sched.mark_user_call_done();
            return;
        }

        while !self.sched.should_exit() {
            if !self.sched.wait_for_start() {
                break;
            }

            // Bootstrap: kT needs a first snapshot, dT needs its result.
            self.send_to_their_buffer();
            if !self
                .sched
                .contact_mailbox
                .wait_fresh(|| self.sched.should_exit())
            {
                self.sched.mark_user_call_done();
                break;
            }

            let n_cycles = self.sched.cycle_budget();
            for cycle in 0..n_cycles {
                if self.sched.should_exit() {
                    break;
                }

                if self.unpack_my_buffer() {
                    self.sched
                        .note_dynamic_update(self.sched.current_stamp_dynamic());
                }

                if let Err(e) = self.calculate_forces() {
                    self.sched.record_error(e);
                    break;
                }
                if let Err(e) = self.integrate_clump_motions() {
                    self.sched.record_error(e);
                    break;
                }

                // Let the peer know nothing more is coming this call,
                // before it parks waiting for a snapshot that never
                // arrives.
                if cycle + 1 == n_cycles {
                    self.sched.mark_dynamic_done();
                }

                // If the kinematic stage is idle, hand it new work.
                if !self.sched.state_mailbox.is_fresh() {
                    self.send_to_their_buffer();
                }

                self.sched.advance_dynamic_stamp();

                // Drift policy: backpressure, not an error. Skipped after
                // the final cycle; there is nothing left to protect.
                if cycle + 1 < n_cycles && self.sched.dynamic_should_wait() {
                    self.sched.note_dynamic_held_back();
                    if !self
                        .sched
                        .contact_mailbox
                        .wait_fresh(|| self.sched.should_exit())
                    {
                        break;
                    }
                }
            }

            self.sched.mark_user_call_done();
            if self.sched.run_aborted() {
                break;
            }
        }

        // Unblock a driver that may still be waiting on this call.
        self.sched.mark_user_call_done();
        log::info!("dT exiting");
    }
}
