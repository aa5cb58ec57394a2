//! The kinematic worker stage (kT): contact detection.
//!
//! A data-driven loop: block until the dynamic stage publishes a state
//! snapshot, run the contact detector over it, publish the candidate
//! pair batch, repeat. The snapshot mailbox doubles as the work signal,
//! so the stage needs no separate start gate; it exits when the shared
//! join flag is observed inside any of its waits.

use std::sync::Arc;

use crate::contact::ContactBatch;
use crate::kernels::{ContactDetector, KernelScene};
use crate::scheduler::{SchedCoord, StageId};
use crate::state::StateSnapshot;
use crate::SolverError;

pub struct KinematicStage {
    scene: KernelScene,
    sched: Arc<SchedCoord>,
    detector: Box<dyn ContactDetector>,
    /// Local copies so the mailbox lock is held only for the memcpy, not
    /// for the detection itself.
    snapshot: StateSnapshot,
    batch: ContactBatch,
}

impl KinematicStage {
    pub fn new(
        scene: KernelScene,
        sched: Arc<SchedCoord>,
        detector: Box<dyn ContactDetector>,
    ) -> Self {
        let n_clumps = scene.params.n_clumps;
        Self {
            scene,
            sched,
            detector,
            snapshot: StateSnapshot::with_len(n_clumps),
            batch: ContactBatch::default(),
        }
    }

    /// Thread body. Runs until join or a fatal detector error.
    pub fn run(mut self) {
        log::info!("kT up: {} spheres", self.scene.geom.n_spheres());

        if let Err(e) = self.detector.bind(&self.scene) {
            self.sched.record_error(SolverError::Kernel {
                stage: StageId::Kinematic,
                message: e.to_string(),
            });
            return;
        }

        while !self.sched.should_exit() {
            if !self
                .sched
                .state_mailbox
                .wait_fresh(|| self.sched.should_exit())
            {
                break;
            }
            let consumed = self
                .sched
                .state_mailbox
                .consume_with(|payload| self.snapshot.copy_from_snapshot(payload));
            if consumed.is_none() {
                // Drained by a concurrent call reset; go back to waiting.
                continue;
            }

            if let Err(e) =
                self.detector
                    .detect_contacts(&self.scene, &self.snapshot, &mut self.batch)
            {
                self.sched.record_error(SolverError::Kernel {
                    stage: StageId::Kinematic,
                    message: e.to_string(),
                });
                break;
            }
            self.batch.origin_stamp = self.snapshot.stamp;

            // All pair writes land inside the mailbox critical section;
            // the freshness flag flips only after the copy completes.
            self.sched
                .contact_mailbox
                .publish_with(|payload| payload.copy_from(&self.batch));
            self.sched.note_kinematic_cycle(self.snapshot.stamp);
        }

        log::info!("kT exiting");
    }
}
