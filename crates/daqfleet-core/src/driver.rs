//! Timer-driven loop tying the sequencer to cluster I/O.
//!
//! Each tick issues any stage actions queued by `begin_run`, collects one
//! status snapshot, feeds it to the sequencer and issues whatever the
//! sequencer asks for next. A run begun while a tick is in flight is not
//! judged until its queued actions have gone out. The sequencer mutex is
//! never held across an `.await`.

use crate::controller::Controller;
use crate::error::{DaqError, Result};
use crate::sequencer::{RunHandle, RunState, Sequencer, StageAction, Step};
use crate::status::StatusDocument;
use crate::topology::Topology;
use crate::transport::BatchResult;
use crate::types::{Command, Direction};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

struct Pending {
    run_id: Uuid,
    actions: Vec<StageAction>,
}

pub struct Driver {
    controller: Controller,
    sequencer: Mutex<Sequencer>,
    pending: Mutex<Vec<Pending>>,
    status_tx: watch::Sender<Arc<StatusDocument>>,
    wake: Notify,
}

impl Driver {
    pub fn new(controller: Controller) -> Self {
        let sequencer = Sequencer::from_topology(controller.topology());
        let (status_tx, _) = watch::channel(Arc::new(StatusDocument::default()));
        Self {
            controller,
            sequencer: Mutex::new(sequencer),
            pending: Mutex::new(Vec::new()),
            status_tx,
            wake: Notify::new(),
        }
    }

    pub fn from_topology(topology: Topology) -> Self {
        Self::new(Controller::with_defaults(Arc::new(topology)))
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn topology(&self) -> &Topology {
        self.controller.topology()
    }

    fn sequencer(&self) -> MutexGuard<'_, Sequencer> {
        self.sequencer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, Vec<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Presentation interface
    // -----------------------------------------------------------------------

    /// Latest published snapshot.
    pub fn status_document(&self) -> Arc<StatusDocument> {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StatusDocument>> {
        self.status_tx.subscribe()
    }

    /// Start a run, superseding any active one. The first stage's actions
    /// are issued on the next tick, which is woken immediately.
    pub fn begin_run(&self, direction: Direction) -> RunHandle {
        let (handle, actions) = self.sequencer().begin_run(direction);
        {
            let mut pending = self.pending();
            pending.clear();
            pending.push(Pending {
                run_id: handle.run_id,
                actions,
            });
        }
        self.wake.notify_one();
        handle
    }

    pub fn run_state(&self, handle: RunHandle) -> Result<RunState> {
        self.sequencer()
            .run_state(handle)
            .ok_or(DaqError::RunNotFound(handle.run_id))
    }

    pub fn current_run(&self) -> Option<RunState> {
        self.sequencer().current().cloned()
    }

    pub fn interval(&self) -> Duration {
        self.sequencer().interval()
    }

    /// Ad-hoc command. Polling switches to the fast cadence so the effect
    /// shows up promptly.
    pub async fn command(&self, command: &Command, hosts: &[String]) -> Result<BatchResult> {
        let result = self.controller.command(command, hosts).await;
        self.sequencer().boost();
        self.wake.notify_one();
        result
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    /// Collect and publish a snapshot without touching the sequencer.
    pub async fn refresh(&self) -> Arc<StatusDocument> {
        let doc = self.controller.collect_status().await;
        self.status_tx.send_replace(doc.clone());
        doc
    }

    /// One poll cycle.
    pub async fn tick(&self) -> Step {
        let queued: Vec<Pending> = std::mem::take(&mut *self.pending());
        for batch in queued {
            self.issue(batch.run_id, &batch.actions).await;
            self.sequencer().actions_issued(batch.run_id);
        }

        let doc = self.refresh().await;
        let step = self.sequencer().observe(&doc);
        if let Step::Advanced {
            run_id,
            ref actions,
            ..
        } = step
        {
            self.issue(run_id, actions).await;
        }
        step
    }

    /// Tick until `shutdown` resolves, sleeping for the current cadence
    /// between ticks.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("status loop started");
        loop {
            let step = tokio::select! {
                _ = &mut shutdown => break,
                step = self.tick() => step,
            };
            debug!(?step, "tick");
            let interval = self.interval();
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(interval) => {}
                _ = self.wake.notified() => {}
            }
        }
        info!("status loop stopped");
    }

    async fn issue(&self, run_id: Uuid, actions: &[StageAction]) {
        for action in actions {
            if !self.sequencer().is_active(run_id) {
                debug!(%run_id, "run superseded, skipping remaining actions");
                return;
            }
            let failures = match self.controller.execute(action).await {
                Ok(result) => result.failures(),
                Err(e) => {
                    warn!(%run_id, error = %e, "stage action failed");
                    vec![e.to_string()]
                }
            };
            if !self.sequencer().record_dispatch(run_id, failures) {
                debug!(%run_id, "discarding results of superseded run");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
