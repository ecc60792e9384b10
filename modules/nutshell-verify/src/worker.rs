use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use nutshell_common::VerificationTask;

use crate::engine::{VerificationEngine, VerificationRun};

/// Node id → whether another run was requested while one is in flight.
type InFlight = Arc<Mutex<HashMap<Uuid, bool>>>;

/// Consumes verification tasks. Nodes verify in parallel up to the configured
/// limit; a node never has two runs in flight, and tasks arriving during a run
/// collapse into a single follow-up run.
pub struct VerificationWorker {
    engine: Arc<VerificationEngine>,
    semaphore: Arc<Semaphore>,
    in_flight: InFlight,
}

impl VerificationWorker {
    pub fn new(engine: Arc<VerificationEngine>) -> Self {
        let permits = engine.config().max_concurrent.max(1);
        Self {
            engine,
            semaphore: Arc::new(Semaphore::new(permits)),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run until the task channel closes and every started run has finished.
    pub async fn run(self, mut tasks: mpsc::UnboundedReceiver<VerificationTask>) {
        info!(
            max_concurrent = self.semaphore.available_permits(),
            "Verification worker started"
        );
        let mut running = JoinSet::new();
        loop {
            tokio::select! {
                task = tasks.recv() => match task {
                    Some(task) => self.dispatch(task, &mut running),
                    None => break,
                },
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Verification task panicked");
                    }
                }
            }
        }
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Verification task panicked");
            }
        }
        info!("Verification worker stopped");
    }

    fn dispatch(&self, task: VerificationTask, running: &mut JoinSet<()>) {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(rerun) = in_flight.get_mut(&task.node_id) {
                debug!(node_id = %task.node_id, "Verification in flight, queueing one re-run");
                *rerun = true;
                return;
            }
            in_flight.insert(task.node_id, false);
        }
        running.spawn(drive(
            self.engine.clone(),
            self.semaphore.clone(),
            self.in_flight.clone(),
            task.node_id,
        ));
    }
}

async fn drive(
    engine: Arc<VerificationEngine>,
    semaphore: Arc<Semaphore>,
    in_flight: InFlight,
    node_id: Uuid,
) {
    loop {
        let stale = {
            let Ok(_permit) = semaphore.acquire().await else {
                break;
            };
            match engine.verify_node(node_id).await {
                Ok(VerificationRun::Stale) => true,
                Ok(run) => {
                    debug!(%node_id, ?run, "Verification run finished");
                    false
                }
                Err(e) => {
                    warn!(%node_id, error = %e, "Verification run failed");
                    false
                }
            }
        };

        let mut guard = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let requested = guard.get(&node_id).copied().unwrap_or(false);
        if stale || requested {
            guard.insert(node_id, false);
            continue;
        }
        guard.remove(&node_id);
        return;
    }
    in_flight
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&node_id);
}
