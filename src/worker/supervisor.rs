//! Multi-tenant supervisor: one IDLE worker per active tenant.
//!
//! The supervisor owns the worker table; nothing else touches it. It
//! re-reads the registry on a fixed interval to start workers for new
//! tenants and retire workers of removed ones, and restarts crashed
//! workers after a cooldown.
//!
//! A retired worker stays tracked until its task exits. A tenant that comes
//! back in the meantime gets its new worker only after that exit, so one
//! tenant never has two workers touching its mailbox.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::idle::{IdleSettings, run_idle_worker};
use super::Shutdown;
use crate::config::SupervisorConfig;
use crate::error::WorkerError;
use crate::pipeline::panic_message;
use crate::registry::TenantRegistry;
use crate::tenant::RuntimeFactory;

/// Exit notification: tenant id and the incarnation that ended.
type WorkerExit = (String, u64);

struct TrackedWorker {
    /// `None` once the restart limit was hit.
    handle: Option<JoinHandle<Result<(), WorkerError>>>,
    /// Retires this worker without touching the others.
    stop: Shutdown,
    generation: u64,
    restarts: u32,
}

pub struct Supervisor {
    registry: Arc<dyn TenantRegistry>,
    factory: Arc<dyn RuntimeFactory>,
    config: SupervisorConfig,
    shutdown: Shutdown,
    workers: HashMap<String, TrackedWorker>,
    /// Stopped workers whose task has not exited yet.
    retiring: HashMap<String, TrackedWorker>,
    /// Tenants reactivated while their old worker was still retiring.
    awaiting_restart: HashSet<String>,
    next_generation: u64,
    exit_tx: mpsc::UnboundedSender<WorkerExit>,
    exit_rx: mpsc::UnboundedReceiver<WorkerExit>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<dyn TenantRegistry>,
        factory: Arc<dyn RuntimeFactory>,
        config: SupervisorConfig,
        shutdown: Shutdown,
    ) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            registry,
            factory,
            config,
            shutdown,
            workers: HashMap::new(),
            retiring: HashMap::new(),
            awaiting_restart: HashSet::new(),
            next_generation: 0,
            exit_tx,
            exit_rx,
        }
    }

    /// Supervise until shutdown, then stop every worker and wait for them.
    pub async fn run(mut self) {
        info!(
            poll_secs = self.config.registry_poll_interval.as_secs(),
            cooldown_secs = self.config.restart_cooldown.as_secs(),
            "Supervisor started"
        );

        let mut tick = tokio::time::interval(self.config.registry_poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                _ = tick.tick() => self.reconcile().await,
                Some((tenant, generation)) = self.exit_rx.recv() => {
                    self.handle_exit(&tenant, generation).await;
                }
            }
        }

        self.stop_all().await;
        info!("Supervisor stopped");
    }

    /// Match the worker table against the registry's active tenants.
    async fn reconcile(&mut self) {
        let active = match self.registry.list_active().await {
            Ok(active) => active,
            Err(e) => {
                error!(error = %e, "Failed to list active tenants");
                return;
            }
        };
        let active_ids: HashSet<&str> = active.iter().map(|t| t.id.as_str()).collect();

        let removed: Vec<String> = self
            .workers
            .keys()
            .filter(|id| !active_ids.contains(id.as_str()))
            .cloned()
            .collect();
        for id in removed {
            let Some(worker) = self.workers.remove(&id) else {
                continue;
            };
            // In-flight cycles finish; the worker exits at its next wait.
            info!(tenant = %id, "Tenant no longer active, retiring worker");
            worker.stop.trigger();
            if worker.handle.is_some() {
                self.retiring.insert(id, worker);
            }
        }
        self.awaiting_restart
            .retain(|id| active_ids.contains(id.as_str()));

        for tenant in &active {
            if self.workers.contains_key(&tenant.id) {
                continue;
            }
            if self.retiring.contains_key(&tenant.id) {
                if self.awaiting_restart.insert(tenant.id.clone()) {
                    info!(tenant = %tenant.id, "Tenant reactivated, waiting for retiring worker to exit");
                }
                continue;
            }
            info!(tenant = %tenant.id, name = %tenant.name, "Starting worker");
            self.start_worker(&tenant.id);
        }

        info!(
            active = active.len(),
            workers = self.workers.len(),
            retiring = self.retiring.len(),
            "Registry poll complete"
        );
    }

    fn start_worker(&mut self, tenant: &str) {
        let stop = Shutdown::new();
        let generation = self.bump_generation();
        let handle = self.spawn_worker(tenant, stop.clone(), generation, Duration::ZERO);
        self.workers.insert(
            tenant.to_string(),
            TrackedWorker {
                handle: Some(handle),
                stop,
                generation,
                restarts: 0,
            },
        );
    }

    /// Reap a retired worker; start its successor if the tenant came back.
    async fn handle_retired_exit(&mut self, tenant: &str, generation: u64) -> bool {
        let matches = self
            .retiring
            .get(tenant)
            .is_some_and(|w| w.generation == generation);
        if !matches {
            return false;
        }
        if let Some(handle) = self.retiring.remove(tenant).and_then(|w| w.handle)
            && let Err(e) = handle.await
        {
            warn!(tenant = %tenant, error = %e, "Retired worker ended abnormally");
        }
        info!(tenant = %tenant, "Retired worker exited");

        if self.awaiting_restart.remove(tenant) && !self.shutdown.is_triggered() {
            info!(tenant = %tenant, "Starting worker");
            self.start_worker(tenant);
        }
        true
    }

    async fn handle_exit(&mut self, tenant: &str, generation: u64) {
        if self.handle_retired_exit(tenant, generation).await {
            return;
        }
        let Some(worker) = self.workers.get_mut(tenant) else {
            return;
        };
        if worker.generation != generation {
            return;
        }
        let Some(handle) = worker.handle.take() else {
            return;
        };

        match handle.await {
            Ok(Ok(())) => warn!(tenant = %tenant, "Worker exited"),
            Ok(Err(e)) => error!(tenant = %tenant, error = %e, "Worker crashed"),
            Err(e) if e.is_panic() => {
                let e = WorkerError::Panicked {
                    tenant: tenant.to_string(),
                    reason: panic_message(&*e.into_panic()),
                };
                error!(tenant = %tenant, error = %e, "Worker crashed");
            }
            Err(e) => error!(tenant = %tenant, error = %e, "Worker task failed"),
        }

        if self.shutdown.is_triggered() {
            return;
        }

        if let Some(max) = self.config.max_restarts
            && worker.restarts >= max
        {
            let e = WorkerError::RestartLimit {
                tenant: tenant.to_string(),
                max,
            };
            error!(tenant = %tenant, error = %e, "Not restarting worker");
            return;
        }

        worker.restarts += 1;
        let restarts = worker.restarts;
        let stop = worker.stop.clone();
        let generation = self.bump_generation();
        let cooldown = self.config.restart_cooldown;
        info!(
            tenant = %tenant,
            restarts,
            cooldown_secs = cooldown.as_secs(),
            "Restarting worker after cooldown"
        );
        let handle = self.spawn_worker(tenant, stop, generation, cooldown);

        if let Some(worker) = self.workers.get_mut(tenant) {
            worker.handle = Some(handle);
            worker.generation = generation;
        }
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn spawn_worker(
        &self,
        tenant: &str,
        stop: Shutdown,
        generation: u64,
        delay: Duration,
    ) -> JoinHandle<Result<(), WorkerError>> {
        let tenant = tenant.to_string();
        let factory = Arc::clone(&self.factory);
        let settings = IdleSettings::from(&self.config);
        let shutdown = self.shutdown.clone();
        let exit_tx = self.exit_tx.clone();

        tokio::spawn(async move {
            let notify = ExitNotifier {
                tx: exit_tx,
                exit: Some((tenant.clone(), generation)),
            };

            if !delay.is_zero() {
                tokio::select! {
                    _ = stop.wait() => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let result = match factory.build(&tenant).await {
                Ok(runtime) => run_idle_worker(runtime, settings, stop, shutdown).await,
                Err(e) => Err(WorkerError::Failed {
                    tenant: tenant.clone(),
                    reason: e.to_string(),
                }),
            };
            drop(notify);
            result
        })
    }

    async fn stop_all(&mut self) {
        self.awaiting_restart.clear();
        let handles: Vec<_> = self
            .workers
            .drain()
            .chain(self.retiring.drain())
            .filter_map(|(_, worker)| {
                worker.stop.trigger();
                worker.handle
            })
            .collect();
        info!(workers = handles.len(), "Stopping workers");
        futures::future::join_all(handles).await;
    }
}

/// Reports the worker's end to the supervisor on drop, including on panic.
struct ExitNotifier {
    tx: mpsc::UnboundedSender<WorkerExit>,
    exit: Option<WorkerExit>,
}

impl Drop for ExitNotifier {
    fn drop(&mut self) {
        if let Some(exit) = self.exit.take() {
            let _ = self.tx.send(exit);
        }
    }
}
