// src/engine/job.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backend::{make_backend, Backend};
use crate::config::model::{Defaults, TaskConfig};
use crate::dag::{build_objects, BackupObject, DepResolver, ObjId, ObjectGroup};
use crate::errors::{BackdagError, Result};
use crate::exec::{run_pipeline, ExecUnit, RunContext};

/// Result of one dispatched pipeline run. The object identity comes back
/// even when the pipeline failed, so the loop can keep its bookkeeping
/// straight while the failure propagates.
type RunOutcome = (ObjId, Result<()>);

/// One backup job: an object arena, its dependency resolver, and the
/// backend session the pipelines commit into.
pub struct BackupJob {
    objects: Arc<Vec<BackupObject>>,
    groups: Vec<ObjectGroup>,
    resolver: DepResolver,
    backend: Arc<dyn Backend>,
    /// Worker pool bound; `None` means unbounded.
    workers: Option<usize>,
    ctx: RunContext,
}

impl BackupJob {
    /// Build a job from a validated `[task.<id>]` section.
    pub fn from_config(
        task: &TaskConfig,
        catalog: &BTreeMap<String, ExecUnit>,
        defaults: &Defaults,
        ctx: RunContext,
        workers: i64,
    ) -> Result<Self> {
        let backend = make_backend(&task.backend, &task.backend_param)?;
        let (objects, groups) = build_objects(task, catalog, defaults)?;
        let resolver = DepResolver::build(&groups)?;

        Ok(Self {
            objects: Arc::new(objects),
            groups,
            resolver,
            backend: Arc::from(backend),
            workers: resolve_workers(workers),
            ctx,
        })
    }

    /// Run the job inside the backend's transactional scope.
    ///
    /// `rotate` on success; `rollback` when the loop or `rotate` itself
    /// failed; `close` always, as the final step.
    pub async fn run(mut self) -> Result<()> {
        info!(
            backend = self.backend.name(),
            objects = self.objects.len(),
            "starting backup job"
        );
        self.backend.open()?;

        let outcome = match self.run_objects().await {
            Ok(()) => self.backend.rotate(),
            Err(e) => Err(e),
        };
        let outcome = match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "job failed; rolling back backend session");
                self.backend.rollback();
                Err(e)
            }
        };

        let closed = self.backend.close();
        match outcome {
            Err(e) => Err(e),
            Ok(()) => closed,
        }
    }

    /// The dispatch loop.
    ///
    /// Dispatches every ready object, blocks until at least one in-flight
    /// run completes (keeping the pool saturated instead of batching by
    /// wavefront), reports completions back to the resolver, and repeats
    /// until both the ready queue and the blocked map are empty. Everything
    /// still in flight afterwards is awaited - also on the failure path, so
    /// no spawned process is ever abandoned.
    async fn run_objects(&mut self) -> Result<()> {
        let limiter = self.workers.map(|n| Arc::new(Semaphore::new(n)));
        let mut inflight: JoinSet<RunOutcome> = JoinSet::new();
        let mut failure: Option<BackdagError> = None;

        'run: while self.resolver.has_ready() || self.resolver.has_blocked() {
            if inflight.is_empty() && !self.resolver.has_ready() {
                // Nothing running, nothing runnable, objects still blocked.
                failure = Some(BackdagError::InvalidDependencyTree);
                break 'run;
            }

            for id in self.resolver.take_ready() {
                self.dispatch(id, &mut inflight, limiter.clone());
            }

            let Some(joined) = inflight.join_next().await else {
                continue;
            };
            if let Err(e) = self.reap(joined) {
                failure = Some(e);
                break 'run;
            }
            // Reap anything else that already finished without blocking.
            while let Some(joined) = inflight.try_join_next() {
                if let Err(e) = self.reap(joined) {
                    failure = Some(e);
                    break 'run;
                }
            }
        }

        // Drain. Sibling runs are not cancelled by a failure; they are
        // awaited here and their results only count when the run is still
        // clean.
        while let Some(joined) = inflight.join_next().await {
            match self.reap(joined) {
                Ok(()) => {}
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn dispatch(
        &self,
        id: ObjId,
        inflight: &mut JoinSet<RunOutcome>,
        limiter: Option<Arc<Semaphore>>,
    ) {
        debug!(object = %self.objects[id.index()].path, "dispatching object");

        let objects = Arc::clone(&self.objects);
        let backend = Arc::clone(&self.backend);
        let ctx = self.ctx;

        inflight.spawn(async move {
            let _permit = match limiter {
                Some(sem) => sem.acquire_owned().await.ok(),
                None => None,
            };
            let obj = &objects[id.index()];
            let outcome = run_object(&ctx, obj, backend.as_ref()).await;
            (id, outcome)
        });
    }

    /// Handle one completed run: propagate its failure, or mark the object
    /// fulfilled, which may move newly unblocked objects into the ready
    /// queue.
    fn reap(
        &mut self,
        joined: std::result::Result<RunOutcome, tokio::task::JoinError>,
    ) -> Result<()> {
        let (id, outcome) = joined.map_err(|e| anyhow::anyhow!("pipeline task panicked: {e}"))?;
        outcome?;
        debug!(object = %self.objects[id.index()].path, "reaping completed object");
        self.resolver.mark_fulfilled(id);
        Ok(())
    }

    /// Human-readable job plan for dry runs and `config` output.
    pub fn plan(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("backend: {}\n", self.backend.name()));
        out.push_str(&format!(
            "workers: {}\n",
            match self.workers {
                Some(n) => n.to_string(),
                None => "unbounded".to_string(),
            }
        ));
        for obj in self.objects.iter() {
            let stages: Vec<String> = obj.pipeline.iter().map(|u| u.to_string()).collect();
            out.push_str(&format!(
                "  [{}] {} > {}\n",
                self.groups[obj.group].id,
                stages.join(" | "),
                obj.path
            ));
        }
        out
    }
}

/// Run one object's pipeline against the open backend session.
async fn run_object(ctx: &RunContext, obj: &BackupObject, backend: &dyn Backend) -> Result<()> {
    let sink = backend.sink(&obj.path)?;
    run_pipeline(ctx, &obj.pipeline, &sink).await
}

/// `0` means available parallelism, negative means unbounded.
fn resolve_workers(setting: i64) -> Option<usize> {
    match setting {
        0 => Some(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        ),
        n if n < 0 => None,
        n => Some(n as usize),
    }
}
