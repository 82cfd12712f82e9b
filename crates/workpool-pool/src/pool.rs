//! Pool manager: admission control, warm spares, recycling.

use tracing::{debug, warn};

use crate::error::{PoolError, Result};
use crate::worker::{PoolWorker, WorkerCommand};

/// Sizing and spawn configuration for a [`ProcessPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Workers spawned up front when the pool is created.
    pub min_workers: usize,
    /// Hard cap on concurrently running workers (checked out + spare).
    pub max_workers: usize,
    /// Cap on idle spares kept warm; released workers beyond this are
    /// retired.
    pub max_spare_workers: usize,
    /// Command line each worker runs.
    pub command: WorkerCommand,
}

impl PoolConfig {
    pub fn new(
        min_workers: usize,
        max_workers: usize,
        max_spare_workers: usize,
        command: WorkerCommand,
    ) -> Self {
        Self {
            min_workers,
            max_workers,
            max_spare_workers,
            command,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(PoolError::Configuration(
                "max_workers must be at least 1".into(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(PoolError::Configuration(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.max_spare_workers < self.min_workers {
            return Err(PoolError::Configuration(format!(
                "max_spare_workers ({}) is below min_workers ({})",
                self.max_spare_workers, self.min_workers
            )));
        }
        if self.max_spare_workers > self.max_workers {
            return Err(PoolError::Configuration(format!(
                "max_spare_workers ({}) exceeds max_workers ({})",
                self.max_spare_workers, self.max_workers
            )));
        }
        Ok(())
    }
}

/// Bounded pool of reusable worker subprocesses.
///
/// `running` holds a clone of every checked-out handle so shutdown can
/// reach workers the caller still owns. `spare` is a LIFO stack: the most
/// recently released worker is handed out first, keeping a small hot set
/// busy while extra spares go cold and get retired by the spare cap.
pub struct ProcessPool {
    config: PoolConfig,
    running: Vec<PoolWorker>,
    spare: Vec<PoolWorker>,
    next_id: u64,
    shut_down: bool,
}

impl ProcessPool {
    /// Validate the configuration and eagerly spawn `min_workers` spares.
    ///
    /// Fails fast: if any initial spawn fails, the already-spawned workers
    /// are closed and the error is returned.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let mut pool = Self {
            config,
            running: Vec::new(),
            spare: Vec::new(),
            next_id: 0,
            shut_down: false,
        };
        for _ in 0..pool.config.min_workers {
            match pool.spawn_worker() {
                Ok(worker) => pool.spare.push(worker),
                Err(err) => {
                    pool.shut_down();
                    return Err(err);
                }
            }
        }
        debug!(
            spares = pool.spare.len(),
            max = pool.config.max_workers,
            command = %pool.config.command.display(),
            "process pool started"
        );
        Ok(pool)
    }

    /// Check a worker out of the pool.
    ///
    /// Prefers the most recently released spare; spawns a fresh worker if
    /// none is spare and the pool is under its cap. A spare that produced
    /// output while idle is out of protocol sync: it is discarded, a
    /// replacement spare is spawned, and [`PoolError::OutputBeforeStarting`]
    /// reports the stray lines — a retry gets a clean worker.
    pub fn start_process(&mut self) -> Result<PoolWorker> {
        while let Some(worker) = self.spare.pop() {
            if !worker.is_running() || worker.has_failed() {
                // Died while idle; drop it silently and try the next one.
                debug!(worker = worker.id(), "discarding dead spare");
                worker.close();
                continue;
            }
            match worker.take_stray_output()? {
                None => {
                    self.running.push(worker.clone());
                    return Ok(worker);
                }
                Some((stdout_lines, stderr_lines)) => {
                    warn!(
                        worker = worker.id(),
                        stdout = stdout_lines.len(),
                        stderr = stderr_lines.len(),
                        "spare worker produced output while idle; replacing it"
                    );
                    worker.close();
                    self.replace_spare();
                    return Err(PoolError::OutputBeforeStarting {
                        stdout_lines,
                        stderr_lines,
                    });
                }
            }
        }

        if self.running.len() >= self.config.max_workers {
            return Err(PoolError::PoolExhausted);
        }
        let worker = self.spawn_worker()?;
        self.running.push(worker.clone());
        Ok(worker)
    }

    /// Check a worker back in.
    ///
    /// Any unread response and pending stderr are drained first so a
    /// recycled worker starts clean. Failed workers are closed and replaced
    /// by a fresh spare; healthy ones are kept warm up to the spare cap and
    /// retired beyond it.
    pub fn release_process(&mut self, worker: PoolWorker) -> Result<()> {
        let position = self
            .running
            .iter()
            .position(|running| running.same_as(&worker))
            .ok_or(PoolError::InvalidProcess)?;
        let worker = self.running.swap_remove(position);

        worker.free_request();

        if worker.has_failed() {
            debug!(worker = worker.id(), "released worker had failed; replacing it");
            worker.close();
            self.replace_spare();
            return Ok(());
        }

        if self.spare.len() < self.config.max_spare_workers {
            self.spare.push(worker);
        } else {
            debug!(worker = worker.id(), "spare cap reached; retiring worker");
            if let Err(err) = worker.send_exit_request() {
                debug!(worker = worker.id(), error = %err, "exit request failed");
            }
            worker.close();
        }
        Ok(())
    }

    /// Lower or raise the spare cap at runtime. Excess spares are retired
    /// immediately, oldest first.
    pub fn set_max_num_spare_processes(&mut self, max_spare_workers: usize) -> Result<()> {
        if max_spare_workers < self.config.min_workers {
            return Err(PoolError::Configuration(format!(
                "max_spare_workers ({}) is below min_workers ({})",
                max_spare_workers, self.config.min_workers
            )));
        }
        if max_spare_workers > self.config.max_workers {
            return Err(PoolError::Configuration(format!(
                "max_spare_workers ({}) exceeds max_workers ({})",
                max_spare_workers, self.config.max_workers
            )));
        }
        self.config.max_spare_workers = max_spare_workers;
        while self.spare.len() > self.config.max_spare_workers {
            let worker = self.spare.remove(0);
            debug!(worker = worker.id(), "retiring excess spare");
            if let Err(err) = worker.send_exit_request() {
                debug!(worker = worker.id(), error = %err, "exit request failed");
            }
            worker.close();
        }
        Ok(())
    }

    /// Terminate every worker, including ones currently checked out.
    /// Idempotent; also runs on drop.
    pub fn shut_down(&mut self) {
        if self.shut_down && self.running.is_empty() && self.spare.is_empty() {
            return;
        }
        self.shut_down = true;
        for worker in self.running.drain(..).chain(self.spare.drain(..)) {
            if !worker.has_failed() {
                if let Err(err) = worker.send_exit_request() {
                    debug!(worker = worker.id(), error = %err, "exit request failed");
                }
            }
            worker.close();
        }
        debug!("process pool shut down");
    }

    /// Number of checked-out workers.
    pub fn num_running_processes(&self) -> usize {
        self.running.len()
    }

    /// Number of warm spares available for checkout.
    pub fn num_unassigned_processes(&self) -> usize {
        self.spare.len()
    }

    fn spawn_worker(&mut self) -> Result<PoolWorker> {
        let id = self.next_id;
        self.next_id += 1;
        debug!(worker = id, "spawning worker");
        PoolWorker::spawn(&self.config.command, id)
    }

    /// Best-effort replacement after discarding a worker: keep the warm
    /// set near its configured size, but never fail the caller's original
    /// operation over it.
    fn replace_spare(&mut self) {
        if self.shut_down || self.spare.len() >= self.config.max_spare_workers {
            return;
        }
        if self.running.len() + self.spare.len() >= self.config.max_workers {
            return;
        }
        match self.spawn_worker() {
            Ok(worker) => self.spare.push(worker),
            Err(err) => warn!(error = %err, "failed to spawn replacement spare"),
        }
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        self.shut_down();
    }
}

impl std::fmt::Debug for ProcessPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessPool")
            .field("running", &self.running.len())
            .field("spare", &self.spare.len())
            .field("max_workers", &self.config.max_workers)
            .field("max_spare_workers", &self.config.max_spare_workers)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}
