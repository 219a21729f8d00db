//! Render worker pool
//!
//! A fixed set of long-lived worker processes sits behind a single async
//! `render` call:
//! - a semaphore with one permit per worker is the only admission control;
//!   callers beyond that wait on it
//! - the idle list is a plain mutex-guarded `Vec`, locked only to pop or push
//!   one worker, so "pick a worker" and "return it" are each atomic
//! - every round trip runs under a timeout; a worker that times out, dies or
//!   breaks the framing is killed and its slot respawned
//!
//! If a respawn fails the slot's permit is forgotten, so the semaphore never
//! admits more callers than there are workers left.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, info, warn};

use super::framing::read_frame;
use super::job::RenderJob;
use crate::config::RenderSettings;
use crate::utils::{Error, Result};

/// How to launch one worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// This executable, run with the `worker` subcommand.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg("worker"))
    }

    pub fn from_settings(settings: &RenderSettings) -> Result<Self> {
        match &settings.worker_program {
            Some(program) => Ok(Self::new(program.clone())),
            None => Self::current_exe(),
        }
    }
}

struct Worker {
    id: usize,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Worker {
    fn spawn(command: &WorkerCommand, id: usize) -> Result<Self> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::WorkerFailed(format!("worker {id} has no stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::WorkerFailed(format!("worker {id} has no stdout")))?;

        debug!(worker = id, pid = ?child.id(), "render worker started");
        Ok(Self {
            id,
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn round_trip(&mut self, line: &[u8], max_frame: usize) -> Result<Option<Vec<u8>>> {
        let id = self.id;
        let broken = |e: std::io::Error| Error::WorkerFailed(format!("worker {id}: {e}"));

        self.stdin.write_all(line).await.map_err(broken)?;
        self.stdin.flush().await.map_err(broken)?;
        read_frame(&mut self.stdout, max_frame).await
    }

    fn kill(mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(worker = self.id, error = %e, "render worker already gone");
        }
    }
}

pub struct RenderWorkerPool {
    command: WorkerCommand,
    idle: Mutex<Vec<Worker>>,
    gate: Semaphore,
    size: usize,
    timeout: Duration,
    max_frame_bytes: usize,
}

impl RenderWorkerPool {
    /// Spawn `settings.workers` workers. Must be called inside a tokio
    /// runtime.
    pub fn start(command: WorkerCommand, settings: &RenderSettings) -> Result<Self> {
        if settings.workers == 0 {
            return Err(Error::InvalidInput("render pool needs at least one worker".into()));
        }

        let workers = (0..settings.workers)
            .map(|id| Worker::spawn(&command, id))
            .collect::<Result<Vec<_>>>()?;
        info!(workers = workers.len(), program = %command.program.display(), "render pool started");

        Ok(Self {
            command,
            idle: Mutex::new(workers),
            gate: Semaphore::new(settings.workers),
            size: settings.workers,
            timeout: settings.timeout(),
            max_frame_bytes: settings.max_frame_bytes,
        })
    }

    /// Render one job on the next free worker and return the JPEG bytes.
    ///
    /// Waits while every worker is busy. Dropping the returned future while
    /// a job is in flight replaces that worker, since its output stream is
    /// left mid-frame.
    pub async fn render(&self, job: &RenderJob) -> Result<Vec<u8>> {
        let line = job.to_line()?;

        let permit = self.gate.acquire().await.map_err(|_| Error::PoolClosed)?;
        let mut lease = self.checkout(permit)?;
        let Some(worker) = lease.worker.as_mut() else {
            return Err(Error::PoolClosed);
        };
        let id = worker.id;

        match tokio::time::timeout(self.timeout, worker.round_trip(&line, self.max_frame_bytes))
            .await
        {
            Ok(Ok(Some(image))) => {
                lease.healthy = true;
                Ok(image)
            }
            Ok(Ok(None)) => {
                lease.healthy = true;
                Err(Error::WorkerFailed(format!("worker {id} could not render the job")))
            }
            Ok(Err(e)) => {
                warn!(worker = id, error = %e, "render failed");
                Err(e)
            }
            Err(_) => {
                warn!(worker = id, timeout = ?self.timeout, "render timed out");
                Err(Error::RenderTimeout(self.timeout))
            }
        }
    }

    fn checkout<'a>(&'a self, permit: SemaphorePermit<'a>) -> Result<Lease<'a>> {
        let worker = self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        match worker {
            Some(worker) => Ok(Lease {
                pool: self,
                worker: Some(worker),
                permit: Some(permit),
                healthy: false,
            }),
            None if self.gate.is_closed() => Err(Error::PoolClosed),
            None => Err(Error::WorkerFailed("no idle worker behind a free permit".into())),
        }
    }

    fn release(&self, worker: Worker) {
        self.idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(worker);
    }

    /// Terminate every idle worker and refuse new work. Jobs in flight finish
    /// (or fail) and their workers are terminated on return.
    pub fn stop(&self) -> usize {
        self.gate.close();
        let workers = std::mem::take(&mut *self.idle.lock().unwrap_or_else(|e| e.into_inner()));
        let stopped = workers.len();
        for worker in workers {
            worker.kill();
        }
        info!(stopped, "render pool stopped");
        stopped
    }

    /// Number of worker slots the pool was started with.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Calls that could start right now without waiting.
    pub fn available(&self) -> usize {
        self.gate.available_permits()
    }

    pub fn idle_workers(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl std::fmt::Debug for RenderWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderWorkerPool")
            .field("command", &self.command)
            .field("size", &self.size)
            .field("available", &self.available())
            .finish()
    }
}

/// One checked-out worker plus the permit that admitted its caller.
///
/// Dropping the lease hands the worker back (or replaces it) before the
/// permit is released, so a woken waiter always finds an idle worker.
struct Lease<'a> {
    pool: &'a RenderWorkerPool,
    worker: Option<Worker>,
    permit: Option<SemaphorePermit<'a>>,
    healthy: bool,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.pool.gate.is_closed() {
            worker.kill();
            return;
        }
        if self.healthy {
            self.pool.release(worker);
            return;
        }

        let id = worker.id;
        worker.kill();
        // spawning needs a reactor; at runtime teardown just let the slot go
        let respawned = match tokio::runtime::Handle::try_current() {
            Ok(_) => Worker::spawn(&self.pool.command, id),
            Err(e) => Err(Error::WorkerFailed(e.to_string())),
        };
        match respawned {
            Ok(fresh) => {
                info!(worker = id, "render worker respawned");
                self.pool.release(fresh);
            }
            Err(e) => {
                error!(worker = id, error = %e, "render worker respawn failed, pool shrinks");
                if let Some(permit) = self.permit.take() {
                    permit.forget();
                }
            }
        }
    }
}
