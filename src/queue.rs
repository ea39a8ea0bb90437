use crate::config::LightingConfig;
use crate::controller::LightController;
use crate::error::{LightingError, Result};
use crate::types::{Device, PowerState, SwitchReport};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

/// A unit of queued work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Discover,
    Switch { names: String, state: PowerState },
}

impl Task {
    fn kind(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Switch { .. } => "switch",
        }
    }
}

/// What a finished task produced
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    Devices(Vec<Device>),
    Switched(SwitchReport),
}

/// Executes tasks on behalf of the queue worker
pub trait TaskRunner: Send + 'static {
    fn run(&mut self, task: Task) -> BoxFuture<'_, Result<TaskOutput>>;

    /// Release resources once the queue has drained
    fn shutdown(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

impl TaskRunner for LightController {
    fn run(&mut self, task: Task) -> BoxFuture<'_, Result<TaskOutput>> {
        Box::pin(async move {
            match task {
                Task::Discover => self.discover_devices().await.map(TaskOutput::Devices),
                Task::Switch { names, state } => {
                    self.switch(&names, state).await.map(TaskOutput::Switched)
                }
            }
        })
    }

    fn shutdown(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(LightController::shutdown(self))
    }
}

struct Job {
    id: Uuid,
    task: Task,
    reply: oneshot::Sender<Result<TaskOutput>>,
}

/// Pending reply for a pushed task
#[derive(Debug)]
pub struct TaskTicket {
    id: Uuid,
    rx: oneshot::Receiver<Result<TaskOutput>>,
}

impl TaskTicket {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the task's single reply
    pub async fn wait(self) -> Result<TaskOutput> {
        self.rx.await.unwrap_or(Err(LightingError::QueueClosed))
    }
}

/// FIFO of tasks drained by a single worker
///
/// Every task shares one session and one channel table, so tasks never
/// overlap: task N+1 starts only after task N has replied.
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<Job>,
    depth: Arc<AtomicUsize>,
    backlog_warn_threshold: usize,
    worker: JoinHandle<()>,
}

impl CommandQueue {
    /// Build a [`LightController`] from configuration and start its worker
    pub fn start(config: &LightingConfig) -> Result<Self> {
        let controller = LightController::new(config)?;
        Ok(Self::spawn(controller, config.backlog_warn_threshold))
    }

    /// Start a worker around any runner
    pub fn spawn<R: TaskRunner>(runner: R, backlog_warn_threshold: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(run_worker(runner, rx, depth.clone()));

        Self {
            tx,
            depth,
            backlog_warn_threshold,
            worker,
        }
    }

    /// Append a task; its reply arrives on the returned ticket exactly once
    pub fn push(&self, task: Task) -> TaskTicket {
        let id = Uuid::new_v4();
        let (reply, rx) = oneshot::channel();

        let waiting = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if waiting > self.backlog_warn_threshold {
            tracing::warn!("Action will be delayed: {} items in queue", waiting);
        }

        if let Err(mpsc::error::SendError(job)) = self.tx.send(Job { id, task, reply }) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            let _ = job.reply.send(Err(LightingError::QueueClosed));
        }

        TaskTicket { id, rx }
    }

    /// Tasks pushed but not yet started
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Discover every light on the account
    pub async fn discover(&self) -> Result<Vec<Device>> {
        match self.push(Task::Discover).wait().await? {
            TaskOutput::Devices(devices) => Ok(devices),
            other => Err(unexpected(&other)),
        }
    }

    /// Switch one or more comma-separated light names
    pub async fn switch(&self, names: &str, state: PowerState) -> Result<SwitchReport> {
        let task = Task::Switch {
            names: names.to_string(),
            state,
        };
        match self.push(task).wait().await? {
            TaskOutput::Switched(report) => Ok(report),
            other => Err(unexpected(&other)),
        }
    }

    /// Stop accepting work, let queued tasks finish, then release the runner
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            tracing::error!("Queue worker ended abnormally: {}", e);
        }
    }
}

fn unexpected(output: &TaskOutput) -> LightingError {
    LightingError::Protocol(format!("unexpected task output: {output:?}"))
}

async fn run_worker<R: TaskRunner>(
    mut runner: R,
    mut rx: mpsc::UnboundedReceiver<Job>,
    depth: Arc<AtomicUsize>,
) {
    while let Some(job) = rx.recv().await {
        depth.fetch_sub(1, Ordering::SeqCst);
        let span = tracing::info_span!("task", id = %job.id, kind = job.task.kind());

        let outcome = AssertUnwindSafe(runner.run(job.task))
            .catch_unwind()
            .instrument(span)
            .await
            .unwrap_or_else(|_| Err(LightingError::TaskPanicked));

        if job.reply.send(outcome).is_err() {
            tracing::debug!("Caller of task {} stopped waiting", job.id);
        }
    }

    runner.shutdown().await;
    tracing::debug!("Queue worker stopped");
}
