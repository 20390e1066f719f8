use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use skiff_core::protocol::ControlMsg;
use skiff_core::state::TaskState;
use skiff_core::task::{Task, TaskMode};
use skiff_transport::{queue, QueueReceiver};

use crate::context::{AgentContext, TOPIC_CONTROL};
use crate::raptor::worker::Worker;
use crate::raptor::FunctionRegistry;

/// Requests a single worker may have in flight before dispatch moves on.
const WORKER_QUEUE_DEPTH: usize = 64;

struct WorkerHandle {
    tx: mpsc::Sender<Task>,
    join: JoinHandle<()>,
    in_flight: HashSet<String>,
}

/// The raptor master. Consumes the raptor queue: `raptor.master` tasks
/// adopt it, `raptor.worker` tasks add executors, request tasks are
/// dispatched round-robin. Requests arriving before any worker is up
/// wait in a backlog.
pub struct Master {
    ctx: AgentContext,
    functions: Arc<FunctionRegistry>,
    workers: HashMap<String, WorkerHandle>,
    rr: Vec<String>,
    next: usize,
    backlog: VecDeque<Task>,
    cancels: Arc<Mutex<HashSet<String>>>,
    master_uids: Vec<String>,
}

impl Master {
    pub fn new(ctx: AgentContext, functions: FunctionRegistry) -> Self {
        Self {
            ctx,
            functions: Arc::new(functions),
            workers: HashMap::new(),
            rr: Vec::new(),
            next: 0,
            backlog: VecDeque::new(),
            cancels: Arc::new(Mutex::new(HashSet::new())),
            master_uids: Vec::new(),
        }
    }

    pub async fn run(mut self, rx: QueueReceiver<Task>) {
        let mut control_sub = self.ctx.control.subscribe(&[TOPIC_CONTROL]);
        let (done_tx, done_rx) = queue::<(String, String)>("raptor_done", 256);

        loop {
            tokio::select! {
                msg = control_sub.recv() => match msg {
                    Some(ControlMsg::CancelTasks { uids }) => self.cancel(&uids).await,
                    Some(_) | None => break,
                },
                done = done_rx.get() => {
                    if let Some((worker_uid, task_uid)) = done {
                        if let Some(w) = self.workers.get_mut(&worker_uid) {
                            w.in_flight.remove(&task_uid);
                        }
                    }
                },
                task = rx.get() => match task {
                    Some(task) => self.intake(task, &done_tx).await,
                    None => break,
                },
            }
        }
        self.shutdown().await;
    }

    async fn intake(&mut self, mut task: Task, done_tx: &skiff_transport::QueueSender<(String, String)>) {
        match task.description.mode {
            TaskMode::Master => {
                info!(uid = %task.uid, "raptor master adopted");
                self.ctx.advance(&mut task, TaskState::AgentExecuting, None).await;
                self.master_uids.push(task.uid.clone());
            }
            TaskMode::Worker => {
                info!(uid = %task.uid, "raptor worker starting");
                self.ctx.advance(&mut task, TaskState::AgentExecuting, None).await;
                let (tx, worker_rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
                let worker = Worker::new(
                    task.uid.clone(),
                    self.ctx.clone(),
                    self.functions.clone(),
                    self.cancels.clone(),
                    done_tx.clone(),
                );
                let join = tokio::spawn(worker.run(worker_rx));
                self.workers.insert(
                    task.uid.clone(),
                    WorkerHandle {
                        tx,
                        join,
                        in_flight: HashSet::new(),
                    },
                );
                self.rr.push(task.uid.clone());
                self.drain_backlog().await;
            }
            mode if mode.is_raptor_request() => {
                self.backlog.push_back(task);
                self.drain_backlog().await;
            }
            _ => {
                self.ctx
                    .fail(&mut task, "not a raptor task".to_string())
                    .await;
            }
        }
    }

    async fn drain_backlog(&mut self) {
        while !self.backlog.is_empty() && !self.rr.is_empty() {
            let task = self.backlog.pop_front().expect("backlog underflow");
            self.dispatch(task).await;
        }
    }

    /// Round-robin over live workers. A closed worker channel means the
    /// worker died: its in-flight requests are failed and it leaves the
    /// rotation; the request itself survives and moves to the next
    /// worker.
    async fn dispatch(&mut self, mut task: Task) {
        loop {
            if self.rr.is_empty() {
                warn!("no raptor worker available, backlogging request");
                self.backlog.push_front(task);
                return;
            }
            self.next %= self.rr.len();
            let worker_uid = self.rr[self.next].clone();
            self.next += 1;

            let Some(handle) = self.workers.get(&worker_uid) else {
                self.rr.retain(|u| u != &worker_uid);
                continue;
            };
            let tx = handle.tx.clone();
            let uid = task.uid.clone();
            match tx.send(task).await {
                Ok(()) => {
                    if let Some(handle) = self.workers.get_mut(&worker_uid) {
                        handle.in_flight.insert(uid);
                    }
                    return;
                }
                Err(send_err) => {
                    warn!(worker = %worker_uid, "raptor worker lost");
                    self.fail_worker(&worker_uid).await;
                    task = send_err.0;
                }
            }
        }
    }

    async fn fail_worker(&mut self, worker_uid: &str) {
        let Some(handle) = self.workers.remove(worker_uid) else {
            return;
        };
        self.rr.retain(|u| u != worker_uid);
        handle.join.abort();
        for uid in handle.in_flight {
            let mut ghost = Task::new(uid, Default::default());
            self.ctx
                .fail(&mut ghost, format!("raptor worker {worker_uid} lost"))
                .await;
        }
    }

    async fn cancel(&mut self, uids: &[String]) {
        // Backlogged requests cancel immediately; dispatched ones are
        // flagged and the owning worker drops them before execution.
        let n = self.backlog.len();
        for _ in 0..n {
            let mut task = self.backlog.pop_front().expect("backlog underflow");
            if uids.contains(&task.uid) {
                self.ctx.advance(&mut task, TaskState::Canceled, None).await;
            } else {
                self.backlog.push_back(task);
            }
        }
        let mut cancels = self.cancels.lock().unwrap();
        for uid in uids {
            cancels.insert(uid.clone());
        }
    }

    async fn shutdown(&mut self) {
        for (_, handle) in self.workers.drain() {
            handle.join.abort();
        }
        for uid in std::mem::take(&mut self.master_uids) {
            let mut task = Task::new(uid, Default::default());
            task.state = TaskState::AgentExecuting;
            self.ctx.advance(&mut task, TaskState::Done, None).await;
        }
        while let Some(mut task) = self.backlog.pop_front() {
            self.ctx.advance(&mut task, TaskState::Canceled, None).await;
        }
    }
}
