//! The scheduler component: sole owner of the resource map. Tasks come
//! in over the scheduling queue, leave with slots attached over the
//! executor queue, and pend in FIFO order when the free map cannot take
//! them. Unschedule events return slots and re-drive the pending list in
//! one pass; there is no reordering and head-of-line blocking is
//! accepted.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use skiff_core::protocol::ControlMsg;
use skiff_core::state::TaskState;
use skiff_core::task::Task;
use skiff_scheduler::{Placement, Placer, Request, ResourceMap};
use skiff_transport::{QueueReceiver, QueueSender};

use crate::context::{AgentContext, TOPIC_CONTROL, TOPIC_UNSCHEDULE};

pub struct Scheduler {
    ctx: AgentContext,
    placer: Box<dyn Placer>,
    map: ResourceMap,
    pending: VecDeque<Task>,
    exec_tx: QueueSender<Task>,
}

impl Scheduler {
    pub fn new(
        ctx: AgentContext,
        placer: Box<dyn Placer>,
        map: ResourceMap,
        exec_tx: QueueSender<Task>,
    ) -> Self {
        Self {
            ctx,
            placer,
            map,
            pending: VecDeque::new(),
            exec_tx,
        }
    }

    pub async fn run(mut self, sched_rx: QueueReceiver<Task>) {
        let mut unschedule_sub = self.ctx.unschedule.subscribe(&[TOPIC_UNSCHEDULE]);
        let mut control_sub = self.ctx.control.subscribe(&[TOPIC_CONTROL]);
        let bulk = self.ctx.cfg.bulk_size;

        info!(
            nodes = self.map.node_count(),
            cores = self.map.usable_cores(),
            placer = self.placer.name(),
            "scheduler up"
        );

        loop {
            tokio::select! {
                msg = control_sub.recv() => match msg {
                    Some(ControlMsg::CancelTasks { uids }) => self.cancel_pending(&uids).await,
                    Some(_) | None => break,
                },
                msg = unschedule_sub.recv() => {
                    if let Some(un) = msg {
                        debug!(uid = %un.uid, "slots released");
                        self.map.release(&un.slots);
                        self.redrive().await;
                    }
                },
                tasks = sched_rx.get_bulk(bulk) => match tasks {
                    Some(tasks) => {
                        for task in tasks {
                            self.intake(task).await;
                        }
                    }
                    None => break,
                },
            }
        }

        // Orderly shutdown: whatever still pends is canceled.
        while let Some(mut task) = self.pending.pop_front() {
            self.ctx.advance(&mut task, TaskState::Canceled, None).await;
        }
    }

    async fn intake(&mut self, mut task: Task) {
        self.ctx.advance(&mut task, TaskState::AgentScheduling, None).await;
        self.try_place(task).await;
    }

    /// Attempt one placement; forward, pend or fail.
    async fn try_place(&mut self, mut task: Task) {
        let req = Request::from_description(&task.description);
        match self.placer.place(&req, &self.map) {
            Placement::Slots(slots) => {
                if let Err(e) = self.map.acquire(&slots) {
                    // The placer proposed non-free slots; that is a bug,
                    // not a task error, but the task must not hang.
                    warn!(uid = %task.uid, "placement rejected by map: {e}");
                    self.pending.push_back(task);
                    return;
                }
                debug!(uid = %task.uid, ranks = slots.len(), "placed");
                task.slots = Some(slots);
                self.ctx
                    .advance(&mut task, TaskState::AgentExecutingPending, None)
                    .await;
                if self.exec_tx.put(task).await.is_err() {
                    warn!("executor queue closed");
                }
            }
            Placement::Defer => {
                debug!(uid = %task.uid, "deferred");
                self.pending.push_back(task);
            }
            Placement::Never(reason) => {
                self.ctx
                    .fail(&mut task, format!("Unschedulable: {reason}"))
                    .await;
            }
        }
    }

    /// One FIFO pass over the pending list after slots came back.
    async fn redrive(&mut self) {
        let n = self.pending.len();
        for _ in 0..n {
            let task = self.pending.pop_front().expect("pending underflow");
            self.try_place(task).await;
        }
    }

    async fn cancel_pending(&mut self, uids: &[String]) {
        let n = self.pending.len();
        for _ in 0..n {
            let mut task = self.pending.pop_front().expect("pending underflow");
            if uids.contains(&task.uid) {
                info!(uid = %task.uid, "canceled while pending");
                self.ctx.advance(&mut task, TaskState::Canceled, None).await;
            } else {
                self.pending.push_back(task);
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_common::{ctx_with_states, make_task, recv_states_for};
    use skiff_core::protocol::Unschedule;
    use skiff_core::types::NodeSpec;
    use skiff_transport::queue;

    fn make_map(nodes: usize, cores: usize, blocked: &[usize]) -> ResourceMap {
        let specs: Vec<NodeSpec> = (0..nodes)
            .map(|i| NodeSpec {
                name: format!("node{i}"),
                cores,
                gpus: 0,
                lfs_path: None,
                lfs_size: 0,
                mem: 0,
            })
            .collect();
        ResourceMap::new(&specs, blocked, &[])
    }

    #[tokio::test]
    async fn unschedulable_task_fails_without_touching_slots() {
        let (ctx, state_rx, _tmp) = ctx_with_states().await;
        let (sched_tx, sched_rx) = queue::<Task>("sched", 16);
        let (exec_tx, exec_rx) = queue::<Task>("exec", 16);

        let sched = Scheduler::new(
            ctx.clone(),
            skiff_scheduler::create("CONTINUOUS").unwrap(),
            make_map(2, 4, &[]),
            exec_tx,
        );
        let handle = tokio::spawn(sched.run(sched_rx));

        // 9 single-core MPI ranks on a 2x4 pilot can never fit.
        sched_tx.put(make_task("task.0000", 9, 1, true)).await.unwrap();

        let states = recv_states_for(&state_rx, "task.0000", 2).await;
        assert_eq!(states[0].state, TaskState::AgentScheduling);
        assert_eq!(states[1].state, TaskState::Failed);
        assert!(states[1].details.as_deref().unwrap().contains("Unschedulable"));

        drop(sched_tx);
        handle.await.unwrap();
        drop(exec_rx);
    }

    #[tokio::test]
    async fn blocked_core_defers_fourth_task_until_release() {
        let (ctx, state_rx, _tmp) = ctx_with_states().await;
        let (sched_tx, sched_rx) = queue::<Task>("sched", 16);
        let (exec_tx, exec_rx) = queue::<Task>("exec", 16);

        // 4-core node with core 0 blocked: three concurrent tasks fit.
        let sched = Scheduler::new(
            ctx.clone(),
            skiff_scheduler::create("CONTINUOUS").unwrap(),
            make_map(1, 4, &[0]),
            exec_tx,
        );
        let handle = tokio::spawn(sched.run(sched_rx));

        for i in 0..4 {
            sched_tx.put(make_task(&format!("task.000{i}"), 1, 1, false)).await.unwrap();
        }

        let mut placed = Vec::new();
        for _ in 0..3 {
            placed.push(exec_rx.get().await.unwrap());
        }
        // Core 0 is blocked, so the used cores are 1..3.
        let used: Vec<usize> = placed
            .iter()
            .flat_map(|t| t.slots.as_ref().unwrap().ranks[0].core_ids.clone())
            .collect();
        assert_eq!(used, vec![1, 2, 3]);

        // Fourth task waits; releasing the first task's slots admits it.
        let first = &placed[0];
        ctx.unschedule.publish(
            TOPIC_UNSCHEDULE,
            Unschedule {
                uid: first.uid.clone(),
                slots: first.slots.clone().unwrap(),
            },
        );
        let fourth = exec_rx.get().await.unwrap();
        assert_eq!(fourth.uid, "task.0003");
        assert_eq!(fourth.slots.unwrap().ranks[0].core_ids, vec![1]);

        drop(sched_tx);
        handle.await.unwrap();
        let _ = state_rx;
    }

    #[tokio::test]
    async fn cancel_removes_pending_task() {
        let (ctx, state_rx, _tmp) = ctx_with_states().await;
        let (sched_tx, sched_rx) = queue::<Task>("sched", 16);
        let (exec_tx, exec_rx) = queue::<Task>("exec", 16);

        let sched = Scheduler::new(
            ctx.clone(),
            skiff_scheduler::create("CONTINUOUS").unwrap(),
            make_map(1, 2, &[]),
            exec_tx,
        );
        let handle = tokio::spawn(sched.run(sched_rx));

        // Fill the node, then pend one more.
        sched_tx.put(make_task("task.0000", 1, 2, false)).await.unwrap();
        let _placed = exec_rx.get().await.unwrap();
        sched_tx.put(make_task("task.0001", 1, 2, false)).await.unwrap();

        // Make sure the pending task reached the scheduler before the
        // cancel is published.
        let states = recv_states_for(&state_rx, "task.0001", 1).await;
        assert_eq!(states[0].state, TaskState::AgentScheduling);

        ctx.control.publish(
            TOPIC_CONTROL,
            ControlMsg::CancelTasks {
                uids: vec!["task.0001".into()],
            },
        );

        let states = recv_states_for(&state_rx, "task.0001", 1).await;
        assert_eq!(states[0].state, TaskState::Canceled);

        drop(sched_tx);
        handle.await.unwrap();
    }
}
