use std::sync::Arc;

use skiff_core::config::AgentConfig;
use skiff_core::protocol::{ControlMsg, EntityType, StateUpdate, Unschedule};
use skiff_core::state::TaskState;
use skiff_core::task::Task;
use skiff_core::timestamp;
use skiff_transport::{PubSub, QueueSender};

use crate::session::Sandboxes;

/// Control pubsub topic every component subscribes to.
pub const TOPIC_CONTROL: &str = "control";
/// Unschedule pubsub topic the scheduler listens on.
pub const TOPIC_UNSCHEDULE: &str = "unschedule";

/// Shared handles every component loop gets a clone of. All of this is
/// messaging — the only mutable state behind it lives in the owning
/// component.
#[derive(Clone)]
pub struct AgentContext {
    pub cfg: Arc<AgentConfig>,
    pub sandboxes: Arc<Sandboxes>,
    pub control: PubSub<ControlMsg>,
    pub unschedule: PubSub<Unschedule>,
    state_tx: QueueSender<StateUpdate>,
}

impl AgentContext {
    pub fn new(
        cfg: AgentConfig,
        sandboxes: Sandboxes,
        control: PubSub<ControlMsg>,
        unschedule: PubSub<Unschedule>,
        state_tx: QueueSender<StateUpdate>,
    ) -> Self {
        Self {
            cfg: Arc::new(cfg),
            sandboxes: Arc::new(sandboxes),
            control,
            unschedule,
            state_tx,
        }
    }

    /// Move a task to `state` and publish the transition. Timestamps on
    /// the update come from the agent clock; per-task ordering is
    /// preserved because each task lives in exactly one component at a
    /// time.
    pub async fn advance(&self, task: &mut Task, state: TaskState, details: Option<String>) {
        task.state = state;
        let update = StateUpdate {
            uid: task.uid.clone(),
            etype: EntityType::Task,
            state,
            ts: timestamp(),
            details,
        };
        // A dropped update sink means shutdown is underway.
        let _ = self.state_tx.put(update).await;
    }

    /// Terminal failure with an error record attached.
    pub async fn fail(&self, task: &mut Task, error: String) {
        task.error = Some(error.clone());
        self.advance(task, TaskState::Failed, Some(error)).await;
    }

    /// Give the task's slots back to the scheduler.
    pub fn release_slots(&self, task: &Task) {
        if let Some(slots) = &task.slots {
            self.unschedule.publish(
                TOPIC_UNSCHEDULE,
                Unschedule {
                    uid: task.uid.clone(),
                    slots: slots.clone(),
                },
            );
        }
    }
}
