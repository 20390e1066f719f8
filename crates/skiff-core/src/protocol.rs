use serde::{Deserialize, Serialize};

use crate::state::TaskState;
use crate::task::Task;
use crate::types::Slots;

/// Entity kind carried in a state update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Session,
    Pmgr,
    Pilot,
    Tmgr,
    Task,
}

/// One state transition notification, serialized to the client bridge by
/// the update sink. Per-uid ordering is guaranteed; cross-uid is not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateUpdate {
    pub uid: String,
    pub etype: EntityType,
    pub state: TaskState,
    pub ts: f64,
    #[serde(default)]
    pub details: Option<String>,
}

/// Administrative commands on the control pubsub. Every component
/// subscribes and processes them in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlMsg {
    CancelTasks { uids: Vec<String> },
    CancelPilot,
    Shutdown,
}

/// Published when a task's slots return to the resource map, waking the
/// scheduler to re-drive its pending list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unschedule {
    pub uid: String,
    pub slots: Slots,
}

/// Frames the client sends over the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientFrame {
    Submit(Vec<Task>),
    Control(ControlMsg),
}

/// Frames the agent sends over the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentFrame {
    Update(StateUpdate),
    /// Pilot-level lifecycle note (ACTIVE, CANCELED, ...).
    Pilot { state: String, ts: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_wire_format() {
        let msg = ControlMsg::CancelTasks {
            uids: vec!["task.0001".into()],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"op\":\"cancel_tasks\""));
        let back: ControlMsg = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn frames_round_trip_through_bincode() {
        let frame = AgentFrame::Update(StateUpdate {
            uid: "task.0001".into(),
            etype: EntityType::Task,
            state: TaskState::AgentExecuting,
            ts: 12.5,
            details: None,
        });
        let bytes = bincode::serialize(&frame).unwrap();
        match bincode::deserialize::<AgentFrame>(&bytes).unwrap() {
            AgentFrame::Update(u) => {
                assert_eq!(u.uid, "task.0001");
                assert_eq!(u.state, TaskState::AgentExecuting);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
