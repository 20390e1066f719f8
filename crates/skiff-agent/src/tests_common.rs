use std::time::Duration;

use skiff_core::config::AgentConfig;
use skiff_core::protocol::{ControlMsg, StateUpdate, Unschedule};
use skiff_core::task::{Task, TaskDescription, ThreadingType};
use skiff_transport::{queue, PubSub, QueueReceiver};

use crate::context::AgentContext;
use crate::session::Sandboxes;

/// A context wired to real pubsubs and a captured state-update queue.
pub async fn ctx_with_states() -> (AgentContext, QueueReceiver<StateUpdate>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let sandboxes = Sandboxes::create(tmp.path(), "session.t", "pilot.t").unwrap();
    let (state_tx, state_rx) = queue::<StateUpdate>("state", 256);
    let ctx = AgentContext::new(
        AgentConfig::default(),
        sandboxes,
        PubSub::<ControlMsg>::new("control", 64),
        PubSub::<Unschedule>::new("unschedule", 64),
        state_tx,
    );
    (ctx, state_rx, tmp)
}

pub fn make_task(uid: &str, ranks: usize, cores_per_rank: usize, mpi: bool) -> Task {
    Task::new(
        uid,
        TaskDescription {
            executable: "/bin/date".into(),
            ranks,
            cores_per_rank,
            threading: if mpi { ThreadingType::Mpi } else { ThreadingType::None },
            ..Default::default()
        },
    )
}

/// Collect the next `n` state updates for `uid`, skipping other tasks.
pub async fn recv_states_for(
    state_rx: &QueueReceiver<StateUpdate>,
    uid: &str,
    n: usize,
) -> Vec<StateUpdate> {
    let mut out = Vec::new();
    while out.len() < n {
        let update = tokio::time::timeout(Duration::from_secs(10), state_rx.get())
            .await
            .expect("timed out waiting for state update")
            .expect("state queue closed");
        if update.uid == uid {
            out.push(update);
        }
    }
    out
}
