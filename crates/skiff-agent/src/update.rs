//! The update sink: single writer serializing state notifications onto
//! the client bridge. Per-task ordering is preserved by construction
//! (one consumer, FIFO queue); duplicates and regressions are dropped so
//! every transition reaches the client exactly once. Undeliverable
//! updates are buffered across bridge reconnects, bounded.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tracing::{debug, warn};

use skiff_core::protocol::{AgentFrame, ClientFrame, StateUpdate};
use skiff_core::CoreError;
use skiff_transport::Bridge;
use skiff_transport::QueueReceiver;

/// Updates held while no bridge peer is reachable. Beyond this the
/// transport is treated as failed and the agent comes down.
const MAX_BUFFERED: usize = 100_000;

/// Where the sink writes; the bridge in production, a collector in tests.
pub trait UpdateTarget: Send {
    fn send(&self, frame: AgentFrame) -> Result<(), CoreError>;
}

impl UpdateTarget for Bridge<ClientFrame, AgentFrame> {
    fn send(&self, frame: AgentFrame) -> Result<(), CoreError> {
        Bridge::send(self, frame)
    }
}

impl<T: UpdateTarget + Sync + Send> UpdateTarget for std::sync::Arc<T> {
    fn send(&self, frame: AgentFrame) -> Result<(), CoreError> {
        (**self).send(frame)
    }
}

pub struct UpdateSink<T: UpdateTarget> {
    target: T,
    last_value: HashMap<String, i32>,
    buffer: VecDeque<AgentFrame>,
}

impl<T: UpdateTarget> UpdateSink<T> {
    pub fn new(target: T) -> Self {
        Self {
            target,
            last_value: HashMap::new(),
            buffer: VecDeque::new(),
        }
    }

    /// Drain the update queue until every producer is gone, then flush
    /// what remains. Err means the transport stayed down past the
    /// buffer bound.
    pub async fn run(mut self, rx: QueueReceiver<StateUpdate>) -> Result<(), CoreError> {
        let mut tick = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                update = rx.get() => match update {
                    Some(update) => {
                        self.accept(update)?;
                        self.flush();
                    }
                    None => break,
                },
                _ = tick.tick() => self.flush(),
            }
        }
        // Final flush on shutdown; the queue is already drained.
        self.flush();
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Transport(format!(
                "{} state updates undeliverable at shutdown",
                self.buffer.len()
            )))
        }
    }

    fn accept(&mut self, update: StateUpdate) -> Result<(), CoreError> {
        let value = update.state.value();
        if let Some(&last) = self.last_value.get(&update.uid) {
            if value <= last {
                debug!(uid = %update.uid, state = %update.state, "dropping stale update");
                return Ok(());
            }
        }
        self.last_value.insert(update.uid.clone(), value);
        self.buffer.push_back(AgentFrame::Update(update));
        if self.buffer.len() > MAX_BUFFERED {
            return Err(CoreError::Transport("update buffer overflow".into()));
        }
        Ok(())
    }

    fn flush(&mut self) {
        while let Some(frame) = self.buffer.front() {
            match self.target.send(frame.clone()) {
                Ok(()) => {
                    self.buffer.pop_front();
                }
                Err(e) => {
                    warn!(buffered = self.buffer.len(), "update delivery stalled: {e}");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use skiff_core::protocol::EntityType;
    use skiff_core::state::TaskState;
    use skiff_core::timestamp;
    use skiff_transport::queue;

    #[derive(Clone, Default)]
    struct Collector {
        frames: Arc<Mutex<Vec<AgentFrame>>>,
        fail_first: Arc<AtomicUsize>,
    }

    impl UpdateTarget for Collector {
        fn send(&self, frame: AgentFrame) -> Result<(), CoreError> {
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(CoreError::Transport("down".into()));
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    fn update(uid: &str, state: TaskState) -> StateUpdate {
        StateUpdate {
            uid: uid.into(),
            etype: EntityType::Task,
            state,
            ts: timestamp(),
            details: None,
        }
    }

    fn states_of(collector: &Collector) -> Vec<(String, TaskState)> {
        collector
            .frames
            .lock()
            .unwrap()
            .iter()
            .map(|f| match f {
                AgentFrame::Update(u) => (u.uid.clone(), u.state),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn per_task_order_is_preserved() {
        let collector = Collector::default();
        let (tx, rx) = queue::<StateUpdate>("state", 64);
        let sink = UpdateSink::new(collector.clone());
        let handle = tokio::spawn(sink.run(rx));

        tx.put(update("t.0", TaskState::AgentScheduling)).await.unwrap();
        tx.put(update("t.0", TaskState::AgentExecutingPending)).await.unwrap();
        tx.put(update("t.0", TaskState::AgentExecuting)).await.unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        assert_eq!(
            states_of(&collector),
            vec![
                ("t.0".into(), TaskState::AgentScheduling),
                ("t.0".into(), TaskState::AgentExecutingPending),
                ("t.0".into(), TaskState::AgentExecuting),
            ]
        );
    }

    #[tokio::test]
    async fn regressions_and_repeats_are_dropped() {
        let collector = Collector::default();
        let (tx, rx) = queue::<StateUpdate>("state", 64);
        let handle = tokio::spawn(UpdateSink::new(collector.clone()).run(rx));

        tx.put(update("t.0", TaskState::AgentExecuting)).await.unwrap();
        tx.put(update("t.0", TaskState::AgentExecuting)).await.unwrap();
        tx.put(update("t.0", TaskState::AgentScheduling)).await.unwrap();
        tx.put(update("t.0", TaskState::Done)).await.unwrap();
        tx.put(update("t.0", TaskState::Failed)).await.unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        assert_eq!(
            states_of(&collector),
            vec![
                ("t.0".into(), TaskState::AgentExecuting),
                ("t.0".into(), TaskState::Done),
            ]
        );
    }

    #[tokio::test]
    async fn transient_outage_buffers_then_delivers_in_order() {
        let collector = Collector::default();
        collector.fail_first.store(2, Ordering::SeqCst);
        let (tx, rx) = queue::<StateUpdate>("state", 64);
        let handle = tokio::spawn(UpdateSink::new(collector.clone()).run(rx));

        tx.put(update("t.0", TaskState::AgentScheduling)).await.unwrap();
        tx.put(update("t.1", TaskState::AgentScheduling)).await.unwrap();
        tx.put(update("t.0", TaskState::Done)).await.unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        let states = states_of(&collector);
        assert_eq!(states.len(), 3);
        let t0: Vec<TaskState> = states
            .iter()
            .filter(|(uid, _)| uid == "t.0")
            .map(|(_, s)| *s)
            .collect();
        assert_eq!(t0, vec![TaskState::AgentScheduling, TaskState::Done]);
    }
}
