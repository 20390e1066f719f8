pub mod bridge;
pub mod pubsub;
pub mod queue;
pub mod retry;

pub use bridge::Bridge;
pub use pubsub::PubSub;
pub use queue::{queue, QueueReceiver, QueueSender};
