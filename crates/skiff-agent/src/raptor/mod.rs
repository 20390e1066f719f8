//! The high-throughput overlay for sub-minute workloads: a master task
//! hosts a dispatch queue, worker tasks pull and execute function-style
//! requests without a trip through the bin packer. Cancellation and
//! state reporting still go through the regular channels.

pub mod functions;
pub mod master;
pub mod worker;

pub use functions::FunctionRegistry;
pub use master::Master;
