//! Queue module: the FIFO broker handing request ids to workers.

mod broker;

pub use broker::QueueBroker;
