pub mod error;
pub mod flusher;
pub mod installer;
pub mod metrics;
pub mod mqtt;
pub mod netlink;
pub mod queue;
