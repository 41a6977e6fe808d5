//! Types, validation, configuration and topic templates shared between the
//! wgkex broker and worker binaries.

pub mod config;
pub mod error;
pub mod lladdr;
pub mod topics;
pub mod types;
pub mod validate;

pub use error::Error;
pub use types::{
    BlacklistEntry, Domain, IPv6PrefixAssignment, KeyExchangeRequest, PublicKey, WorkerConfig,
    WorkerEndpoint, WorkerId,
};
