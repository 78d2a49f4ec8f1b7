//! Leveled logging, bypass policy records and tracing setup shared by the
//! racoon daemon crates.

pub mod plog;
pub mod policy;
pub mod tracing;

pub use plog::{LOG_TARGET, LogLevel, log_at, plog, sanitize_binary};
pub use policy::{
    POLICY_DESCRIPTOR_LEN, PolicyDescriptor, PolicyDirection, PolicyError, PolicyResult,
    PolicyType, build_bypass_policy, policy_len,
};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
