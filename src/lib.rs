//! bwx — vault CLI wrapper with a cached session and a self-clearing
//! clipboard.
//!
//! Two pieces carry the weight:
//!
//! - [`session`]: one interactive unlock, cached in the runtime directory
//!   and reused by later invocations.
//! - [`hold`]: copy a password to the configured sink and arm a detached
//!   timer process that clears it, superseding any earlier timer.

pub mod atomic;
pub mod cli;
pub mod config;
pub mod hold;
pub mod session;
pub mod sink;
pub mod vault;
