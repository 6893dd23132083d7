//! Backend adapters for the sandbox capability interface.
//!
//! Two concrete backends with divergent native capabilities:
//! - `e2b` - native background commands and directory watching
//! - `daytona` - session-based execution; background mode is emulated by
//!   polling the session log and forwarding byte-offset deltas
//!
//! The [`ProviderFactory`] selects exactly one adapter per process.

pub mod daytona;
pub mod e2b;
pub mod factory;
mod http;

pub use daytona::DaytonaProvider;
pub use e2b::E2bProvider;
pub use factory::{ProviderFactory, ProviderKind};
