//! HoyoBot kernel - shared contracts for the host runtime.
//!
//! The kernel only defines data types, traits and errors. The engines that
//! operate on them (scheduler, event bus, plugin host, runtime loop) live in
//! `hoyo-runtime`; the kernel never depends on them.

// identifier module
pub mod types;
pub use types::*;

// event module
pub mod event;
pub use event::{Event, EventKind};

// plugin module
pub mod plugin;
pub use plugin::*;

// config module
pub mod config;

// network module
pub mod network;

// error module
pub mod error;
pub use error::{CallbackError, HostError, HostResult, PreconditionViolation};
