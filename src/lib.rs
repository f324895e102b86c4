//! svcman: supervision of a small set of shell-defined services.
//!
//! Each service from the [`registry`] gets a [`supervisor::Supervisor`] that
//! starts its command under a POSIX shell, captures the combined output,
//! stops it (optionally through a dedicated stop command) and answers
//! whether it is running, falling back to the host process table through
//! the [`probe`] module when it holds no live handle.

pub mod config;
pub mod error;
pub mod output;
pub mod probe;
pub mod registry;
pub mod shell;
pub mod supervisor;
pub mod translate;

pub use error::SupervisorError;
pub use registry::{Dialect, ServiceDefinition, ServiceRegistry};
pub use supervisor::{Supervisor, SupervisorOptions};
