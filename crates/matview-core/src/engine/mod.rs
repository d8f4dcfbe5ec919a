//! Application orchestration: bootstrap stages and shutdown.

mod bootstrap;
mod shutdown;

pub use bootstrap::{timed, Application, BootstrapStage, Collaborators, Prepared};
pub use shutdown::{Closeable, ShutdownCoordinator};
