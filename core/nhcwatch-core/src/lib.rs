//! # nhcwatch core
//!
//! Building blocks for running a node health check on a schedule and
//! acting on its results:
//!
//! - [`timespec`] parses compact durations (`1h30m`, `5m2f`)
//! - [`store`] keeps the last result per check in a private state directory
//! - [`engine`] runs the check and decides whether anything changed
//! - [`notify`] tells people about changes
//! - [`scheduler`] repeats the run on wall-clock aligned boundaries
//! - [`rm`] brings nodes back online in the resource manager when the
//!   health check that took them offline is satisfied
//!
//! The `nhc-wrapper` and `node-mark` binaries are thin shells around these.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod notify;
pub mod rm;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod timespec;

pub use config::Config;
pub use engine::{run_and_classify, Classification, Report, ReportKind, RunOutcome, Subject};
pub use error::{NhcError, NotifyError, Result};
pub use notify::{Notice, NoticeKind, Notification, Notifier, Transport};
pub use rm::{Decision, NodeStateRecord, Reconciler, ResourceManager, RmAdapter};
pub use scheduler::{LoopExit, LoopSpec, Scheduler};
pub use store::ResultStore;
pub use timespec::TimeSpec;
