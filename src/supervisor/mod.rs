//! Task supervision
//!
//! - `root`: wires the engine and owns every long-running task
//! - `stream`: one reconnecting market-data task per instrument
//! - `reconcile`: startup adoption of exchange balances
//! - `health`: per-stream health registry

pub mod health;
pub mod reconcile;
pub mod root;
pub mod stream;

pub use health::{HealthRegistry, StreamHealth, StreamStatus};
pub use reconcile::{reconcile, ReconcileReport, ADOPTED_TAG};
pub use root::{account_equity, Collaborators, Supervisor};
pub use stream::{StreamContext, StreamSupervisor};
