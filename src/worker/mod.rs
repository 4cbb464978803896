//! Scheduling: how and when tenant cycles run.
//!
//! - `polling`: single tenant, fixed interval
//! - `idle`: one tenant, woken by IMAP IDLE
//! - `supervisor`: one `idle` worker per active tenant, restarted on crash
//! - `shutdown`: cooperative stop signal

pub mod idle;
pub mod polling;
pub mod shutdown;
pub mod supervisor;

pub use idle::{IdleSettings, run_idle_worker};
pub use polling::run_polling_loop;
pub use shutdown::Shutdown;
pub use supervisor::Supervisor;
