//! # tp_acquisition
//! Temperature/pressure acquisition core for a laboratory rig.
//!
//! An external trigger (or a free-running clock) drives captures into an append-only sample log,
//! a live monitor polls the same sensors for display, and both feed one pressure interlock that
//! drives the alarm and shutdown outputs. At the end of a session the log is moved into the
//! CSV persistence handoff and the safety outputs are released.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod safety;
pub mod utils;

pub use acquisition::session::{AcquisitionSession, SessionOutcome};
pub use config::{AcquisitionMode, RigConfig};
pub use error::{AcqError, AcqResult};
