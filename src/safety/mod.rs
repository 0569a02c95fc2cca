//! Safety side of the rig: the pressure interlock and the live monitor that re-evaluates it.

pub mod interlock;
pub mod monitor;
