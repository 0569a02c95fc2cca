//! Acquisition side of the rig.
//!
//! - `converter`: raw transducer voltage to engineering units
//! - `sensor`: gateway contract, readings with quality tags, simulated and scripted gateways
//! - `trigger`: edge sources and the overrun policy
//! - `capture`: append-only sample log and the capture critical section
//! - `session`: start/stop orchestration of capture, monitor and persistence

pub mod capture;
pub mod converter;
pub mod sensor;
pub mod session;
pub mod trigger;
