//! PowerMate Bridge
//!
//! Drives a Roon zone from a Griffin PowerMate (one button, one wheel):
//! - gesture disambiguation (press, long press, dampened rotation)
//! - action dispatch onto zone transport calls
//! - a supervisor that owns the device, settings and status
//! - a settings/status HTTP host and the Roon pairing collaborator

pub mod adapters;
pub mod api;
pub mod bus;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod gesture;
pub mod settings;
pub mod supervisor;
