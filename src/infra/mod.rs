//! Runtime bootstrap for hosts that let the engine own telemetry.

pub mod error;
pub mod telemetry;
