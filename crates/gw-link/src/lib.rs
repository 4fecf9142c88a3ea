//! MAVLink connection runtime for the ground station backend.
//!
//! A [`Registry`] owns links (one worker thread each) and the vehicles
//! discovered on them; a [`TelemetryBroadcaster`] pushes delta frames
//! to subscribed clients. Blocking mission and fence transfers run
//! through the per-vehicle [`MissionManager`] handle.

pub mod broadcast;
mod command;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod inspector;
mod link;
pub mod mission;
pub mod registry;
mod router;
pub mod vehicle;

#[cfg(test)]
mod tests;

pub use broadcast::TelemetryBroadcaster;
pub use config::LinkConfig;
pub use endpoint::{list_serial_ports, Endpoint};
pub use error::LinkError;
pub use inspector::{ComponentEntry, MessageStat};
pub use mission::{FenceItemRecord, MissionManager};
pub use registry::{ConnectionInfo, Registry, SetParamOutcome, VehicleInfo};
pub use vehicle::{CameraInfo, GimbalInfo, StatusTextEntry, Vehicle};

pub use gw_core::mission::{
    FencePoint, IssueSeverity, MissionIssue, MissionStatus, Waypoint, WaypointKind,
};
pub use gw_core::params::ParamValue;
pub use gw_core::telemetry::TelemetrySnapshot;
