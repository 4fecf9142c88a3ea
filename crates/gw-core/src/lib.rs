pub mod mission;
pub mod modes;
pub mod params;
pub mod profiles;
pub mod rc;
pub mod telemetry;

pub use mission::{
    validate_waypoints, FencePoint, IssueSeverity, MissionIssue, MissionStatus, Waypoint,
    WaypointKind,
};
pub use params::{ParamTable, ParamValue};
pub use profiles::{ProfileCategory, VehicleProfile};
pub use rc::ManualControlSetpoint;
pub use telemetry::{EmitDecision, EmitGate, EmitInput, TelemetrySnapshot};
