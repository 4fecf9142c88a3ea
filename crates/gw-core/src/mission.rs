use serde::{Deserialize, Serialize};

/// Latitude/longitude wire scale: int32 at 1e-7 degrees.
const COORD_SCALE: f64 = 1e7;

pub fn degrees_to_wire(deg: f64) -> i32 {
    (deg * COORD_SCALE).round() as i32
}

pub fn wire_to_degrees(raw: i32) -> f64 {
    raw as f64 / COORD_SCALE
}

/// Kind of a mission item, as selected by the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointKind {
    #[default]
    Waypoint,
    Takeoff,
    Land,
    LoiterUnlim,
    LoiterTurns,
    LoiterTime,
    Roi,
    DoJump,
    DoSetServo,
}

impl WaypointKind {
    /// MAV_CMD number this item kind is transferred as.
    pub fn command(self) -> u16 {
        match self {
            WaypointKind::Waypoint => 16,
            WaypointKind::Takeoff => 22,
            WaypointKind::Land => 21,
            WaypointKind::LoiterUnlim => 17,
            WaypointKind::LoiterTurns => 18,
            WaypointKind::LoiterTime => 19,
            WaypointKind::Roi => 201,
            WaypointKind::DoJump => 177,
            WaypointKind::DoSetServo => 183,
        }
    }

    /// Reverse mapping for downloads. Unrecognized commands come back as
    /// plain waypoints, matching how they are rendered.
    pub fn from_command(command: u16) -> Self {
        match command {
            22 => WaypointKind::Takeoff,
            21 => WaypointKind::Land,
            17 => WaypointKind::LoiterUnlim,
            18 => WaypointKind::LoiterTurns,
            19 => WaypointKind::LoiterTime,
            201 => WaypointKind::Roi,
            177 => WaypointKind::DoJump,
            183 => WaypointKind::DoSetServo,
            _ => WaypointKind::Waypoint,
        }
    }
}

fn default_acceptance_radius() -> f32 {
    2.0
}

/// One mission record. `param1..param4` follow the MAV_CMD the kind maps
/// to (hold time, acceptance radius, loiter radius, yaw for waypoints).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
    /// Relative altitude in meters.
    pub alt: f32,
    #[serde(default)]
    pub seq: u16,
    #[serde(default, rename = "item_type")]
    pub kind: WaypointKind,
    #[serde(default)]
    pub param1: f32,
    #[serde(default = "default_acceptance_radius")]
    pub param2: f32,
    #[serde(default)]
    pub param3: f32,
    #[serde(default)]
    pub param4: f32,
}

impl Waypoint {
    pub fn new(lat: f64, lon: f64, alt: f32) -> Self {
        Self {
            lat,
            lon,
            alt,
            seq: 0,
            kind: WaypointKind::Waypoint,
            param1: 0.0,
            param2: default_acceptance_radius(),
            param3: 0.0,
            param4: 0.0,
        }
    }
}

/// One geofence vertex (polygon) or circle center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FencePoint {
    pub lat: f64,
    pub lon: f64,
}

/// Mission engine state as published to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    #[default]
    Idle,
    Uploading,
    Uploaded,
    UploadFailed,
    Running,
    Paused,
}

impl MissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MissionStatus::Idle => "idle",
            MissionStatus::Uploading => "uploading",
            MissionStatus::Uploaded => "uploaded",
            MissionStatus::UploadFailed => "upload_failed",
            MissionStatus::Running => "running",
            MissionStatus::Paused => "paused",
        }
    }
}

/// Hard cap on transferable items; the wire sequence field is u16 and
/// autopilots reject anything near it long before.
const MAX_MISSION_ITEMS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionIssue {
    pub code: String,
    pub message: String,
    pub seq: Option<u16>,
    pub severity: IssueSeverity,
}

fn issue(code: &str, message: String, seq: Option<u16>, severity: IssueSeverity) -> MissionIssue {
    MissionIssue {
        code: code.to_string(),
        message,
        seq,
        severity,
    }
}

/// Validate a mission before transfer. Errors block the upload;
/// warnings are advisory.
pub fn validate_waypoints(waypoints: &[Waypoint]) -> Vec<MissionIssue> {
    let mut issues = Vec::new();

    if waypoints.len() > MAX_MISSION_ITEMS {
        issues.push(issue(
            "plan.too_many_items",
            format!("mission has {} items, limit is {MAX_MISSION_ITEMS}", waypoints.len()),
            None,
            IssueSeverity::Error,
        ));
    }

    for (index, wp) in waypoints.iter().enumerate() {
        let seq = Some(index as u16);

        if !(-90.0..=90.0).contains(&wp.lat) {
            issues.push(issue(
                "item.latitude_out_of_range",
                format!("latitude {} is outside [-90, 90]", wp.lat),
                seq,
                IssueSeverity::Error,
            ));
        }
        if !(-180.0..=180.0).contains(&wp.lon) {
            issues.push(issue(
                "item.longitude_out_of_range",
                format!("longitude {} is outside [-180, 180]", wp.lon),
                seq,
                IssueSeverity::Error,
            ));
        }

        for (name, value) in [
            ("alt", wp.alt),
            ("param1", wp.param1),
            ("param2", wp.param2),
            ("param3", wp.param3),
            ("param4", wp.param4),
        ] {
            if !value.is_finite() {
                issues.push(issue(
                    "item.non_finite_value",
                    format!("{name} must be finite"),
                    seq,
                    IssueSeverity::Error,
                ));
            }
        }

        if wp.kind == WaypointKind::DoJump {
            // param1 is the 0-based target index of the jump.
            let target = wp.param1;
            if target < 0.0 || target as usize >= waypoints.len() {
                issues.push(issue(
                    "item.jump_target_out_of_range",
                    format!("DO_JUMP target {target} does not name a mission item"),
                    seq,
                    IssueSeverity::Error,
                ));
            }
        }

        if wp.kind == WaypointKind::Takeoff && index != 0 {
            issues.push(issue(
                "item.takeoff_not_first",
                format!("takeoff at position {index} will be ignored mid-mission"),
                seq,
                IssueSeverity::Warning,
            ));
        }
    }

    issues
}

pub fn first_error(issues: &[MissionIssue]) -> Option<&MissionIssue> {
    issues
        .iter()
        .find(|issue| issue.severity == IssueSeverity::Error)
}
