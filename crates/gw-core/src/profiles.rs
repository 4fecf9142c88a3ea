//! Vehicle capability profiles.
//!
//! Maps MAV_TYPE numbers to a static capability profile describing what
//! a vehicle class supports, so commands can be rejected or adapted per
//! platform (a rover "land" becomes HOLD, a sub has depth instead of
//! altitude).

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileCategory {
    Air,
    Ground,
    Surface,
    Underwater,
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleProfile {
    pub profile_name: &'static str,
    pub mav_types: &'static [u8],
    pub category: ProfileCategory,
    pub commands: &'static [&'static str],
    pub has_altitude: bool,
    pub has_depth: bool,
    pub supports_takeoff: bool,
    pub supports_vtol: bool,
    pub default_alt: Option<f32>,
    pub default_speed: f32,
}

impl VehicleProfile {
    pub fn supports_command(&self, command: &str) -> bool {
        self.commands.contains(&command)
    }
}

const AIR_COMMANDS: &[&str] = &[
    "arm",
    "disarm",
    "takeoff",
    "land",
    "rtl",
    "goto",
    "set_mode",
    "mission_start",
    "mission_pause",
];

const GROUND_COMMANDS: &[&str] = &[
    "arm",
    "disarm",
    "rtl",
    "goto",
    "set_mode",
    "mission_start",
    "mission_pause",
];

const SUB_COMMANDS: &[&str] = &[
    "arm",
    "disarm",
    "goto",
    "set_mode",
    "mission_start",
    "mission_pause",
];

static COPTER: VehicleProfile = VehicleProfile {
    profile_name: "copter",
    mav_types: &[2, 3, 4, 13, 14, 15, 29, 35],
    category: ProfileCategory::Air,
    commands: AIR_COMMANDS,
    has_altitude: true,
    has_depth: false,
    supports_takeoff: true,
    supports_vtol: true,
    default_alt: Some(10.0),
    default_speed: 5.0,
};

static PLANE: VehicleProfile = VehicleProfile {
    profile_name: "plane",
    mav_types: &[1],
    category: ProfileCategory::Air,
    commands: AIR_COMMANDS,
    has_altitude: true,
    has_depth: false,
    supports_takeoff: true,
    supports_vtol: false,
    default_alt: Some(50.0),
    default_speed: 15.0,
};

static VTOL: VehicleProfile = VehicleProfile {
    profile_name: "vtol",
    mav_types: &[19, 20, 21, 22, 23, 24, 25],
    category: ProfileCategory::Air,
    commands: AIR_COMMANDS,
    has_altitude: true,
    has_depth: false,
    supports_takeoff: true,
    supports_vtol: true,
    default_alt: Some(30.0),
    default_speed: 12.0,
};

static ROVER: VehicleProfile = VehicleProfile {
    profile_name: "rover",
    mav_types: &[10],
    category: ProfileCategory::Ground,
    commands: GROUND_COMMANDS,
    has_altitude: false,
    has_depth: false,
    supports_takeoff: false,
    supports_vtol: false,
    default_alt: None,
    default_speed: 3.0,
};

static BOAT: VehicleProfile = VehicleProfile {
    profile_name: "boat",
    mav_types: &[11],
    category: ProfileCategory::Surface,
    commands: GROUND_COMMANDS,
    has_altitude: false,
    has_depth: false,
    supports_takeoff: false,
    supports_vtol: false,
    default_alt: None,
    default_speed: 3.0,
};

static SUB: VehicleProfile = VehicleProfile {
    profile_name: "sub",
    mav_types: &[12],
    category: ProfileCategory::Underwater,
    commands: SUB_COMMANDS,
    has_altitude: false,
    has_depth: true,
    supports_takeoff: false,
    supports_vtol: false,
    default_alt: None,
    default_speed: 1.0,
};

static PROFILES: &[&VehicleProfile] = &[&COPTER, &PLANE, &VTOL, &ROVER, &BOAT, &SUB];

/// Profile for a MAV_TYPE, falling back to copter for unrecognized types.
pub fn profile_for(mav_type: u8) -> &'static VehicleProfile {
    PROFILES
        .iter()
        .find(|profile| profile.mav_types.contains(&mav_type))
        .copied()
        .unwrap_or(&COPTER)
}

pub fn all_profiles() -> &'static [&'static VehicleProfile] {
    PROFILES
}
