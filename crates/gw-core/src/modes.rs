//! Flight-mode name tables.
//!
//! ArduPilot encodes the flight mode as a per-vehicle-class custom mode
//! number; PX4 packs a main/sub mode pair into the upper bytes of
//! `custom_mode`. Both directions (decode for telemetry, encode for
//! mode-change commands) go through the static tables here.

/// MAV_TYPE values treated as multirotors (ArduCopter table).
const MULTIROTOR_TYPES: &[u8] = &[2, 3, 4, 13, 14, 15, 29, 35];
/// MAV_TYPE values for VTOLs, which fly ArduPlane firmware.
const VTOL_TYPES: &[u8] = &[19, 20, 21, 22, 23, 24, 25];
/// Rover covers ground rovers and surface boats.
const ROVER_TYPES: &[u8] = &[10, 11];
const SUB_TYPES: &[u8] = &[12];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VehicleClass {
    Copter,
    Plane,
    Rover,
    Sub,
}

fn vehicle_class(mav_type: u8) -> VehicleClass {
    if MULTIROTOR_TYPES.contains(&mav_type) {
        VehicleClass::Copter
    } else if mav_type == 1 || VTOL_TYPES.contains(&mav_type) {
        VehicleClass::Plane
    } else if ROVER_TYPES.contains(&mav_type) {
        VehicleClass::Rover
    } else if SUB_TYPES.contains(&mav_type) {
        VehicleClass::Sub
    } else {
        VehicleClass::Copter
    }
}

const COPTER_MODES: &[(u32, &str)] = &[
    (0, "STABILIZE"),
    (1, "ACRO"),
    (2, "ALT_HOLD"),
    (3, "AUTO"),
    (4, "GUIDED"),
    (5, "LOITER"),
    (6, "RTL"),
    (7, "CIRCLE"),
    (9, "LAND"),
    (11, "DRIFT"),
    (13, "SPORT"),
    (14, "FLIP"),
    (15, "AUTOTUNE"),
    (16, "POSHOLD"),
    (17, "BRAKE"),
    (18, "THROW"),
    (19, "AVOID_ADSB"),
    (20, "GUIDED_NOGPS"),
    (21, "SMART_RTL"),
];

const PLANE_MODES: &[(u32, &str)] = &[
    (0, "MANUAL"),
    (1, "CIRCLE"),
    (2, "STABILIZE"),
    (3, "TRAINING"),
    (4, "ACRO"),
    (5, "FLY_BY_WIRE_A"),
    (6, "FLY_BY_WIRE_B"),
    (7, "CRUISE"),
    (8, "AUTOTUNE"),
    (10, "AUTO"),
    (11, "RTL"),
    (12, "LOITER"),
    (15, "GUIDED"),
    (17, "QSTABILIZE"),
    (18, "QHOVER"),
    (19, "QLOITER"),
    (20, "QLAND"),
    (21, "QRTL"),
];

const ROVER_MODES: &[(u32, &str)] = &[
    (0, "MANUAL"),
    (1, "ACRO"),
    (3, "STEERING"),
    (4, "HOLD"),
    (5, "LOITER"),
    (6, "FOLLOW"),
    (7, "SIMPLE"),
    (10, "AUTO"),
    (11, "RTL"),
    (12, "SMART_RTL"),
    (15, "GUIDED"),
];

const SUB_MODES: &[(u32, &str)] = &[
    (0, "STABILIZE"),
    (1, "ACRO"),
    (2, "ALT_HOLD"),
    (3, "AUTO"),
    (4, "GUIDED"),
    (7, "CIRCLE"),
    (9, "SURFACE"),
    (16, "POSHOLD"),
    (19, "MANUAL"),
];

/// PX4 `(main_mode, sub_mode)` pairs.
const PX4_MODES: &[((u8, u8), &str)] = &[
    ((0, 0), "UNKNOWN"),
    ((1, 0), "MANUAL"),
    ((1, 1), "MANUAL"),
    ((2, 0), "ALTCTL"),
    ((2, 1), "ALTCTL"),
    ((3, 0), "POSCTL"),
    ((3, 1), "POSCTL"),
    ((4, 0), "AUTO"),
    ((4, 1), "AUTO_READY"),
    ((4, 2), "AUTO_TAKEOFF"),
    ((4, 3), "AUTO_LOITER"),
    ((4, 4), "AUTO_MISSION"),
    ((4, 5), "AUTO_RTL"),
    ((4, 6), "AUTO_LAND"),
    ((4, 7), "AUTO_RTGS"),
    ((4, 8), "AUTO_FOLLOW"),
    ((5, 0), "ACRO"),
    ((6, 0), "OFFBOARD"),
    ((7, 0), "STABILIZED"),
    ((8, 0), "RATTITUDE"),
];

/// PX4 spelling of "hold": loiter is the pause mode. Aliases accepted by
/// the encode direction on top of the table names.
const PX4_ALIASES: &[(&str, (u8, u8))] = &[
    ("HOLD", (4, 3)),
    ("MISSION", (4, 4)),
    ("RTL", (4, 5)),
    ("LAND", (4, 6)),
    ("TAKEOFF", (4, 2)),
    ("LOITER", (4, 3)),
];

pub fn ardupilot_mode_table(mav_type: u8) -> &'static [(u32, &'static str)] {
    match vehicle_class(mav_type) {
        VehicleClass::Copter => COPTER_MODES,
        VehicleClass::Plane => PLANE_MODES,
        VehicleClass::Rover => ROVER_MODES,
        VehicleClass::Sub => SUB_MODES,
    }
}

pub fn ardupilot_mode_name(mav_type: u8, custom_mode: u32) -> String {
    for &(num, name) in ardupilot_mode_table(mav_type) {
        if num == custom_mode {
            return name.to_string();
        }
    }
    format!("MODE_{custom_mode}")
}

pub fn ardupilot_mode_number(mav_type: u8, name: &str) -> Option<u32> {
    let upper = name.to_uppercase();
    ardupilot_mode_table(mav_type)
        .iter()
        .find(|&&(_, mode_name)| mode_name == upper)
        .map(|&(num, _)| num)
}

pub fn px4_mode_name(custom_mode: u32) -> String {
    let main_mode = ((custom_mode >> 16) & 0xFF) as u8;
    let sub_mode = ((custom_mode >> 24) & 0xFF) as u8;
    for &((main, sub), name) in PX4_MODES {
        if main == main_mode && sub == sub_mode {
            return name.to_string();
        }
    }
    format!("PX4_{main_mode}_{sub_mode}")
}

/// Encode a PX4 mode name back into the `custom_mode` word expected by
/// `MAV_CMD_DO_SET_MODE`.
pub fn px4_custom_mode(name: &str) -> Option<u32> {
    let upper = name.to_uppercase();
    let pair = PX4_MODES
        .iter()
        .find(|&&(_, mode_name)| mode_name == upper)
        .map(|&(pair, _)| pair)
        .or_else(|| {
            PX4_ALIASES
                .iter()
                .find(|&&(alias, _)| alias == upper)
                .map(|&(_, pair)| pair)
        })?;
    let (main, sub) = pair;
    Some(((main as u32) << 16) | ((sub as u32) << 24))
}

/// Mode list offered to clients for a given vehicle.
pub fn available_ardupilot_modes(mav_type: u8) -> Vec<(u32, &'static str)> {
    ardupilot_mode_table(mav_type).to_vec()
}

/// Resolve a mode name to the flavor's `custom_mode` encoding.
pub fn custom_mode_for(ardupilot: bool, mav_type: u8, name: &str) -> Option<u32> {
    if ardupilot {
        ardupilot_mode_number(mav_type, name)
    } else {
        px4_custom_mode(name)
    }
}
