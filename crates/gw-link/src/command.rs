//! Outbound command records and their translation to wire messages.
//!
//! Everything that leaves a link goes through this table. Producers
//! (registry façade, mission engine, router discovery) enqueue records;
//! the link worker drains them and is the only task touching the
//! transport. Send failures are logged and dropped — the queue is
//! best-effort by design.

use crate::config::LinkConfig;
use gw_core::params::encode_param_id;
use gw_core::rc::ManualControlSetpoint;
use mavlink::common::{self, MavCmd, MavParamType};
use mavlink::{MavConnection, MavHeader};
use num_traits::FromPrimitive;
use tracing::warn;

/// MAV_CMD_DO_SET_STANDARD_MODE; absent from older common dialects.
const CMD_DO_SET_STANDARD_MODE: u16 = 262;
/// MAV_CMD_ACTUATOR_TEST, the PX4 motor-test path.
const CMD_ACTUATOR_TEST: u16 = 310;
/// MAV_CMD_NAV_FENCE_POLYGON_VERTEX_INCLUSION.
pub(crate) const CMD_FENCE_POLYGON_VERTEX: u16 = 5001;
/// MAV_CMD_NAV_FENCE_CIRCLE_INCLUSION.
pub(crate) const CMD_FENCE_CIRCLE: u16 = 5003;
/// CAMERA_INFORMATION message id, for MAV_CMD_REQUEST_MESSAGE.
const CAMERA_INFORMATION_MSG_ID: u32 = 259;

/// Frame tag for outbound mission items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemFrame {
    /// Absolute (home slot, fence vertices).
    GlobalInt,
    /// Altitude relative to home (regular mission items).
    GlobalRelativeAltInt,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MissionItemOut {
    pub seq: u16,
    pub frame: ItemFrame,
    pub command: u16,
    pub autocontinue: u8,
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
    pub param4: f32,
    pub x: i32,
    pub y: i32,
    pub z: f32,
    pub fence: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CommandKind {
    RequestDataStream { stream_id: u8, rate_hz: u16 },
    SetMessageInterval { msg_id: u32, interval_us: i32 },
    Arm,
    Disarm,
    Takeoff { alt: f32 },
    Land,
    /// Custom mode resolved from the per-flavor tables before enqueue.
    SetMode { custom_mode: u32 },
    SetStandardMode { standard_mode: u8 },
    Goto { lat: f64, lon: f64, alt: f32 },
    SetHome { use_current: bool, lat: f64, lon: f64, alt: f32 },
    SetRoi { lat: f64, lon: f64, alt: f32 },
    PreflightCalibration { params: [f32; 6] },
    RcOverride { channels: [u16; 8] },
    ManualControl { setpoint: ManualControlSetpoint },
    MotorTest { motor: u8, throttle_pct: f32, duration_s: f32, all_motors: bool },
    ServoSet { servo: u8, pwm: u16 },
    GimbalPitchYaw { pitch_deg: f32, yaw_deg: f32, pitch_rate: f32, yaw_rate: f32 },
    RequestCameraInfo,
    RequestParamList,
    SetParam { name: String, value: f32, param_type: u8 },
    // Mission microprotocol sends, produced by the mission engine.
    MissionCount { count: u16, fence: bool },
    MissionItemInt(MissionItemOut),
    MissionRequestList { fence: bool },
    MissionRequestInt { seq: u16, fence: bool },
    MissionAck { fence: bool },
    MissionClearAll { fence: bool },
    MissionSetCurrent { seq: u16 },
    FenceEnable { enable: bool },
}

/// One queue entry: a command plus the vehicle it addresses.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OutboundCommand {
    pub kind: CommandKind,
    pub target_system: u8,
    pub target_component: u8,
    pub ardupilot: bool,
}

pub(crate) fn gcs_header(config: &LinkConfig) -> MavHeader {
    MavHeader {
        system_id: config.gcs_system_id,
        component_id: config.gcs_component_id,
        sequence: 0,
    }
}

/// Send one message, logging and swallowing transport errors.
pub(crate) fn send_message(
    connection: &(impl MavConnection<common::MavMessage> + ?Sized),
    config: &LinkConfig,
    message: common::MavMessage,
) {
    if let Err(err) = connection.send(&gcs_header(config), &message) {
        warn!("send failed: {err}");
    }
}

pub(crate) fn heartbeat_message() -> common::MavMessage {
    common::MavMessage::HEARTBEAT(common::HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: common::MavType::MAV_TYPE_GCS,
        autopilot: common::MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: common::MavModeFlag::empty(),
        system_status: common::MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}

fn command_long(
    target_system: u8,
    target_component: u8,
    command: MavCmd,
    params: [f32; 7],
) -> common::MavMessage {
    common::MavMessage::COMMAND_LONG(common::COMMAND_LONG_DATA {
        target_system,
        target_component,
        command,
        confirmation: 0,
        param1: params[0],
        param2: params[1],
        param3: params[2],
        param4: params[3],
        param5: params[4],
        param6: params[5],
        param7: params[6],
    })
}

fn mission_type_of(fence: bool) -> common::MavMissionType {
    if fence {
        common::MavMissionType::MAV_MISSION_TYPE_FENCE
    } else {
        common::MavMissionType::MAV_MISSION_TYPE_MISSION
    }
}

fn item_frame_of(frame: ItemFrame) -> common::MavFrame {
    match frame {
        ItemFrame::GlobalInt => common::MavFrame::MAV_FRAME_GLOBAL_INT,
        ItemFrame::GlobalRelativeAltInt => common::MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
    }
}

/// Translate one record into the message(s) it emits and push them onto
/// the wire.
pub(crate) fn execute(
    connection: &(impl MavConnection<common::MavMessage> + ?Sized),
    config: &LinkConfig,
    record: OutboundCommand,
) {
    let ts = record.target_system;
    let tc = record.target_component;

    match record.kind {
        CommandKind::RequestDataStream { stream_id, rate_hz } => {
            send_message(
                connection,
                config,
                common::MavMessage::REQUEST_DATA_STREAM(common::REQUEST_DATA_STREAM_DATA {
                    req_message_rate: rate_hz,
                    target_system: ts,
                    target_component: tc,
                    req_stream_id: stream_id,
                    start_stop: 1,
                }),
            );
        }
        CommandKind::SetMessageInterval { msg_id, interval_us } => {
            send_message(
                connection,
                config,
                command_long(
                    ts,
                    tc,
                    MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
                    [msg_id as f32, interval_us as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
                ),
            );
        }
        CommandKind::Arm => {
            send_message(
                connection,
                config,
                command_long(
                    ts,
                    tc,
                    MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
                    [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                ),
            );
        }
        CommandKind::Disarm => {
            send_message(
                connection,
                config,
                command_long(
                    ts,
                    tc,
                    MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
                    [0.0; 7],
                ),
            );
        }
        CommandKind::Takeoff { alt } => {
            send_message(
                connection,
                config,
                command_long(
                    ts,
                    tc,
                    MavCmd::MAV_CMD_NAV_TAKEOFF,
                    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, alt],
                ),
            );
        }
        CommandKind::Land => {
            send_message(
                connection,
                config,
                command_long(ts, tc, MavCmd::MAV_CMD_NAV_LAND, [0.0; 7]),
            );
        }
        CommandKind::SetMode { custom_mode } => {
            // The legacy SET_MODE message cannot carry the
            // custom-mode-enabled flag through the typed codec; both
            // flavors take DO_SET_MODE.
            send_message(
                connection,
                config,
                command_long(
                    ts,
                    tc,
                    MavCmd::MAV_CMD_DO_SET_MODE,
                    [1.0, custom_mode as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
                ),
            );
        }
        CommandKind::SetStandardMode { standard_mode } => {
            match MavCmd::from_u16(CMD_DO_SET_STANDARD_MODE) {
                Some(command) => send_message(
                    connection,
                    config,
                    command_long(
                        ts,
                        tc,
                        command,
                        [standard_mode as f32, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                    ),
                ),
                None => warn!("dialect lacks DO_SET_STANDARD_MODE, dropping"),
            }
        }
        CommandKind::Goto { lat, lon, alt } => {
            send_message(
                connection,
                config,
                common::MavMessage::SET_POSITION_TARGET_GLOBAL_INT(
                    common::SET_POSITION_TARGET_GLOBAL_INT_DATA {
                        time_boot_ms: 0,
                        target_system: ts,
                        target_component: tc,
                        coordinate_frame: common::MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
                        // Position-only: velocity, acceleration and yaw
                        // bits masked out.
                        type_mask: common::PositionTargetTypemask::from_bits_truncate(0x0FF8),
                        lat_int: gw_core::mission::degrees_to_wire(lat),
                        lon_int: gw_core::mission::degrees_to_wire(lon),
                        alt,
                        vx: 0.0,
                        vy: 0.0,
                        vz: 0.0,
                        afx: 0.0,
                        afy: 0.0,
                        afz: 0.0,
                        yaw: 0.0,
                        yaw_rate: 0.0,
                    },
                ),
            );
        }
        CommandKind::SetHome { use_current, lat, lon, alt } => {
            send_message(
                connection,
                config,
                command_long(
                    ts,
                    tc,
                    MavCmd::MAV_CMD_DO_SET_HOME,
                    [
                        if use_current { 1.0 } else { 0.0 },
                        0.0,
                        0.0,
                        0.0,
                        lat as f32,
                        lon as f32,
                        alt,
                    ],
                ),
            );
        }
        CommandKind::SetRoi { lat, lon, alt } => {
            send_message(
                connection,
                config,
                command_long(
                    ts,
                    tc,
                    MavCmd::MAV_CMD_DO_SET_ROI_LOCATION,
                    [0.0, 0.0, 0.0, 0.0, lat as f32, lon as f32, alt],
                ),
            );
        }
        CommandKind::PreflightCalibration { params } => {
            send_message(
                connection,
                config,
                command_long(
                    ts,
                    tc,
                    MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION,
                    [
                        params[0], params[1], params[2], params[3], params[4], params[5], 0.0,
                    ],
                ),
            );
        }
        CommandKind::RcOverride { channels } => {
            send_message(
                connection,
                config,
                common::MavMessage::RC_CHANNELS_OVERRIDE(common::RC_CHANNELS_OVERRIDE_DATA {
                    chan1_raw: channels[0],
                    chan2_raw: channels[1],
                    chan3_raw: channels[2],
                    chan4_raw: channels[3],
                    chan5_raw: channels[4],
                    chan6_raw: channels[5],
                    chan7_raw: channels[6],
                    chan8_raw: channels[7],
                    target_system: ts,
                    target_component: tc,
                    ..Default::default()
                }),
            );
        }
        CommandKind::ManualControl { setpoint } => {
            send_message(
                connection,
                config,
                common::MavMessage::MANUAL_CONTROL(common::MANUAL_CONTROL_DATA {
                    target: ts,
                    x: setpoint.x,
                    y: setpoint.y,
                    z: setpoint.z,
                    r: setpoint.r,
                    buttons: 0,
                    ..Default::default()
                }),
            );
        }
        CommandKind::MotorTest { motor, throttle_pct, duration_s, all_motors } => {
            if record.ardupilot {
                let motor_count = if all_motors { 0.0 } else { 1.0 };
                send_message(
                    connection,
                    config,
                    command_long(
                        ts,
                        tc,
                        MavCmd::MAV_CMD_DO_MOTOR_TEST,
                        [
                            motor as f32,
                            0.0, // throttle type: percent
                            throttle_pct,
                            duration_s,
                            motor_count,
                            0.0,
                            0.0,
                        ],
                    ),
                );
            } else {
                let Some(command) = MavCmd::from_u16(CMD_ACTUATOR_TEST) else {
                    warn!("dialect lacks ACTUATOR_TEST, dropping motor test");
                    return;
                };
                let value = throttle_pct / 100.0;
                if all_motors {
                    for n in 1..=8u8 {
                        send_message(
                            connection,
                            config,
                            command_long(
                                ts,
                                tc,
                                command,
                                [value, duration_s, 0.0, 0.0, (100 + n) as f32, 0.0, 0.0],
                            ),
                        );
                        std::thread::sleep(config.motor_test_spacing);
                    }
                } else {
                    send_message(
                        connection,
                        config,
                        command_long(
                            ts,
                            tc,
                            command,
                            [value, duration_s, 0.0, 0.0, (100 + motor) as f32, 0.0, 0.0],
                        ),
                    );
                }
            }
        }
        CommandKind::ServoSet { servo, pwm } => {
            send_message(
                connection,
                config,
                command_long(
                    ts,
                    tc,
                    MavCmd::MAV_CMD_DO_SET_SERVO,
                    [servo as f32, pwm as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
                ),
            );
        }
        CommandKind::GimbalPitchYaw { pitch_deg, yaw_deg, pitch_rate, yaw_rate } => {
            send_message(
                connection,
                config,
                command_long(
                    ts,
                    tc,
                    MavCmd::MAV_CMD_DO_GIMBAL_MANAGER_PITCHYAW,
                    [
                        pitch_deg.to_radians(),
                        yaw_deg.to_radians(),
                        pitch_rate,
                        yaw_rate,
                        0.0,
                        0.0,
                        0.0,
                    ],
                ),
            );
        }
        CommandKind::RequestCameraInfo => {
            // Broadcast to every component so cameras on companion ids
            // answer too.
            send_message(
                connection,
                config,
                command_long(
                    ts,
                    0,
                    MavCmd::MAV_CMD_REQUEST_MESSAGE,
                    [CAMERA_INFORMATION_MSG_ID as f32, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                ),
            );
        }
        CommandKind::RequestParamList => {
            send_message(
                connection,
                config,
                common::MavMessage::PARAM_REQUEST_LIST(common::PARAM_REQUEST_LIST_DATA {
                    target_system: ts,
                    target_component: tc,
                }),
            );
        }
        CommandKind::SetParam { name, value, param_type } => {
            let param_type = MavParamType::from_u8(param_type)
                .unwrap_or(MavParamType::MAV_PARAM_TYPE_REAL32);
            send_message(
                connection,
                config,
                common::MavMessage::PARAM_SET(common::PARAM_SET_DATA {
                    param_value: value,
                    target_system: ts,
                    target_component: tc,
                    param_id: encode_param_id(&name).into(),
                    param_type,
                }),
            );
        }
        CommandKind::MissionCount { count, fence } => {
            send_message(
                connection,
                config,
                common::MavMessage::MISSION_COUNT(common::MISSION_COUNT_DATA {
                    count,
                    target_system: ts,
                    target_component: tc,
                    mission_type: mission_type_of(fence),
                    opaque_id: 0,
                }),
            );
        }
        CommandKind::MissionItemInt(item) => {
            let Some(command) = MavCmd::from_u16(item.command) else {
                warn!("unsupported MAV_CMD {} in mission item", item.command);
                return;
            };
            send_message(
                connection,
                config,
                common::MavMessage::MISSION_ITEM_INT(common::MISSION_ITEM_INT_DATA {
                    param1: item.param1,
                    param2: item.param2,
                    param3: item.param3,
                    param4: item.param4,
                    x: item.x,
                    y: item.y,
                    z: item.z,
                    seq: item.seq,
                    command,
                    target_system: ts,
                    target_component: tc,
                    frame: item_frame_of(item.frame),
                    current: 0,
                    autocontinue: item.autocontinue,
                    mission_type: mission_type_of(item.fence),
                }),
            );
        }
        CommandKind::MissionRequestList { fence } => {
            send_message(
                connection,
                config,
                common::MavMessage::MISSION_REQUEST_LIST(common::MISSION_REQUEST_LIST_DATA {
                    target_system: ts,
                    target_component: tc,
                    mission_type: mission_type_of(fence),
                }),
            );
        }
        CommandKind::MissionRequestInt { seq, fence } => {
            send_message(
                connection,
                config,
                common::MavMessage::MISSION_REQUEST_INT(common::MISSION_REQUEST_INT_DATA {
                    seq,
                    target_system: ts,
                    target_component: tc,
                    mission_type: mission_type_of(fence),
                }),
            );
        }
        CommandKind::MissionAck { fence } => {
            send_message(
                connection,
                config,
                common::MavMessage::MISSION_ACK(common::MISSION_ACK_DATA {
                    target_system: ts,
                    target_component: tc,
                    mavtype: common::MavMissionResult::MAV_MISSION_ACCEPTED,
                    mission_type: mission_type_of(fence),
                    opaque_id: 0,
                }),
            );
        }
        CommandKind::MissionClearAll { fence } => {
            send_message(
                connection,
                config,
                common::MavMessage::MISSION_CLEAR_ALL(common::MISSION_CLEAR_ALL_DATA {
                    target_system: ts,
                    target_component: tc,
                    mission_type: mission_type_of(fence),
                }),
            );
        }
        CommandKind::MissionSetCurrent { seq } => {
            send_message(
                connection,
                config,
                common::MavMessage::MISSION_SET_CURRENT(common::MISSION_SET_CURRENT_DATA {
                    seq,
                    target_system: ts,
                    target_component: tc,
                }),
            );
        }
        CommandKind::FenceEnable { enable } => {
            send_message(
                connection,
                config,
                command_long(
                    ts,
                    tc,
                    MavCmd::MAV_CMD_DO_FENCE_ENABLE,
                    [if enable { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                ),
            );
        }
    }
}

/// Telemetry stream schedule requested right after a vehicle appears.
pub(crate) fn default_stream_requests(ardupilot: bool) -> Vec<CommandKind> {
    if ardupilot {
        // (MAV_DATA_STREAM id, rate Hz)
        const STREAMS: &[(u8, u16)] = &[
            (0, 4),  // ALL
            (1, 2),  // RAW_SENSORS
            (2, 2),  // EXTENDED_STATUS
            (3, 2),  // RC_CHANNELS
            (6, 10), // POSITION
            (10, 10), // EXTRA1
            (11, 10), // EXTRA2
            (12, 2), // EXTRA3
        ];
        STREAMS
            .iter()
            .map(|&(stream_id, rate_hz)| CommandKind::RequestDataStream { stream_id, rate_hz })
            .collect()
    } else {
        // (message id, interval µs)
        const INTERVALS: &[(u32, i32)] = &[
            (0, 1_000_000),  // HEARTBEAT
            (30, 100_000),   // ATTITUDE
            (33, 100_000),   // GLOBAL_POSITION_INT
            (24, 500_000),   // GPS_RAW_INT
            (74, 100_000),   // VFR_HUD
            (1, 500_000),    // SYS_STATUS
        ];
        INTERVALS
            .iter()
            .map(|&(msg_id, interval_us)| CommandKind::SetMessageInterval { msg_id, interval_us })
            .collect()
    }
}
