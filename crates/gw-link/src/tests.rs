//! Runtime tests over a scripted connection: handshake, routing,
//! mission transfers, registry behavior. No sockets involved.

use crate::command::{CommandKind, OutboundCommand};
use crate::config::LinkConfig;
use crate::link::Link;
use crate::mission::MissionManager;
use crate::registry::{Registry, SetParamOutcome};
use crate::router::{DiscoveryHook, Router};
use crate::vehicle::{now_unix, Vehicle};
use gw_core::mission::{FencePoint, MissionStatus, Waypoint, WaypointKind};
use mavlink::common::{self, MavMessage};
use mavlink::error::{MessageReadError, MessageWriteError};
use mavlink::{MAVLinkMessageRaw, MavConnection, MavFrame, MavHeader, MavlinkVersion};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Scripted connection
// ---------------------------------------------------------------------------

struct MockConnection {
    protocol_version: Mutex<MavlinkVersion>,
    allow_any: Mutex<bool>,
    incoming: Arc<Mutex<VecDeque<(MavHeader, MavMessage)>>>,
    sent: Arc<Mutex<Vec<MavMessage>>>,
}

impl MockConnection {
    fn new(messages: Vec<(MavHeader, MavMessage)>) -> Self {
        Self {
            protocol_version: Mutex::new(MavlinkVersion::V2),
            allow_any: Mutex::new(true),
            incoming: Arc::new(Mutex::new(messages.into_iter().collect())),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn sent_handle(&self) -> Arc<Mutex<Vec<MavMessage>>> {
        self.sent.clone()
    }
}

impl MavConnection<MavMessage> for MockConnection {
    fn recv(&self) -> Result<(MavHeader, MavMessage), MessageReadError> {
        self.try_recv()
    }

    fn recv_raw(&self) -> Result<MAVLinkMessageRaw, MessageReadError> {
        Err(MessageReadError::Io(std::io::ErrorKind::WouldBlock.into()))
    }

    fn try_recv(&self) -> Result<(MavHeader, MavMessage), MessageReadError> {
        if let Some(message) = self.incoming.lock().expect("incoming lock").pop_front() {
            Ok(message)
        } else {
            Err(MessageReadError::Io(std::io::ErrorKind::WouldBlock.into()))
        }
    }

    fn send(&self, _header: &MavHeader, data: &MavMessage) -> Result<usize, MessageWriteError> {
        self.sent.lock().expect("sent lock").push(data.clone());
        Ok(1)
    }

    fn set_protocol_version(&mut self, version: MavlinkVersion) {
        *self.protocol_version.lock().expect("protocol lock") = version;
    }

    fn protocol_version(&self) -> MavlinkVersion {
        *self.protocol_version.lock().expect("protocol lock")
    }

    fn set_allow_recv_any_version(&mut self, allow: bool) {
        *self.allow_any.lock().expect("allow lock") = allow;
    }

    fn allow_recv_any_version(&self) -> bool {
        *self.allow_any.lock().expect("allow lock")
    }

    fn send_frame(&self, frame: &MavFrame<MavMessage>) -> Result<usize, MessageWriteError> {
        self.send(&frame.header, &frame.msg)
    }
}

// ---------------------------------------------------------------------------
// Frame builders
// ---------------------------------------------------------------------------

fn header(system_id: u8, component_id: u8) -> MavHeader {
    MavHeader {
        system_id,
        component_id,
        sequence: 0,
    }
}

fn autopilot_heartbeat(base_mode: u8, custom_mode: u32, mavtype: common::MavType) -> MavMessage {
    MavMessage::HEARTBEAT(common::HEARTBEAT_DATA {
        custom_mode,
        mavtype,
        autopilot: common::MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
        base_mode: common::MavModeFlag::from_bits_truncate(base_mode),
        system_status: common::MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}

fn gimbal_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(common::HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: common::MavType::MAV_TYPE_GIMBAL,
        autopilot: common::MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: common::MavModeFlag::empty(),
        system_status: common::MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}

fn mission_request_int(seq: u16, fence: bool) -> MavMessage {
    MavMessage::MISSION_REQUEST_INT(common::MISSION_REQUEST_INT_DATA {
        seq,
        target_system: 255,
        target_component: 0,
        mission_type: mission_type(fence),
    })
}

fn mission_ack(result: common::MavMissionResult, fence: bool) -> MavMessage {
    MavMessage::MISSION_ACK(common::MISSION_ACK_DATA {
        target_system: 255,
        target_component: 0,
        mavtype: result,
        mission_type: mission_type(fence),
        opaque_id: 0,
    })
}

fn mission_count(count: u16, fence: bool) -> MavMessage {
    MavMessage::MISSION_COUNT(common::MISSION_COUNT_DATA {
        count,
        target_system: 255,
        target_component: 0,
        mission_type: mission_type(fence),
        opaque_id: 0,
    })
}

fn mission_item_int(seq: u16, x: i32, y: i32, z: f32, param2: f32, fence: bool) -> MavMessage {
    MavMessage::MISSION_ITEM_INT(common::MISSION_ITEM_INT_DATA {
        param1: 0.0,
        param2,
        param3: 0.0,
        param4: 0.0,
        x,
        y,
        z,
        seq,
        command: common::MavCmd::MAV_CMD_NAV_WAYPOINT,
        target_system: 255,
        target_component: 0,
        frame: common::MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
        current: 0,
        autocontinue: 1,
        mission_type: mission_type(fence),
    })
}

fn mission_type(fence: bool) -> common::MavMissionType {
    if fence {
        common::MavMissionType::MAV_MISSION_TYPE_FENCE
    } else {
        common::MavMissionType::MAV_MISSION_TYPE_MISSION
    }
}

fn fast_config() -> LinkConfig {
    LinkConfig {
        handshake_timeout: Duration::from_millis(300),
        request_timeout: Duration::from_millis(150),
        mission_timeout: Duration::from_millis(600),
        fence_timeout: Duration::from_millis(600),
        ..LinkConfig::default()
    }
}

fn noop_hook() -> DiscoveryHook {
    Arc::new(|_| {})
}

fn test_vehicle(
    ardupilot: bool,
    mav_type: u8,
) -> (Arc<Vehicle>, Receiver<OutboundCommand>) {
    let (tx, rx) = mpsc::channel();
    let vehicle = Arc::new(Vehicle::new(1, 1, ardupilot, mav_type, tx, fast_config()));
    (vehicle, rx)
}

fn drain_commands(rx: &Receiver<OutboundCommand>) -> Vec<CommandKind> {
    let mut kinds = Vec::new();
    while let Ok(record) = rx.try_recv() {
        kinds.push(record.kind);
    }
    kinds
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[test]
fn handshake_skips_peripheral_and_discovers_autopilot() {
    let script = vec![
        (header(1, 26), gimbal_heartbeat()),
        (
            header(1, 1),
            autopilot_heartbeat(217, 4, common::MavType::MAV_TYPE_QUADROTOR),
        ),
    ];
    let connection = MockConnection::new(script);
    let sent = connection.sent_handle();

    let discovered: Arc<Mutex<Vec<Arc<Vehicle>>>> = Arc::new(Mutex::new(Vec::new()));
    let hook_sink = discovered.clone();
    let hook: DiscoveryHook = Arc::new(move |vehicle| {
        hook_sink.lock().unwrap().push(vehicle.clone());
    });

    let mut link = Link::from_connection(
        Box::new(connection),
        "udpin:0.0.0.0:14550".to_string(),
        fast_config(),
        hook,
    )
    .expect("handshake should succeed");

    let vehicles = link.vehicles_snapshot();
    assert_eq!(vehicles.len(), 1);
    let vehicle = &vehicles[0];
    assert_eq!(vehicle.target_system, 1);
    assert!(vehicle.ardupilot);

    let snapshot = vehicle.snapshot();
    assert_eq!(snapshot.platform_type, "Quadrotor");
    assert_eq!(snapshot.autopilot, "ardupilot");
    assert_eq!(snapshot.mode, "GUIDED");
    assert!(snapshot.armed);

    assert_eq!(discovered.lock().unwrap().len(), 1);

    // The gimbal is inventory only, never a vehicle.
    let components = link.inspector.components(now_unix());
    assert_eq!(components.len(), 2);
    let gimbal = components
        .iter()
        .find(|c| c.src_component == 26)
        .expect("gimbal entry");
    assert_eq!(gimbal.category, "peripheral");
    assert!(!gimbal.is_target);
    let autopilot = components
        .iter()
        .find(|c| c.src_component == 1)
        .expect("autopilot entry");
    assert!(autopilot.is_target);

    // The worker drains the discovery-time stream schedule.
    std::thread::sleep(Duration::from_millis(200));
    link.close();
    let sent = sent.lock().unwrap();
    let stream_requests = sent
        .iter()
        .filter(|m| matches!(m, MavMessage::REQUEST_DATA_STREAM(_)))
        .count();
    assert_eq!(stream_requests, 8);
    assert!(sent
        .iter()
        .any(|m| matches!(m, MavMessage::HEARTBEAT(_))));
}

#[test]
fn handshake_fails_without_autopilot_heartbeat() {
    let script = vec![(header(1, 26), gimbal_heartbeat())];
    let connection = MockConnection::new(script);

    let result = Link::from_connection(
        Box::new(connection),
        "udpin:0.0.0.0:14550".to_string(),
        fast_config(),
        noop_hook(),
    );
    assert!(matches!(result, Err(crate::error::LinkError::HandshakeTimeout)));
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

fn router_with_vehicle(
    ardupilot: bool,
    mav_type: u8,
) -> (Router, Arc<Vehicle>, Receiver<OutboundCommand>) {
    let (tx, rx) = mpsc::channel();
    let vehicle = Arc::new(Vehicle::new(1, 1, ardupilot, mav_type, tx.clone(), fast_config()));
    let mut map = HashMap::new();
    map.insert(1u8, vehicle.clone());
    let router = Router::new(
        Arc::new(Mutex::new(map)),
        Arc::new(crate::inspector::Inspector::new()),
        tx,
        fast_config(),
        noop_hook(),
    );
    (router, vehicle, rx)
}

#[test]
fn router_applies_telemetry_and_bumps_generation() {
    let (router, vehicle, _rx) = router_with_vehicle(true, 2);
    let generation_before = vehicle.generation();

    router.handle(
        &header(1, 1),
        &MavMessage::ATTITUDE(common::ATTITUDE_DATA {
            time_boot_ms: 0,
            roll: 0.1,
            pitch: -0.2,
            yaw: 1.5,
            rollspeed: 0.0,
            pitchspeed: 0.0,
            yawspeed: 0.0,
        }),
        now_unix(),
    );
    router.handle(
        &header(1, 1),
        &MavMessage::GLOBAL_POSITION_INT(common::GLOBAL_POSITION_INT_DATA {
            time_boot_ms: 0,
            lat: 515_000_000,
            lon: -1_000_000,
            alt: 120_000,
            relative_alt: 50_000,
            vx: 0,
            vy: 0,
            vz: 0,
            hdg: 9000,
        }),
        now_unix(),
    );
    router.handle(
        &header(1, 1),
        &MavMessage::SYS_STATUS(common::SYS_STATUS_DATA {
            voltage_battery: 12600,
            current_battery: -1,
            battery_remaining: 88,
            ..Default::default()
        }),
        now_unix(),
    );

    let snapshot = vehicle.snapshot();
    assert!((snapshot.roll - 0.1).abs() < 1e-6);
    assert!((snapshot.lat - 51.5).abs() < 1e-7);
    assert!((snapshot.lon - (-0.1)).abs() < 1e-7);
    assert!((snapshot.alt - 50.0).abs() < 1e-6);
    assert!((snapshot.alt_msl - 120.0).abs() < 1e-6);
    assert!((snapshot.voltage - 12.6).abs() < 1e-3);
    assert_eq!(snapshot.current, 0.0);
    assert_eq!(snapshot.remaining, 88);
    assert_eq!(vehicle.generation(), generation_before + 3);
}

#[test]
fn router_gps_sentinel_hdop() {
    let (router, vehicle, _rx) = router_with_vehicle(true, 2);
    router.handle(
        &header(1, 1),
        &MavMessage::GPS_RAW_INT(common::GPS_RAW_INT_DATA {
            eph: u16::MAX,
            fix_type: common::GpsFixType::GPS_FIX_TYPE_3D_FIX,
            satellites_visible: 11,
            ..Default::default()
        }),
        now_unix(),
    );
    let snapshot = vehicle.snapshot();
    assert_eq!(snapshot.satellites, 11);
    assert_eq!(snapshot.fix_type, 3);
    assert!((snapshot.hdop - 99.99).abs() < 1e-3);
}

#[test]
fn router_statustext_dedupes_within_window() {
    let (router, vehicle, _rx) = router_with_vehicle(true, 2);
    let mut text = [0u8; 50];
    for (slot, byte) in text.iter_mut().zip(b"PreArm: check failed") {
        *slot = *byte;
    }
    let msg = MavMessage::STATUSTEXT(common::STATUSTEXT_DATA {
        severity: common::MavSeverity::MAV_SEVERITY_WARNING,
        text: text.into(),
        ..Default::default()
    });
    let now = now_unix();
    router.handle(&header(1, 1), &msg, now);
    router.handle(&header(1, 1), &msg, now + 0.2);
    assert_eq!(vehicle.pending_statustext(), 1);

    router.handle(&header(1, 1), &msg, now + 1.5);
    assert_eq!(vehicle.pending_statustext(), 2);

    let drained = vehicle.drain_statustext();
    assert_eq!(drained[0].text, "PreArm: check failed");
    assert_eq!(drained[0].severity, 4);
    assert_eq!(vehicle.pending_statustext(), 0);
}

#[test]
fn router_synthesizes_calibration_status() {
    let (router, vehicle, _rx) = router_with_vehicle(true, 2);
    router.handle(
        &header(1, 1),
        &MavMessage::COMMAND_ACK(common::COMMAND_ACK_DATA {
            command: common::MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION,
            result: common::MavResult::MAV_RESULT_IN_PROGRESS,
            ..Default::default()
        }),
        now_unix(),
    );
    let drained = vehicle.drain_statustext();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].text, "Calibration in progress");
    assert_eq!(drained[0].severity, 6);
}

#[test]
fn router_routes_mission_frames_to_inbox() {
    let (router, vehicle, _rx) = router_with_vehicle(true, 2);
    router.handle(&header(1, 1), &mission_request_int(3, false), now_unix());
    let msg = vehicle
        .recv_mission_msg(Duration::from_millis(50))
        .expect("inbox delivery");
    assert!(matches!(msg, MavMessage::MISSION_REQUEST_INT(data) if data.seq == 3));
}

#[test]
fn router_stores_params_with_trimmed_names() {
    let (router, vehicle, _rx) = router_with_vehicle(true, 2);
    let mut param_id = [0u8; 16];
    for (slot, byte) in param_id.iter_mut().zip(b"RTL_ALT") {
        *slot = *byte;
    }
    router.handle(
        &header(1, 1),
        &MavMessage::PARAM_VALUE(common::PARAM_VALUE_DATA {
            param_value: 1500.0,
            param_count: 900,
            param_index: 7,
            param_id: param_id.into(),
            param_type: common::MavParamType::MAV_PARAM_TYPE_INT16,
        }),
        now_unix(),
    );
    let (params, total) = vehicle.params_snapshot();
    assert_eq!(total, 900);
    let param = params.get("RTL_ALT").expect("param stored");
    assert_eq!(param.value, 1500.0);
    assert_eq!(param.index, 7);
}

#[test]
fn router_px4_mode_decode() {
    let (router, vehicle, _rx) = router_with_vehicle(false, 2);
    let custom = (4u32 << 16) | (4u32 << 24);
    let mut hb = autopilot_heartbeat(129, custom, common::MavType::MAV_TYPE_QUADROTOR);
    if let MavMessage::HEARTBEAT(ref mut data) = hb {
        data.autopilot = common::MavAutopilot::MAV_AUTOPILOT_PX4;
    }
    router.handle(&header(1, 1), &hb, now_unix());
    let snapshot = vehicle.snapshot();
    assert_eq!(snapshot.mode, "AUTO_MISSION");
    assert!(snapshot.armed);
}

// ---------------------------------------------------------------------------
// Mission engine
// ---------------------------------------------------------------------------

fn expect_kind<F: Fn(&CommandKind) -> bool>(
    rx: &Receiver<OutboundCommand>,
    predicate: F,
    what: &str,
) -> CommandKind {
    let record = rx
        .recv_timeout(Duration::from_secs(2))
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    assert!(predicate(&record.kind), "unexpected command for {what}: {:?}", record.kind);
    record.kind
}

#[test]
fn mission_upload_round_trip() {
    let (vehicle, rx) = test_vehicle(true, 2);
    let manager = Arc::new(MissionManager::new(vehicle.clone(), fast_config()));

    let waypoints = vec![Waypoint {
        param2: 2.0,
        ..Waypoint::new(51.5, -0.1, 50.0)
    }];
    let uploader = {
        let manager = manager.clone();
        std::thread::spawn(move || manager.upload(&waypoints))
    };

    expect_kind(
        &rx,
        |k| matches!(k, CommandKind::MissionCount { count: 2, fence: false }),
        "MISSION_COUNT",
    );
    assert_eq!(manager.status(), MissionStatus::Uploading);

    vehicle.deliver_mission_msg(mission_request_int(0, false));
    vehicle.deliver_mission_msg(mission_request_int(1, false));
    vehicle.deliver_mission_msg(mission_ack(
        common::MavMissionResult::MAV_MISSION_ACCEPTED,
        false,
    ));

    let result = uploader.join().expect("uploader thread");
    assert!(result.is_ok());
    assert_eq!(manager.status(), MissionStatus::Uploaded);

    // Home slot carries the first waypoint's position at ground level.
    let home = expect_kind(
        &rx,
        |k| matches!(k, CommandKind::MissionItemInt(item) if item.seq == 0),
        "home item",
    );
    if let CommandKind::MissionItemInt(item) = home {
        assert_eq!(item.x, 515_000_000);
        assert_eq!(item.y, -1_000_000);
        assert_eq!(item.z, 0.0);
        assert_eq!(item.command, WaypointKind::Waypoint.command());
    }

    let first = expect_kind(
        &rx,
        |k| matches!(k, CommandKind::MissionItemInt(item) if item.seq == 1),
        "waypoint item",
    );
    if let CommandKind::MissionItemInt(item) = first {
        assert_eq!(item.x, 515_000_000);
        assert_eq!(item.z, 50.0);
        assert_eq!(item.param2, 2.0);
        assert!(!item.fence);
    }
}

#[test]
fn mission_upload_rejects_invalid_coordinates() {
    let (vehicle, rx) = test_vehicle(true, 2);
    let manager = MissionManager::new(vehicle, fast_config());
    let result = manager.upload(&[Waypoint::new(91.0, -0.1, 50.0)]);
    assert!(matches!(
        result,
        Err(crate::error::LinkError::MissionValidation(_))
    ));
    assert!(rx.try_recv().is_err(), "invalid plan must not reach the wire");
}

#[test]
fn mission_upload_rejects_empty_list() {
    let (vehicle, _rx) = test_vehicle(true, 2);
    let manager = MissionManager::new(vehicle, fast_config());
    assert!(manager.upload(&[]).is_err());
    assert_eq!(manager.status(), MissionStatus::Idle);
}

#[test]
fn mission_upload_fails_on_nack() {
    let (vehicle, rx) = test_vehicle(true, 2);
    let manager = Arc::new(MissionManager::new(vehicle.clone(), fast_config()));

    let waypoints = vec![Waypoint::new(51.5, -0.1, 50.0)];
    let uploader = {
        let manager = manager.clone();
        std::thread::spawn(move || manager.upload(&waypoints))
    };
    // Delivery only after the inbox drain, observed via MISSION_COUNT.
    expect_kind(
        &rx,
        |k| matches!(k, CommandKind::MissionCount { .. }),
        "MISSION_COUNT",
    );
    vehicle.deliver_mission_msg(mission_ack(
        common::MavMissionResult::MAV_MISSION_ERROR,
        false,
    ));
    let result = uploader.join().expect("uploader thread");
    assert!(result.is_err());
    assert_eq!(manager.status(), MissionStatus::UploadFailed);
}

#[test]
fn mission_upload_fails_on_out_of_range_request() {
    let (vehicle, rx) = test_vehicle(true, 2);
    let manager = Arc::new(MissionManager::new(vehicle.clone(), fast_config()));

    let waypoints = vec![Waypoint::new(51.5, -0.1, 50.0)];
    let uploader = {
        let manager = manager.clone();
        std::thread::spawn(move || manager.upload(&waypoints))
    };
    expect_kind(
        &rx,
        |k| matches!(k, CommandKind::MissionCount { .. }),
        "MISSION_COUNT",
    );
    vehicle.deliver_mission_msg(mission_request_int(9, false));
    let result = uploader.join().expect("uploader thread");
    assert!(result.is_err());
    assert_eq!(manager.status(), MissionStatus::UploadFailed);
}

#[test]
fn mission_upload_times_out_on_silence() {
    let (vehicle, _rx) = test_vehicle(true, 2);
    let manager = MissionManager::new(vehicle, fast_config());
    let result = manager.upload(&[Waypoint::new(51.5, -0.1, 50.0)]);
    assert!(matches!(
        result,
        Err(crate::error::LinkError::MissionTransfer { ref code, .. }) if code == "transfer.timeout"
    ));
    assert_eq!(manager.status(), MissionStatus::UploadFailed);
}

#[test]
fn mission_download_skips_home_and_acks() {
    let (vehicle, rx) = test_vehicle(true, 2);
    let manager = Arc::new(MissionManager::new(vehicle.clone(), fast_config()));

    let downloader = {
        let manager = manager.clone();
        std::thread::spawn(move || manager.download())
    };

    expect_kind(
        &rx,
        |k| matches!(k, CommandKind::MissionRequestList { fence: false }),
        "MISSION_REQUEST_LIST",
    );
    vehicle.deliver_mission_msg(mission_count(2, false));
    vehicle.deliver_mission_msg(mission_item_int(1, 515_000_000, -1_000_000, 50.0, 2.0, false));

    let items = downloader
        .join()
        .expect("downloader thread")
        .expect("download result");
    assert_eq!(items.len(), 1);
    assert!((items[0].lat - 51.5).abs() < 1e-7);
    assert!((items[0].lon - (-0.1)).abs() < 1e-7);
    assert_eq!(items[0].alt, 50.0);
    assert_eq!(items[0].kind, WaypointKind::Waypoint);
    assert_eq!(items[0].param2, 2.0);

    let kinds = drain_commands(&rx);
    assert!(kinds
        .iter()
        .any(|k| matches!(k, CommandKind::MissionRequestInt { seq: 1, fence: false })));
    assert!(kinds
        .iter()
        .any(|k| matches!(k, CommandKind::MissionAck { fence: false })));
}

#[test]
fn mission_download_home_only_is_empty() {
    let (vehicle, rx) = test_vehicle(true, 2);
    let manager = Arc::new(MissionManager::new(vehicle.clone(), fast_config()));

    let downloader = {
        let manager = manager.clone();
        std::thread::spawn(move || manager.download())
    };
    expect_kind(
        &rx,
        |k| matches!(k, CommandKind::MissionRequestList { fence: false }),
        "MISSION_REQUEST_LIST",
    );
    vehicle.deliver_mission_msg(mission_count(1, false));

    let items = downloader.join().unwrap().unwrap();
    assert!(items.is_empty());
}

#[test]
fn fence_circle_upload_enables_fence() {
    let (vehicle, rx) = test_vehicle(true, 2);
    let manager = Arc::new(MissionManager::new(vehicle.clone(), fast_config()));

    let uploader = {
        let manager = manager.clone();
        std::thread::spawn(move || manager.upload_fence_circle(51.5, -0.1, 150.0))
    };

    expect_kind(
        &rx,
        |k| matches!(k, CommandKind::MissionCount { count: 1, fence: true }),
        "fence MISSION_COUNT",
    );
    vehicle.deliver_mission_msg(mission_request_int(0, true));
    vehicle.deliver_mission_msg(mission_ack(
        common::MavMissionResult::MAV_MISSION_ACCEPTED,
        true,
    ));

    assert!(uploader.join().unwrap().is_ok());

    let kinds = drain_commands(&rx);
    let item = kinds
        .iter()
        .find_map(|k| match k {
            CommandKind::MissionItemInt(item) => Some(item),
            _ => None,
        })
        .expect("fence item");
    assert_eq!(item.command, 5003);
    assert_eq!(item.param1, 150.0);
    assert!(item.fence);
    assert!(kinds
        .iter()
        .any(|k| matches!(k, CommandKind::FenceEnable { enable: true })));
}

#[test]
fn fence_polygon_rejects_two_vertices() {
    let (vehicle, _rx) = test_vehicle(true, 2);
    let manager = MissionManager::new(vehicle, fast_config());
    let result = manager.upload_fence_polygon(&[
        FencePoint { lat: 0.0, lon: 0.0 },
        FencePoint { lat: 0.0, lon: 1.0 },
    ]);
    assert!(matches!(
        result,
        Err(crate::error::LinkError::InvalidArgument(_))
    ));
}

#[test]
fn fence_polygon_sends_vertex_count_in_param1() {
    let (vehicle, rx) = test_vehicle(true, 2);
    let manager = Arc::new(MissionManager::new(vehicle.clone(), fast_config()));

    let vertices = vec![
        FencePoint { lat: 51.0, lon: 0.0 },
        FencePoint { lat: 51.1, lon: 0.0 },
        FencePoint { lat: 51.1, lon: 0.1 },
    ];
    let uploader = {
        let manager = manager.clone();
        std::thread::spawn(move || manager.upload_fence_polygon(&vertices))
    };

    expect_kind(
        &rx,
        |k| matches!(k, CommandKind::MissionCount { count: 3, fence: true }),
        "fence MISSION_COUNT",
    );
    for seq in 0..3 {
        vehicle.deliver_mission_msg(mission_request_int(seq, true));
    }
    vehicle.deliver_mission_msg(mission_ack(
        common::MavMissionResult::MAV_MISSION_ACCEPTED,
        true,
    ));
    assert!(uploader.join().unwrap().is_ok());

    let kinds = drain_commands(&rx);
    let items: Vec<_> = kinds
        .iter()
        .filter_map(|k| match k {
            CommandKind::MissionItemInt(item) => Some(item),
            _ => None,
        })
        .collect();
    assert_eq!(items.len(), 3);
    for item in items {
        assert_eq!(item.command, 5001);
        assert_eq!(item.param1, 3.0);
    }
}

#[test]
fn fence_clear_disables_then_clears() {
    let (vehicle, rx) = test_vehicle(true, 2);
    let manager = MissionManager::new(vehicle, fast_config());
    manager.clear_fence();
    let kinds = drain_commands(&rx);
    assert_eq!(kinds.len(), 2);
    assert!(matches!(kinds[0], CommandKind::FenceEnable { enable: false }));
    assert!(matches!(kinds[1], CommandKind::MissionClearAll { fence: true }));
}

#[test]
fn set_current_offsets_by_flavor() {
    let (ardu, ardu_rx) = test_vehicle(true, 2);
    MissionManager::new(ardu, fast_config())
        .set_current(2)
        .unwrap();
    assert!(matches!(
        drain_commands(&ardu_rx)[0],
        CommandKind::MissionSetCurrent { seq: 3 }
    ));

    let (px4, px4_rx) = test_vehicle(false, 2);
    MissionManager::new(px4, fast_config())
        .set_current(2)
        .unwrap();
    assert!(matches!(
        drain_commands(&px4_rx)[0],
        CommandKind::MissionSetCurrent { seq: 2 }
    ));
}

#[test]
fn mission_start_sets_current_then_auto() {
    let (vehicle, rx) = test_vehicle(true, 2);
    let manager = MissionManager::new(vehicle, fast_config());
    manager.start().unwrap();
    assert_eq!(manager.status(), MissionStatus::Running);

    let kinds = drain_commands(&rx);
    assert!(matches!(kinds[0], CommandKind::MissionSetCurrent { seq: 1 }));
    // Copter AUTO is custom mode 3.
    assert!(matches!(kinds[1], CommandKind::SetMode { custom_mode: 3 }));
}

#[test]
fn mission_pause_uses_flavor_hold_mode() {
    let (vehicle, rx) = test_vehicle(true, 2);
    let manager = MissionManager::new(vehicle, fast_config());
    manager.pause().unwrap();
    assert_eq!(manager.status(), MissionStatus::Paused);
    // Copter LOITER is custom mode 5.
    assert!(matches!(
        drain_commands(&rx)[0],
        CommandKind::SetMode { custom_mode: 5 }
    ));
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[test]
fn registry_renames_both_vehicles_on_sysid_collision() {
    let registry = Registry::with_config(fast_config());
    let (first, _rx1) = test_vehicle(true, 2);
    let (second, _rx2) = test_vehicle(true, 2);

    registry.register_vehicle("conn1", first.clone());
    assert_eq!(first.vehicle_id(), "1");
    assert_eq!(registry.active_vehicle_id().as_deref(), Some("1"));

    registry.register_vehicle("conn2", second.clone());
    assert_eq!(first.vehicle_id(), "conn1s1");
    assert_eq!(second.vehicle_id(), "conn2s1");
    assert_eq!(registry.active_vehicle_id().as_deref(), Some("conn1s1"));

    let ids: Vec<String> = registry
        .list_vehicles()
        .into_iter()
        .map(|v| v.vehicle_id)
        .collect();
    assert_eq!(ids, vec!["conn1s1".to_string(), "conn2s1".to_string()]);
}

#[test]
fn registry_rejects_unknown_ids() {
    let registry = Registry::with_config(fast_config());
    assert!(registry.set_active_vehicle("nope").is_err());
    assert!(registry.remove_connection("conn9").is_err());
    assert!(registry.arm(Some("nope")).is_err());
    assert!(registry.arm(None).is_err()); // no active vehicle
}

#[test]
fn registry_critical_param_guard() {
    let registry = Registry::with_config(fast_config());
    let (vehicle, rx) = test_vehicle(true, 2);
    registry.register_vehicle("conn1", vehicle);

    let outcome = registry
        .set_param(None, "BATT_CAPACITY", 5200.0, None, false)
        .unwrap();
    assert_eq!(
        outcome,
        SetParamOutcome::ConfirmRequired {
            category: "battery"
        }
    );
    assert!(rx.try_recv().is_err(), "guarded write must not enqueue");

    let outcome = registry
        .set_param(None, "BATT_CAPACITY", 5200.0, None, true)
        .unwrap();
    assert_eq!(outcome, SetParamOutcome::Sent);
    let kinds = drain_commands(&rx);
    assert!(matches!(
        &kinds[0],
        CommandKind::SetParam { name, param_type: 9, .. } if name == "BATT_CAPACITY"
    ));

    // Ordinary parameters skip the guard entirely.
    let outcome = registry
        .set_param(None, "RTL_ALT", 3000.0, None, false)
        .unwrap();
    assert_eq!(outcome, SetParamOutcome::Sent);
}

#[test]
fn registry_rc_override_translates_for_px4() {
    let registry = Registry::with_config(fast_config());
    let (vehicle, rx) = test_vehicle(false, 2);
    registry.register_vehicle("conn1", vehicle);

    registry
        .rc_override(
            None,
            &[json!(2000), json!(1200), json!(1400), json!(1000)],
        )
        .unwrap();

    let kinds = drain_commands(&rx);
    match &kinds[0] {
        CommandKind::ManualControl { setpoint } => {
            assert_eq!(setpoint.y, 1000);
            assert_eq!(setpoint.x, -600);
            assert_eq!(setpoint.z, 400);
            assert_eq!(setpoint.r, -1000);
        }
        other => panic!("expected MANUAL_CONTROL, got {other:?}"),
    }
}

#[test]
fn registry_rc_override_passes_channels_to_ardupilot() {
    let registry = Registry::with_config(fast_config());
    let (vehicle, rx) = test_vehicle(true, 2);
    registry.register_vehicle("conn1", vehicle);

    registry
        .rc_override(
            None,
            &[
                json!(1500),
                json!("bad"),
                serde_json::Value::Null,
                json!(0),
                json!(1200),
                json!(3000),
                json!(-50),
            ],
        )
        .unwrap();

    let kinds = drain_commands(&rx);
    assert!(matches!(
        kinds[0],
        CommandKind::RcOverride {
            channels: [1500, 0, 0, 0, 1200, 2000, 1000, 0]
        }
    ));
}

#[test]
fn registry_adapts_commands_to_vehicle_profile() {
    let registry = Registry::with_config(fast_config());
    let (rover, rover_rx) = test_vehicle(true, 10);
    registry.register_vehicle("conn1", rover);

    // Rovers cannot take off, and "land" becomes HOLD (mode 4).
    assert!(registry.takeoff(None, None).is_err());
    registry.land(None).unwrap();
    assert!(matches!(
        drain_commands(&rover_rx)[0],
        CommandKind::SetMode { custom_mode: 4 }
    ));
}

#[test]
fn registry_takeoff_uses_profile_default_altitude() {
    let registry = Registry::with_config(fast_config());
    let (copter, rx) = test_vehicle(true, 2);
    registry.register_vehicle("conn1", copter);

    registry.takeoff(None, None).unwrap();
    assert!(matches!(
        drain_commands(&rx)[0],
        CommandKind::Takeoff { alt } if alt == 10.0
    ));
}

#[test]
fn registry_unknown_calibration_kind_is_noop() {
    let registry = Registry::with_config(fast_config());
    let (vehicle, rx) = test_vehicle(true, 2);
    registry.register_vehicle("conn1", vehicle);

    registry.calibrate(None, "frobnicate").unwrap();
    assert!(rx.try_recv().is_err());

    registry.calibrate(None, "accel").unwrap();
    assert!(matches!(
        drain_commands(&rx)[0],
        CommandKind::PreflightCalibration {
            params: [0.0, 0.0, 0.0, 0.0, 1.0, 0.0]
        }
    ));
}

#[test]
fn registry_telemetry_includes_envelope_enrichment() {
    let registry = Registry::with_config(fast_config());
    let (vehicle, _rx) = test_vehicle(true, 2);
    vehicle.append_statustext(6, "hello".to_string(), now_unix());
    registry.register_vehicle("conn1", vehicle.clone());

    let all = registry.get_all_telemetry();
    let frame = all.get("1").expect("vehicle frame");
    assert_eq!(frame["vehicle_id"], json!("1"));
    assert_eq!(frame["mission_status"], json!("idle"));
    assert!(frame.get("color").is_some());
    assert_eq!(frame["statustext"][0]["text"], json!("hello"));

    // Drained on read: second call carries no statustext.
    let again = registry.get_all_telemetry();
    assert!(again.get("1").unwrap().get("statustext").is_none());
}

#[test]
fn registry_unknown_mode_is_rejected_at_entry() {
    let registry = Registry::with_config(fast_config());
    let (vehicle, rx) = test_vehicle(true, 2);
    registry.register_vehicle("conn1", vehicle);

    assert!(matches!(
        registry.set_mode(None, "WARP_SPEED"),
        Err(crate::error::LinkError::ModeNotAvailable(_))
    ));
    assert!(rx.try_recv().is_err());

    registry.set_mode(None, "guided").unwrap();
    assert!(matches!(
        drain_commands(&rx)[0],
        CommandKind::SetMode { custom_mode: 4 }
    ));
}
