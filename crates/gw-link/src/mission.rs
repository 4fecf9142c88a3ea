//! Mission and fence transfer engine.
//!
//! Blocking, one operation at a time per vehicle. The engine never
//! touches the wire: outbound frames go through the command queue (the
//! link worker is the single wire owner) and inbound protocol frames
//! arrive on the vehicle's inbox, fed by the router. Callers must run
//! on a thread other than the link worker.

use crate::command::{
    CommandKind, ItemFrame, MissionItemOut, CMD_FENCE_CIRCLE, CMD_FENCE_POLYGON_VERTEX,
};
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::vehicle::Vehicle;
use gw_core::mission::{
    degrees_to_wire, first_error, validate_waypoints, wire_to_degrees, MissionStatus, Waypoint,
    WaypointKind,
};
use gw_core::modes;
use mavlink::common::{self, MavMessage};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One downloaded fence item, as handed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FenceItemRecord {
    pub command: u16,
    pub lat: f64,
    pub lon: f64,
    pub alt: f32,
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
    pub param4: f32,
}

pub struct MissionManager {
    vehicle: Arc<Vehicle>,
    status: Mutex<MissionStatus>,
    /// Serializes transfer operations; the microprotocol is strictly
    /// one caller at a time per vehicle.
    op_guard: Mutex<()>,
    config: LinkConfig,
}

impl MissionManager {
    pub(crate) fn new(vehicle: Arc<Vehicle>, config: LinkConfig) -> Self {
        Self {
            vehicle,
            status: Mutex::new(MissionStatus::Idle),
            op_guard: Mutex::new(()),
            config,
        }
    }

    pub fn status(&self) -> MissionStatus {
        *self.status.lock().expect("status lock")
    }

    fn set_status(&self, status: MissionStatus) {
        *self.status.lock().expect("status lock") = status;
    }

    // --- Upload ---

    /// Upload a mission. Count is N+1: seq 0 is the synthetic home slot
    /// at the first waypoint's position.
    pub fn upload(&self, waypoints: &[Waypoint]) -> Result<(), LinkError> {
        let _op = self.op_guard.lock().expect("op guard");
        if waypoints.is_empty() {
            return Err(LinkError::InvalidArgument(
                "mission upload needs at least one waypoint".to_string(),
            ));
        }
        let issues = validate_waypoints(waypoints);
        if let Some(problem) = first_error(&issues) {
            return Err(LinkError::MissionValidation(format!(
                "{}: {}",
                problem.code, problem.message
            )));
        }

        self.set_status(MissionStatus::Uploading);
        self.vehicle.drain_mission_inbox();

        let total = waypoints.len() as u16 + 1;
        self.vehicle.enqueue(CommandKind::MissionCount {
            count: total,
            fence: false,
        });

        let deadline = Instant::now() + self.config.mission_timeout;
        while Instant::now() < deadline {
            let Some(msg) = self.vehicle.recv_mission_msg(self.config.request_timeout) else {
                self.set_status(MissionStatus::UploadFailed);
                return Err(LinkError::transfer(
                    "transfer.timeout",
                    "no mission request before deadline",
                ));
            };

            let seq = match msg {
                MavMessage::MISSION_ACK(ack) if is_mission(ack.mission_type) => {
                    if ack.mavtype == common::MavMissionResult::MAV_MISSION_ACCEPTED {
                        self.set_status(MissionStatus::Uploaded);
                        return Ok(());
                    }
                    self.set_status(MissionStatus::UploadFailed);
                    return Err(LinkError::transfer(
                        "transfer.ack_error",
                        format!("MISSION_ACK error: {:?}", ack.mavtype),
                    ));
                }
                MavMessage::MISSION_REQUEST_INT(req) if is_mission(req.mission_type) => req.seq,
                MavMessage::MISSION_REQUEST(req) if is_mission(req.mission_type) => req.seq,
                _ => continue,
            };

            if seq >= total {
                warn!(seq, total, "mission request out of range");
                self.set_status(MissionStatus::UploadFailed);
                return Err(LinkError::transfer(
                    "transfer.bad_request",
                    format!("requested item {seq} of {total}"),
                ));
            }
            self.send_mission_item(seq, waypoints);
        }

        self.set_status(MissionStatus::UploadFailed);
        Err(LinkError::transfer(
            "transfer.timeout",
            "mission upload deadline exceeded",
        ))
    }

    fn send_mission_item(&self, seq: u16, waypoints: &[Waypoint]) {
        let item = if seq == 0 {
            // Home slot: first waypoint's position at ground level.
            MissionItemOut {
                seq: 0,
                frame: ItemFrame::GlobalInt,
                command: WaypointKind::Waypoint.command(),
                autocontinue: 1,
                param1: 0.0,
                param2: 0.0,
                param3: 0.0,
                param4: 0.0,
                x: degrees_to_wire(waypoints[0].lat),
                y: degrees_to_wire(waypoints[0].lon),
                z: 0.0,
                fence: false,
            }
        } else {
            let wp = &waypoints[seq as usize - 1];
            MissionItemOut {
                seq,
                frame: ItemFrame::GlobalRelativeAltInt,
                command: wp.kind.command(),
                autocontinue: 1,
                param1: wp.param1,
                param2: wp.param2,
                param3: wp.param3,
                param4: wp.param4,
                x: degrees_to_wire(wp.lat),
                y: degrees_to_wire(wp.lon),
                z: wp.alt,
                fence: false,
            }
        };
        self.vehicle.enqueue(CommandKind::MissionItemInt(item));
    }

    // --- Download ---

    /// Download the mission, skipping the home slot. Empty result when
    /// the vehicle has nothing beyond home, or on any item timeout.
    pub fn download(&self) -> Result<Vec<Waypoint>, LinkError> {
        let _op = self.op_guard.lock().expect("op guard");
        self.vehicle.drain_mission_inbox();
        self.vehicle
            .enqueue(CommandKind::MissionRequestList { fence: false });

        let Some(count) = self.await_count(false) else {
            return Ok(Vec::new());
        };
        if count <= 1 {
            return Ok(Vec::new());
        }

        let mut items = Vec::with_capacity(count as usize - 1);
        for seq in 1..count {
            self.vehicle
                .enqueue(CommandKind::MissionRequestInt { seq, fence: false });

            let Some(data) = self.await_item(seq, false) else {
                debug!(seq, "mission download timed out");
                return Ok(Vec::new());
            };
            items.push(Waypoint {
                lat: wire_to_degrees(data.x),
                lon: wire_to_degrees(data.y),
                alt: data.z,
                seq: (seq - 1),
                kind: WaypointKind::from_command(data.command as u16),
                param1: data.param1,
                param2: data.param2,
                param3: data.param3,
                param4: data.param4,
            });
        }

        self.vehicle.enqueue(CommandKind::MissionAck { fence: false });
        Ok(items)
    }

    fn await_count(&self, fence: bool) -> Option<u16> {
        let deadline = Instant::now() + self.config.request_timeout;
        while Instant::now() < deadline {
            let msg = self.vehicle.recv_mission_msg(self.config.request_timeout)?;
            if let MavMessage::MISSION_COUNT(data) = msg {
                if is_type(data.mission_type, fence) {
                    return Some(data.count);
                }
            }
        }
        None
    }

    fn await_item(&self, seq: u16, fence: bool) -> Option<common::MISSION_ITEM_INT_DATA> {
        let deadline = Instant::now() + self.config.request_timeout;
        while Instant::now() < deadline {
            let msg = self.vehicle.recv_mission_msg(self.config.request_timeout)?;
            if let MavMessage::MISSION_ITEM_INT(data) = msg {
                if data.seq == seq && is_type(data.mission_type, fence) {
                    return Some(data);
                }
            }
        }
        None
    }

    // --- Fence ---

    /// Upload a single circular inclusion fence and enable it.
    pub fn upload_fence_circle(&self, lat: f64, lon: f64, radius: f32) -> Result<(), LinkError> {
        let item = MissionItemOut {
            seq: 0,
            frame: ItemFrame::GlobalInt,
            command: CMD_FENCE_CIRCLE,
            autocontinue: 0,
            param1: radius,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            x: degrees_to_wire(lat),
            y: degrees_to_wire(lon),
            z: 0.0,
            fence: true,
        };
        self.upload_fence_items(vec![item])
    }

    /// Upload a polygon inclusion fence (three or more vertices) and
    /// enable it.
    pub fn upload_fence_polygon(
        &self,
        vertices: &[gw_core::mission::FencePoint],
    ) -> Result<(), LinkError> {
        if vertices.len() < 3 {
            return Err(LinkError::InvalidArgument(
                "polygon fence needs at least 3 vertices".to_string(),
            ));
        }
        let count = vertices.len() as u16;
        let items = vertices
            .iter()
            .enumerate()
            .map(|(seq, vertex)| MissionItemOut {
                seq: seq as u16,
                frame: ItemFrame::GlobalInt,
                command: CMD_FENCE_POLYGON_VERTEX,
                autocontinue: 0,
                param1: count as f32,
                param2: 0.0,
                param3: 0.0,
                param4: 0.0,
                x: degrees_to_wire(vertex.lat),
                y: degrees_to_wire(vertex.lon),
                z: 0.0,
                fence: true,
            })
            .collect();
        self.upload_fence_items(items)
    }

    fn upload_fence_items(&self, items: Vec<MissionItemOut>) -> Result<(), LinkError> {
        let _op = self.op_guard.lock().expect("op guard");
        self.vehicle.drain_mission_inbox();

        let count = items.len() as u16;
        self.vehicle.enqueue(CommandKind::MissionCount {
            count,
            fence: true,
        });

        let deadline = Instant::now() + self.config.fence_timeout;
        while Instant::now() < deadline {
            let Some(msg) = self.vehicle.recv_mission_msg(self.config.request_timeout) else {
                return Err(LinkError::transfer(
                    "transfer.timeout",
                    "no fence request before deadline",
                ));
            };

            let seq = match msg {
                MavMessage::MISSION_ACK(ack) if is_fence(ack.mission_type) => {
                    if ack.mavtype == common::MavMissionResult::MAV_MISSION_ACCEPTED {
                        self.vehicle.enqueue(CommandKind::FenceEnable { enable: true });
                        return Ok(());
                    }
                    return Err(LinkError::transfer(
                        "transfer.ack_error",
                        format!("fence MISSION_ACK error: {:?}", ack.mavtype),
                    ));
                }
                MavMessage::MISSION_REQUEST_INT(req) if is_fence(req.mission_type) => req.seq,
                MavMessage::MISSION_REQUEST(req) if is_fence(req.mission_type) => req.seq,
                _ => continue,
            };

            if let Some(item) = items.get(seq as usize) {
                self.vehicle
                    .enqueue(CommandKind::MissionItemInt(item.clone()));
            } else {
                return Err(LinkError::transfer(
                    "transfer.bad_request",
                    format!("fence request for item {seq} of {count}"),
                ));
            }
        }

        Err(LinkError::transfer(
            "transfer.timeout",
            "fence upload deadline exceeded",
        ))
    }

    /// Download fence items (all sequence numbers; fences have no home
    /// slot).
    pub fn download_fence(&self) -> Result<Vec<FenceItemRecord>, LinkError> {
        let _op = self.op_guard.lock().expect("op guard");
        self.vehicle.drain_mission_inbox();
        self.vehicle
            .enqueue(CommandKind::MissionRequestList { fence: true });

        let Some(count) = self.await_count(true) else {
            return Ok(Vec::new());
        };

        let mut items = Vec::with_capacity(count as usize);
        for seq in 0..count {
            self.vehicle
                .enqueue(CommandKind::MissionRequestInt { seq, fence: true });
            let Some(data) = self.await_item(seq, true) else {
                return Ok(Vec::new());
            };
            items.push(FenceItemRecord {
                command: data.command as u16,
                lat: wire_to_degrees(data.x),
                lon: wire_to_degrees(data.y),
                alt: data.z,
                param1: data.param1,
                param2: data.param2,
                param3: data.param3,
                param4: data.param4,
            });
        }

        self.vehicle.enqueue(CommandKind::MissionAck { fence: true });
        Ok(items)
    }

    // --- Clear ---

    /// Fire-and-forget mission wipe.
    pub fn clear(&self) {
        self.vehicle
            .enqueue(CommandKind::MissionClearAll { fence: false });
        self.set_status(MissionStatus::Idle);
    }

    /// Disable, settle, then wipe the fence list.
    pub fn clear_fence(&self) {
        self.vehicle.enqueue(CommandKind::FenceEnable { enable: false });
        thread::sleep(Duration::from_millis(100));
        self.vehicle
            .enqueue(CommandKind::MissionClearAll { fence: true });
    }

    // --- Execution control ---

    /// Jump to the first mission item and switch into autonomous mode.
    pub fn start(&self) -> Result<(), LinkError> {
        self.vehicle.enqueue(CommandKind::MissionSetCurrent { seq: 1 });
        thread::sleep(Duration::from_millis(200));
        self.engage_auto()?;
        self.set_status(MissionStatus::Running);
        Ok(())
    }

    pub fn pause(&self) -> Result<(), LinkError> {
        let mode = if self.vehicle.ardupilot { "LOITER" } else { "HOLD" };
        self.set_mode_by_name(mode)?;
        self.set_status(MissionStatus::Paused);
        Ok(())
    }

    pub fn resume(&self) -> Result<(), LinkError> {
        self.engage_auto()?;
        self.set_status(MissionStatus::Running);
        Ok(())
    }

    /// 0-based client index to wire sequence: ArduPilot missions start
    /// at seq 1 (seq 0 is home); PX4 uses the index as-is.
    pub fn set_current(&self, index: u16) -> Result<(), LinkError> {
        let seq = if self.vehicle.ardupilot { index + 1 } else { index };
        self.vehicle.enqueue(CommandKind::MissionSetCurrent { seq });
        Ok(())
    }

    fn engage_auto(&self) -> Result<(), LinkError> {
        let mode = if self.vehicle.ardupilot { "AUTO" } else { "MISSION" };
        self.set_mode_by_name(mode)
    }

    fn set_mode_by_name(&self, name: &str) -> Result<(), LinkError> {
        let custom_mode = modes::custom_mode_for(self.vehicle.ardupilot, self.vehicle.mav_type, name)
            .ok_or_else(|| LinkError::ModeNotAvailable(name.to_string()))?;
        self.vehicle.enqueue(CommandKind::SetMode { custom_mode });
        Ok(())
    }
}

fn is_mission(mission_type: common::MavMissionType) -> bool {
    mission_type == common::MavMissionType::MAV_MISSION_TYPE_MISSION
}

fn is_fence(mission_type: common::MavMissionType) -> bool {
    mission_type == common::MavMissionType::MAV_MISSION_TYPE_FENCE
}

fn is_type(mission_type: common::MavMissionType, fence: bool) -> bool {
    if fence {
        is_fence(mission_type)
    } else {
        is_mission(mission_type)
    }
}
