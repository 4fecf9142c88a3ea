//! Inbound message classification.
//!
//! Single consumer per link: the worker hands every decoded frame here.
//! Mission-protocol frames go to the owning vehicle's inbox; telemetry
//! lands in the vehicle snapshot under its lock; everything feeds the
//! inspector.

use crate::command::{self, OutboundCommand};
use crate::config::LinkConfig;
use crate::inspector::Inspector;
use crate::vehicle::{
    autopilot_name, is_vehicle_type, mav_type_name, CameraInfo, GimbalInfo, Vehicle,
};
use gw_core::modes;
use gw_core::params::{decode_param_id, ParamValue};
use mavlink::common::{self, MavMessage};
use mavlink::MavHeader;
use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// MAV_MODE_FLAG_SAFETY_ARMED.
const ARMED_BIT: u8 = 128;
/// MAV_CMD_PREFLIGHT_CALIBRATION, matched on COMMAND_ACK.
const PREFLIGHT_CALIBRATION_CMD: u16 = 241;

/// Invoked whenever a new vehicle appears on the link (handshake or
/// later), so the registry can assign it an id.
pub(crate) type DiscoveryHook = Arc<dyn Fn(&Arc<Vehicle>) + Send + Sync>;

pub(crate) struct Router {
    vehicles: Arc<Mutex<HashMap<u8, Arc<Vehicle>>>>,
    inspector: Arc<Inspector>,
    command_tx: Sender<OutboundCommand>,
    config: LinkConfig,
    discovery_hook: DiscoveryHook,
}

impl Router {
    pub(crate) fn new(
        vehicles: Arc<Mutex<HashMap<u8, Arc<Vehicle>>>>,
        inspector: Arc<Inspector>,
        command_tx: Sender<OutboundCommand>,
        config: LinkConfig,
        discovery_hook: DiscoveryHook,
    ) -> Self {
        Self {
            vehicles,
            inspector,
            command_tx,
            config,
            discovery_hook,
        }
    }

    /// Valid frame, unknown message id: counted, then dropped.
    pub(crate) fn note_unknown_message(&self, msg_id: u32, now: f64) {
        self.inspector.record_unknown(msg_id, now);
    }

    fn vehicle_for(&self, src_system: u8) -> Option<Arc<Vehicle>> {
        self.vehicles
            .lock()
            .expect("vehicles lock")
            .get(&src_system)
            .cloned()
    }

    pub(crate) fn handle(&self, header: &MavHeader, msg: &MavMessage, now: f64) {
        self.inspector
            .record(header.system_id, header.component_id, msg, now);

        match msg {
            // Mission microprotocol frames feed the engine inbox and
            // nothing else.
            MavMessage::MISSION_REQUEST_INT(_)
            | MavMessage::MISSION_REQUEST(_)
            | MavMessage::MISSION_ACK(_)
            | MavMessage::MISSION_COUNT(_)
            | MavMessage::MISSION_ITEM_INT(_) => {
                if let Some(vehicle) = self.vehicle_for(header.system_id) {
                    vehicle.deliver_mission_msg(msg.clone());
                }
            }

            MavMessage::PARAM_VALUE(data) => {
                if let Some(vehicle) = self.vehicle_for(header.system_id) {
                    vehicle.update_param(
                        decode_param_id(&data.param_id),
                        ParamValue {
                            value: data.param_value,
                            param_type: data.param_type as u8,
                            index: data.param_index,
                        },
                        data.param_count,
                    );
                }
            }

            MavMessage::STATUSTEXT(data) => {
                if let Some(vehicle) = self.vehicle_for(header.system_id) {
                    let text = decode_fixed_str(&*data.text);
                    vehicle.push_statustext(data.severity as u8, &text, now);
                }
            }

            MavMessage::COMMAND_ACK(data) => {
                if data.command as u16 == PREFLIGHT_CALIBRATION_CMD {
                    if let Some(vehicle) = self.vehicle_for(header.system_id) {
                        let (text, severity) = calibration_ack_text(data.result);
                        vehicle.append_statustext(severity, text, now);
                    }
                }
            }

            MavMessage::HEARTBEAT(data) => {
                self.handle_heartbeat(header, data, now);
            }

            MavMessage::CAMERA_INFORMATION(data) => {
                if let Some(vehicle) = self.vehicle_for(header.system_id) {
                    vehicle.update_camera(CameraInfo {
                        component_id: header.component_id,
                        vendor: decode_fixed_str(&data.vendor_name),
                        model: decode_fixed_str(&data.model_name),
                        firmware_version: data.firmware_version,
                        focal_length: data.focal_length,
                        sensor_size_h: data.sensor_size_h,
                        sensor_size_v: data.sensor_size_v,
                        resolution_h: data.resolution_h,
                        resolution_v: data.resolution_v,
                        flags: data.flags.bits(),
                    });
                }
            }

            MavMessage::GIMBAL_DEVICE_INFORMATION(data) => {
                if let Some(vehicle) = self.vehicle_for(header.system_id) {
                    vehicle.update_gimbal(GimbalInfo {
                        component_id: header.component_id,
                        vendor: decode_fixed_str(&*data.vendor_name),
                        model: decode_fixed_str(&*data.model_name),
                        firmware_version: data.firmware_version,
                        cap_flags: data.cap_flags.bits(),
                        pitch_min: data.pitch_min,
                        pitch_max: data.pitch_max,
                        yaw_min: data.yaw_min,
                        yaw_max: data.yaw_max,
                    });
                }
            }

            MavMessage::ATTITUDE(data) => {
                if let Some(vehicle) = self.vehicle_for(header.system_id) {
                    vehicle.update_telemetry(|t| {
                        t.roll = data.roll;
                        t.pitch = data.pitch;
                        t.yaw = data.yaw;
                        t.rollspeed = data.rollspeed;
                        t.pitchspeed = data.pitchspeed;
                        t.yawspeed = data.yawspeed;
                    });
                }
            }

            MavMessage::GLOBAL_POSITION_INT(data) => {
                if let Some(vehicle) = self.vehicle_for(header.system_id) {
                    vehicle.update_telemetry(|t| {
                        t.lat = data.lat as f64 / 1e7;
                        t.lon = data.lon as f64 / 1e7;
                        t.alt = data.relative_alt as f64 / 1000.0;
                        t.alt_msl = data.alt as f64 / 1000.0;
                    });
                }
            }

            MavMessage::GPS_RAW_INT(data) => {
                if let Some(vehicle) = self.vehicle_for(header.system_id) {
                    vehicle.update_telemetry(|t| {
                        t.fix_type = data.fix_type as u8;
                        t.satellites = data.satellites_visible;
                        t.hdop = if data.eph == u16::MAX {
                            99.99
                        } else {
                            data.eph as f32 / 100.0
                        };
                    });
                }
            }

            MavMessage::VFR_HUD(data) => {
                if let Some(vehicle) = self.vehicle_for(header.system_id) {
                    vehicle.update_telemetry(|t| {
                        t.airspeed = data.airspeed;
                        t.groundspeed = data.groundspeed;
                        t.heading = data.heading as i32;
                        t.climb = data.climb;
                    });
                }
            }

            MavMessage::SYS_STATUS(data) => {
                if let Some(vehicle) = self.vehicle_for(header.system_id) {
                    vehicle.update_telemetry(|t| {
                        t.voltage = data.voltage_battery as f32 / 1000.0;
                        t.current = if data.current_battery == -1 {
                            0.0
                        } else {
                            data.current_battery as f32 / 100.0
                        };
                        t.remaining = data.battery_remaining;
                    });
                }
            }

            MavMessage::MISSION_CURRENT(data) => {
                if let Some(vehicle) = self.vehicle_for(header.system_id) {
                    vehicle.update_telemetry(|t| {
                        t.mission_seq = data.seq as i32;
                    });
                }
            }

            _ => {
                trace!("uninterpreted message recorded for inspector only");
            }
        }
    }

    fn handle_heartbeat(&self, header: &MavHeader, data: &common::HEARTBEAT_DATA, now: f64) {
        let mav_type = data.mavtype as u8;
        let autopilot_raw = data.autopilot as u8;

        self.inspector.register_component(
            header.system_id,
            header.component_id,
            mav_type,
            autopilot_raw,
            now,
        );

        // GCS peers never become vehicles.
        if data.mavtype == common::MavType::MAV_TYPE_GCS {
            return;
        }
        // Only the primary autopilot drives vehicle state.
        if header.component_id != 1 {
            return;
        }

        let vehicle = match self.vehicle_for(header.system_id) {
            Some(vehicle) => vehicle,
            None if is_vehicle_type(mav_type) => self.discover_vehicle(header, data, mav_type),
            None => return,
        };

        let base_mode = data.base_mode.bits();
        let custom_mode = data.custom_mode;
        let ardupilot = vehicle.ardupilot;
        let system_status = data.system_status as u8;

        vehicle.update_telemetry(|t| {
            t.armed = base_mode & ARMED_BIT != 0;
            t.system_status = system_status;
            t.last_heartbeat = now;
            t.platform_type = mav_type_name(mav_type);
            t.mode = if ardupilot {
                modes::ardupilot_mode_name(mav_type, custom_mode)
            } else {
                modes::px4_mode_name(custom_mode)
            };
        });
    }

    fn discover_vehicle(
        &self,
        header: &MavHeader,
        data: &common::HEARTBEAT_DATA,
        mav_type: u8,
    ) -> Arc<Vehicle> {
        let ardupilot =
            data.autopilot == common::MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA;
        let vehicle = Arc::new(Vehicle::new(
            header.system_id,
            header.component_id,
            ardupilot,
            mav_type,
            self.command_tx.clone(),
            self.config.clone(),
        ));

        self.vehicles
            .lock()
            .expect("vehicles lock")
            .insert(header.system_id, vehicle.clone());
        self.inspector.mark_target(header.system_id, header.component_id);

        debug!(
            sysid = header.system_id,
            platform = %mav_type_name(mav_type),
            autopilot = autopilot_name(data.autopilot as u8),
            "vehicle discovered"
        );

        for kind in command::default_stream_requests(ardupilot) {
            vehicle.enqueue(kind);
        }
        (self.discovery_hook)(&vehicle);
        vehicle
    }
}

/// Fixed-size wire strings are NUL padded.
pub(crate) fn decode_fixed_str(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// COMMAND_ACK(PREFLIGHT_CALIBRATION) results rendered as status text so
/// calibration progress reads like any other vehicle event.
fn calibration_ack_text(result: common::MavResult) -> (String, u8) {
    use common::MavResult::*;
    match result {
        MAV_RESULT_ACCEPTED => ("Calibration accepted".to_string(), 6),
        MAV_RESULT_TEMPORARILY_REJECTED => {
            ("Calibration temporarily rejected - try again".to_string(), 4)
        }
        MAV_RESULT_DENIED => ("Calibration denied".to_string(), 3),
        MAV_RESULT_UNSUPPORTED => ("Calibration unsupported".to_string(), 4),
        MAV_RESULT_FAILED => ("Calibration failed".to_string(), 3),
        MAV_RESULT_IN_PROGRESS => ("Calibration in progress".to_string(), 6),
        MAV_RESULT_CANCELLED => ("Calibration cancelled".to_string(), 4),
        other => (format!("Calibration result: {other:?}"), 4),
    }
}
