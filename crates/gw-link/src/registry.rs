//! Multi-link, multi-vehicle registry and the control façade.
//!
//! Owns every link and every vehicle, hands out stable vehicle ids that
//! survive sysid collisions across links, tracks the active vehicle for
//! single-vehicle clients, and exposes the command surface the HTTP
//! layer mirrors 1:1.

use crate::command::CommandKind;
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::inspector::{ComponentEntry, MessageStat};
use crate::link::Link;
use crate::mission::MissionManager;
use crate::vehicle::{now_unix, CameraInfo, GimbalInfo, Vehicle};
use gw_core::modes;
use gw_core::params::{critical_param_category, ParamValue, DEFAULT_PARAM_TYPE};
use gw_core::rc::{manual_control_from_channels, validate_rc_channels};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub connection_string: String,
    pub connected: bool,
    pub vehicle_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleInfo {
    pub vehicle_id: String,
    pub target_system: u8,
    pub platform_type: String,
    pub autopilot: String,
    pub armed: bool,
    pub mode: String,
    pub color: String,
    pub active: bool,
}

/// Outcome of a parameter write attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SetParamOutcome {
    Sent,
    /// The name hit a critical prefix and the caller did not confirm.
    ConfirmRequired { category: &'static str },
}

struct VehicleEntry {
    vehicle: Arc<Vehicle>,
    mission: Arc<MissionManager>,
    conn_id: String,
}

#[derive(Default)]
struct RegistryInner {
    links: HashMap<String, Link>,
    vehicles: HashMap<String, VehicleEntry>,
    active: Option<String>,
    conn_counter: u64,
}

pub struct Registry {
    inner: Mutex<RegistryInner>,
    config: LinkConfig,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Self::with_config(LinkConfig::default())
    }

    pub fn with_config(config: LinkConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RegistryInner::default()),
            config,
        })
    }

    // --- Connections ---

    /// Open a link, run its handshake, and register every vehicle it
    /// discovered. Returns the connection id and the vehicle ids.
    pub fn add_connection(
        self: &Arc<Self>,
        spec: &str,
    ) -> Result<(String, Vec<String>), LinkError> {
        let conn_id = {
            let mut inner = self.inner.lock().expect("registry lock");
            inner.conn_counter += 1;
            format!("conn{}", inner.conn_counter)
        };

        let hook_registry = Arc::downgrade(self);
        let hook_conn_id = conn_id.clone();
        let hook: crate::router::DiscoveryHook = Arc::new(move |vehicle: &Arc<Vehicle>| {
            if let Some(registry) = hook_registry.upgrade() {
                registry.register_vehicle(&hook_conn_id, vehicle.clone());
            }
        });

        let link = Link::open(spec, self.config.clone(), hook)?;

        let mut inner = self.inner.lock().expect("registry lock");
        inner.links.insert(conn_id.clone(), link);
        let vehicle_ids: Vec<String> = inner
            .vehicles
            .iter()
            .filter(|(_, entry)| entry.conn_id == conn_id)
            .map(|(id, _)| id.clone())
            .collect();
        info!(%conn_id, ?vehicle_ids, "connection added");
        Ok((conn_id, vehicle_ids))
    }

    /// Close a link and evict its vehicles. Unknown ids are an error so
    /// double-removal reports failure without touching anything.
    pub fn remove_connection(&self, conn_id: &str) -> Result<(), LinkError> {
        let mut link = {
            let mut inner = self.inner.lock().expect("registry lock");
            let link = inner
                .links
                .remove(conn_id)
                .ok_or_else(|| LinkError::ConnectionNotFound(conn_id.to_string()))?;

            let evicted: Vec<String> = inner
                .vehicles
                .iter()
                .filter(|(_, entry)| entry.conn_id == conn_id)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &evicted {
                inner.vehicles.remove(id);
            }
            if inner
                .active
                .as_ref()
                .is_some_and(|active| evicted.contains(active))
            {
                inner.active = inner.vehicles.keys().next().cloned();
            }
            link
        };
        // Join the worker outside the registry lock; the worker's
        // discovery hook takes that lock.
        link.close();
        debug!(conn_id, "connection removed");
        Ok(())
    }

    pub fn list_connections(&self) -> Vec<ConnectionInfo> {
        let inner = self.inner.lock().expect("registry lock");
        let mut result: Vec<ConnectionInfo> = inner
            .links
            .iter()
            .map(|(conn_id, link)| ConnectionInfo {
                id: conn_id.clone(),
                connection_string: link.connection_string.clone(),
                connected: true,
                vehicle_ids: inner
                    .vehicles
                    .iter()
                    .filter(|(_, entry)| &entry.conn_id == conn_id)
                    .map(|(id, _)| id.clone())
                    .collect(),
            })
            .collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        result
    }

    /// Register a vehicle under a registry-scoped id. First vehicle for
    /// a sysid keeps the plain sysid string; a collision from another
    /// link renames BOTH vehicles to `<conn_id>s<sysid>`.
    pub(crate) fn register_vehicle(&self, conn_id: &str, vehicle: Arc<Vehicle>) {
        let mut inner = self.inner.lock().expect("registry lock");
        let sysid_str = vehicle.target_system.to_string();

        let collision = inner.vehicles.iter().find_map(|(id, entry)| {
            (entry.vehicle.target_system == vehicle.target_system && entry.conn_id != conn_id)
                .then(|| id.clone())
        });

        let vehicle_id = if let Some(existing_id) = collision {
            if existing_id == sysid_str {
                let entry = inner.vehicles.remove(&existing_id).expect("existing entry");
                let renamed = format!("{}s{}", entry.conn_id, sysid_str);
                entry.vehicle.set_vehicle_id(renamed.clone());
                if inner.active.as_deref() == Some(existing_id.as_str()) {
                    inner.active = Some(renamed.clone());
                }
                inner.vehicles.insert(renamed, entry);
            }
            format!("{conn_id}s{sysid_str}")
        } else {
            sysid_str
        };

        vehicle.set_vehicle_id(vehicle_id.clone());
        let mission = Arc::new(MissionManager::new(vehicle.clone(), self.config.clone()));
        inner.vehicles.insert(
            vehicle_id.clone(),
            VehicleEntry {
                vehicle,
                mission,
                conn_id: conn_id.to_string(),
            },
        );
        if inner.active.is_none() {
            inner.active = Some(vehicle_id.clone());
        }
        info!(%vehicle_id, conn_id, "vehicle registered");
    }

    // --- Vehicles ---

    pub fn set_active_vehicle(&self, vehicle_id: &str) -> Result<(), LinkError> {
        let mut inner = self.inner.lock().expect("registry lock");
        if !inner.vehicles.contains_key(vehicle_id) {
            return Err(LinkError::VehicleNotFound(vehicle_id.to_string()));
        }
        inner.active = Some(vehicle_id.to_string());
        Ok(())
    }

    pub fn active_vehicle_id(&self) -> Option<String> {
        self.inner.lock().expect("registry lock").active.clone()
    }

    fn resolve(&self, vehicle_id: Option<&str>) -> Result<(Arc<Vehicle>, Arc<MissionManager>), LinkError> {
        let inner = self.inner.lock().expect("registry lock");
        let id = match vehicle_id {
            Some(id) => id.to_string(),
            None => inner.active.clone().ok_or(LinkError::NoActiveVehicle)?,
        };
        let entry = inner
            .vehicles
            .get(&id)
            .ok_or_else(|| LinkError::VehicleNotFound(id.clone()))?;
        Ok((entry.vehicle.clone(), entry.mission.clone()))
    }

    pub fn vehicle(&self, vehicle_id: Option<&str>) -> Result<Arc<Vehicle>, LinkError> {
        self.resolve(vehicle_id).map(|(vehicle, _)| vehicle)
    }

    /// Blocking mission/fence operations run through this handle, on a
    /// caller thread, never on a link worker.
    pub fn mission(&self, vehicle_id: Option<&str>) -> Result<Arc<MissionManager>, LinkError> {
        self.resolve(vehicle_id).map(|(_, mission)| mission)
    }

    pub fn list_vehicles(&self) -> Vec<VehicleInfo> {
        let inner = self.inner.lock().expect("registry lock");
        let mut result: Vec<VehicleInfo> = inner
            .vehicles
            .iter()
            .map(|(id, entry)| {
                let snapshot = entry.vehicle.snapshot();
                VehicleInfo {
                    vehicle_id: id.clone(),
                    target_system: entry.vehicle.target_system,
                    platform_type: snapshot.platform_type,
                    autopilot: snapshot.autopilot,
                    armed: snapshot.armed,
                    mode: snapshot.mode,
                    color: entry.vehicle.color.to_string(),
                    active: inner.active.as_deref() == Some(id.as_str()),
                }
            })
            .collect();
        result.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        result
    }

    /// Telemetry for every vehicle, enriched with color, mission status
    /// and any pending status texts (drained).
    pub fn get_all_telemetry(&self) -> HashMap<String, Value> {
        let entries: Vec<(String, Arc<Vehicle>, Arc<MissionManager>)> = {
            let inner = self.inner.lock().expect("registry lock");
            inner
                .vehicles
                .iter()
                .map(|(id, entry)| (id.clone(), entry.vehicle.clone(), entry.mission.clone()))
                .collect()
        };

        let now = now_unix();
        let mut result = HashMap::new();
        for (id, vehicle, mission) in entries {
            let mut frame = vehicle.snapshot().to_frame(now);
            frame.insert("vehicle_id".into(), json!(id));
            frame.insert("color".into(), json!(vehicle.color));
            frame.insert(
                "mission_status".into(),
                json!(mission.status().as_str()),
            );
            let texts = vehicle.drain_statustext();
            if !texts.is_empty() {
                frame.insert("statustext".into(), json!(texts));
            }
            result.insert(id, Value::Object(frame));
        }
        result
    }

    /// Entries the broadcaster iterates each tick.
    pub(crate) fn broadcast_entries(&self) -> Vec<(String, Arc<Vehicle>, Arc<MissionManager>)> {
        let inner = self.inner.lock().expect("registry lock");
        inner
            .vehicles
            .iter()
            .map(|(id, entry)| (id.clone(), entry.vehicle.clone(), entry.mission.clone()))
            .collect()
    }

    // --- Per-vehicle commands ---

    pub fn arm(&self, vehicle_id: Option<&str>) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        vehicle.enqueue(CommandKind::Arm);
        Ok(())
    }

    pub fn disarm(&self, vehicle_id: Option<&str>) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        vehicle.enqueue(CommandKind::Disarm);
        Ok(())
    }

    pub fn takeoff(&self, vehicle_id: Option<&str>, alt: Option<f32>) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        let profile = vehicle.profile();
        if !profile.supports_takeoff {
            return Err(LinkError::CommandNotSupported("takeoff".to_string()));
        }
        let alt = alt.or(profile.default_alt).unwrap_or(10.0);
        vehicle.enqueue(CommandKind::Takeoff { alt });
        Ok(())
    }

    /// Landing is profile-adapted: air vehicles land, ground and
    /// surface vehicles switch to HOLD, subs have no equivalent.
    pub fn land(&self, vehicle_id: Option<&str>) -> Result<(), LinkError> {
        use gw_core::profiles::ProfileCategory;
        let (vehicle, _) = self.resolve(vehicle_id)?;
        match vehicle.profile().category {
            ProfileCategory::Air => {
                if vehicle.ardupilot {
                    self.enqueue_mode(&vehicle, "LAND")
                } else {
                    vehicle.enqueue(CommandKind::Land);
                    Ok(())
                }
            }
            ProfileCategory::Ground | ProfileCategory::Surface => {
                self.enqueue_mode(&vehicle, "HOLD")
            }
            ProfileCategory::Underwater => {
                Err(LinkError::CommandNotSupported("land".to_string()))
            }
        }
    }

    pub fn rtl(&self, vehicle_id: Option<&str>) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        if !vehicle.profile().supports_command("rtl") {
            return Err(LinkError::CommandNotSupported("rtl".to_string()));
        }
        self.enqueue_mode(&vehicle, "RTL")
    }

    pub fn set_mode(&self, vehicle_id: Option<&str>, mode: &str) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        self.enqueue_mode(&vehicle, mode)
    }

    fn enqueue_mode(&self, vehicle: &Arc<Vehicle>, mode: &str) -> Result<(), LinkError> {
        let custom_mode = modes::custom_mode_for(vehicle.ardupilot, vehicle.mav_type, mode)
            .ok_or_else(|| LinkError::ModeNotAvailable(mode.to_string()))?;
        vehicle.enqueue(CommandKind::SetMode { custom_mode });
        Ok(())
    }

    pub fn set_standard_mode(
        &self,
        vehicle_id: Option<&str>,
        standard_mode: u8,
    ) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        vehicle.enqueue(CommandKind::SetStandardMode { standard_mode });
        Ok(())
    }

    pub fn available_modes(&self, vehicle_id: Option<&str>) -> Result<Vec<String>, LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        if vehicle.ardupilot {
            Ok(modes::available_ardupilot_modes(vehicle.mav_type)
                .into_iter()
                .map(|(_, name)| name.to_string())
                .collect())
        } else {
            Ok(vec![
                "MANUAL".into(),
                "ALTCTL".into(),
                "POSCTL".into(),
                "AUTO_LOITER".into(),
                "AUTO_MISSION".into(),
                "AUTO_RTL".into(),
                "OFFBOARD".into(),
                "STABILIZED".into(),
            ])
        }
    }

    pub fn goto(
        &self,
        vehicle_id: Option<&str>,
        lat: f64,
        lon: f64,
        alt: f32,
    ) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        if !vehicle.profile().supports_command("goto") {
            return Err(LinkError::CommandNotSupported("goto".to_string()));
        }
        vehicle.enqueue(CommandKind::Goto { lat, lon, alt });
        Ok(())
    }

    pub fn set_home(
        &self,
        vehicle_id: Option<&str>,
        use_current: bool,
        lat: f64,
        lon: f64,
        alt: f32,
    ) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        vehicle.enqueue(CommandKind::SetHome {
            use_current,
            lat,
            lon,
            alt,
        });
        Ok(())
    }

    pub fn set_roi(
        &self,
        vehicle_id: Option<&str>,
        lat: f64,
        lon: f64,
        alt: f32,
    ) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        vehicle.enqueue(CommandKind::SetRoi { lat, lon, alt });
        Ok(())
    }

    /// Unknown calibration kinds are a deliberate no-op.
    pub fn calibrate(&self, vehicle_id: Option<&str>, kind: &str) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        let params: [f32; 6] = match kind {
            "gyro" => [1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            "compass" => [0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            "pressure" => [0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            "accel" => [0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            "level" => [0.0, 0.0, 0.0, 0.0, 2.0, 0.0],
            "next_step" => [0.0, 0.0, 0.0, 0.0, 4.0, 0.0],
            "cancel" => [0.0; 6],
            _ => return Ok(()),
        };
        vehicle.enqueue(CommandKind::PreflightCalibration { params });
        Ok(())
    }

    pub fn motor_test(
        &self,
        vehicle_id: Option<&str>,
        motor: u8,
        throttle_pct: f32,
        duration_s: f32,
        all_motors: bool,
    ) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        vehicle.enqueue(CommandKind::MotorTest {
            motor,
            throttle_pct,
            duration_s,
            all_motors,
        });
        Ok(())
    }

    pub fn servo_set(
        &self,
        vehicle_id: Option<&str>,
        servo: u8,
        pwm: u16,
    ) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        vehicle.enqueue(CommandKind::ServoSet { servo, pwm });
        Ok(())
    }

    pub fn gimbal_pitch_yaw(
        &self,
        vehicle_id: Option<&str>,
        pitch_deg: f32,
        yaw_deg: f32,
        pitch_rate: f32,
        yaw_rate: f32,
    ) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        vehicle.enqueue(CommandKind::GimbalPitchYaw {
            pitch_deg,
            yaw_deg,
            pitch_rate,
            yaw_rate,
        });
        Ok(())
    }

    pub fn request_camera_info(&self, vehicle_id: Option<&str>) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        vehicle.enqueue(CommandKind::RequestCameraInfo);
        Ok(())
    }

    pub fn cameras(&self, vehicle_id: Option<&str>) -> Result<Vec<CameraInfo>, LinkError> {
        self.resolve(vehicle_id).map(|(v, _)| v.cameras())
    }

    pub fn gimbals(&self, vehicle_id: Option<&str>) -> Result<Vec<GimbalInfo>, LinkError> {
        self.resolve(vehicle_id).map(|(v, _)| v.gimbals())
    }

    /// Validate and forward RC override channels. ArduPilot takes them
    /// verbatim; PX4 gets the MANUAL_CONTROL translation.
    pub fn rc_override(
        &self,
        vehicle_id: Option<&str>,
        channels: &[Value],
    ) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        let validated = validate_rc_channels(channels);
        if vehicle.ardupilot {
            vehicle.enqueue(CommandKind::RcOverride {
                channels: validated,
            });
        } else {
            vehicle.enqueue(CommandKind::ManualControl {
                setpoint: manual_control_from_channels(&validated),
            });
        }
        Ok(())
    }

    // --- Parameters ---

    pub fn params(
        &self,
        vehicle_id: Option<&str>,
    ) -> Result<(HashMap<String, ParamValue>, u16), LinkError> {
        self.resolve(vehicle_id).map(|(v, _)| v.params_snapshot())
    }

    pub fn refresh_params(&self, vehicle_id: Option<&str>) -> Result<(), LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        vehicle.enqueue(CommandKind::RequestParamList);
        Ok(())
    }

    /// Critical prefixes require `confirm`; everything else goes out
    /// immediately as REAL32 unless a type is given.
    pub fn set_param(
        &self,
        vehicle_id: Option<&str>,
        name: &str,
        value: f32,
        param_type: Option<u8>,
        confirm: bool,
    ) -> Result<SetParamOutcome, LinkError> {
        let (vehicle, _) = self.resolve(vehicle_id)?;
        if !confirm {
            if let Some(category) = critical_param_category(name) {
                return Ok(SetParamOutcome::ConfirmRequired { category });
            }
        }
        vehicle.enqueue(CommandKind::SetParam {
            name: name.to_string(),
            value,
            param_type: param_type.unwrap_or(DEFAULT_PARAM_TYPE),
        });
        Ok(SetParamOutcome::Sent)
    }

    // --- Inspector ---

    pub fn message_stats(&self) -> Vec<MessageStat> {
        let now = now_unix();
        let inner = self.inner.lock().expect("registry lock");
        let mut result: Vec<MessageStat> = inner
            .links
            .values()
            .flat_map(|link| link.inspector.stats(now))
            .collect();
        result.sort_by(|a, b| a.msg_type.cmp(&b.msg_type));
        result
    }

    pub fn clear_message_stats(&self) {
        let inner = self.inner.lock().expect("registry lock");
        for link in inner.links.values() {
            link.inspector.clear();
        }
    }

    pub fn components(&self) -> Vec<ComponentEntry> {
        let now = now_unix();
        let inner = self.inner.lock().expect("registry lock");
        inner
            .links
            .values()
            .flat_map(|link| link.inspector.components(now))
            .collect()
    }

    /// Close every link. Used on shutdown.
    pub fn disconnect_all(&self) {
        let conn_ids: Vec<String> = {
            let inner = self.inner.lock().expect("registry lock");
            inner.links.keys().cloned().collect()
        };
        for conn_id in conn_ids {
            let _ = self.remove_connection(&conn_id);
        }
    }
}
