//! Telemetry push: one timer thread polls the registry and fans frames
//! out to subscribers.
//!
//! The tick runs at the 10 Hz ceiling; per-vehicle pacing, delta
//! computation and the periodic full sync live in the pure
//! [`EmitGate`]. Subscribers are unbounded channels of JSON text; a
//! subscriber whose receiver is gone is dropped on the next send.

use crate::registry::Registry;
use crate::vehicle::now_unix;
use gw_core::telemetry::{EmitDecision, EmitGate, EmitInput, BROADCAST_TICK};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::debug;

struct Subscriber {
    id: u64,
    tx: Sender<String>,
}

pub struct TelemetryBroadcaster {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_id: AtomicU64,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl TelemetryBroadcaster {
    pub fn start(registry: Arc<Registry>) -> Self {
        let subscribers: Arc<Mutex<Vec<Subscriber>>> = Arc::new(Mutex::new(Vec::new()));
        let stop_flag = Arc::new(AtomicBool::new(false));

        let worker_subscribers = subscribers.clone();
        let worker_stop = stop_flag.clone();
        let worker = thread::spawn(move || {
            run_broadcast(registry, worker_subscribers, worker_stop);
        });

        Self {
            subscribers,
            next_id: AtomicU64::new(1),
            stop_flag,
            worker: Some(worker),
        }
    }

    /// Attach a push channel. The receiver gets JSON text frames.
    pub fn subscribe(&self) -> (u64, Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("subscribers lock")
            .push(Subscriber { id, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers
            .lock()
            .expect("subscribers lock")
            .retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscribers lock").len()
    }

    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for TelemetryBroadcaster {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_broadcast(
    registry: Arc<Registry>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    stop_flag: Arc<AtomicBool>,
) {
    debug!("broadcast worker started");
    let mut gates: HashMap<String, EmitGate> = HashMap::new();

    while !stop_flag.load(Ordering::Relaxed) {
        let tick_started = Instant::now();

        if subscribers.lock().expect("subscribers lock").is_empty() {
            thread::sleep(BROADCAST_TICK);
            continue;
        }

        let entries = registry.broadcast_entries();
        gates.retain(|id, _| entries.iter().any(|(vid, _, _)| vid == id));

        let now_wall = now_unix();
        for (vehicle_id, vehicle, mission) in entries {
            let snapshot = vehicle.snapshot();
            let input = EmitInput {
                generation: vehicle.generation(),
                armed: snapshot.armed,
                groundspeed: snapshot.groundspeed as f64,
                mission_status: mission.status().as_str().to_string(),
                has_statustext: vehicle.pending_statustext() > 0,
                frame: snapshot.to_frame(now_wall),
            };

            let gate = gates.entry(vehicle_id.clone()).or_default();
            let decision = gate.evaluate(input, Instant::now());

            let (mut fields, full) = match decision {
                EmitDecision::Skip => continue,
                EmitDecision::Emit { fields, full } => (fields, full),
            };

            fields.insert("type".into(), json!("telemetry"));
            fields.insert("vehicle_id".into(), json!(vehicle_id));
            fields.insert("drone_name".into(), json!(vehicle.display_name()));
            fields.insert(
                "mission_status".into(),
                json!(mission.status().as_str()),
            );
            if full {
                fields.insert("_full".into(), json!(true));
            }
            let texts = vehicle.drain_statustext();
            if !texts.is_empty() {
                fields.insert("statustext".into(), json!(texts));
            }

            let payload = Value::Object(fields).to_string();
            let mut subs = subscribers.lock().expect("subscribers lock");
            subs.retain(|subscriber| subscriber.tx.send(payload.clone()).is_ok());
        }

        let elapsed = tick_started.elapsed();
        if elapsed < BROADCAST_TICK {
            thread::sleep(BROADCAST_TICK - elapsed);
        }
    }

    debug!("broadcast worker stopped");
}
