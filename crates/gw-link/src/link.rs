//! Link lifecycle: transport open, the autopilot handshake, and the
//! dedicated worker thread that owns the wire.
//!
//! The worker is the only task touching the connection. Its loop
//! interleaves: GCS heartbeat tick, command-queue drain, one receive
//! poll, dispatch. Producers elsewhere only ever see the command queue
//! and vehicle snapshots.

use crate::command::{self, OutboundCommand};
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::endpoint::Endpoint;
use crate::inspector::Inspector;
use crate::router::{DiscoveryHook, Router};
use crate::vehicle::{now_unix, Vehicle};
use mavlink::common::MavMessage;
use mavlink::error::{MessageReadError, ParserError};
use mavlink::MavConnection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, warn};

type Connection = Box<dyn MavConnection<MavMessage> + Sync + Send>;

pub(crate) struct Link {
    pub connection_string: String,
    pub command_tx: Sender<OutboundCommand>,
    pub vehicles: Arc<Mutex<HashMap<u8, Arc<Vehicle>>>>,
    pub inspector: Arc<Inspector>,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Link {
    /// Open a transport and run the handshake: heartbeat at 1 Hz while
    /// consuming frames until a component-1 heartbeat with a recognized
    /// vehicle type creates the first vehicle, or the window expires.
    pub(crate) fn open(
        spec: &str,
        config: LinkConfig,
        discovery_hook: DiscoveryHook,
    ) -> Result<Self, LinkError> {
        let endpoint = Endpoint::parse(spec)?;
        let mut connection = mavlink::connect::<MavMessage>(&endpoint.address())
            .map_err(|err| LinkError::ConnectionFailed(err.to_string()))?;
        connection.set_allow_recv_any_version(true);
        Self::from_connection(Box::new(connection), spec.to_string(), config, discovery_hook)
    }

    /// Drive an already-open connection. Split out so tests can hand in
    /// a scripted connection.
    pub(crate) fn from_connection(
        connection: Connection,
        connection_string: String,
        config: LinkConfig,
        discovery_hook: DiscoveryHook,
    ) -> Result<Self, LinkError> {
        let (command_tx, command_rx) = mpsc::channel();
        let vehicles: Arc<Mutex<HashMap<u8, Arc<Vehicle>>>> = Arc::new(Mutex::new(HashMap::new()));
        let inspector = Arc::new(Inspector::new());
        let router = Router::new(
            vehicles.clone(),
            inspector.clone(),
            command_tx.clone(),
            config.clone(),
            discovery_hook,
        );

        handshake(&*connection, &router, &vehicles, &config)?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let worker_stop = stop_flag.clone();
        let worker_config = config.clone();
        let worker = thread::spawn(move || {
            run_worker(connection, command_rx, router, worker_stop, worker_config);
        });

        Ok(Self {
            connection_string,
            command_tx,
            vehicles,
            inspector,
            stop_flag,
            worker: Some(worker),
        })
    }

    pub(crate) fn vehicles_snapshot(&self) -> Vec<Arc<Vehicle>> {
        self.vehicles
            .lock()
            .expect("vehicles lock")
            .values()
            .cloned()
            .collect()
    }

    /// Idempotent: stops the worker and drops the vehicles.
    pub(crate) fn close(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.vehicles.lock().expect("vehicles lock").clear();
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

fn handshake(
    connection: &(impl MavConnection<MavMessage> + ?Sized),
    router: &Router,
    vehicles: &Arc<Mutex<HashMap<u8, Arc<Vehicle>>>>,
    config: &LinkConfig,
) -> Result<(), LinkError> {
    let deadline = Instant::now() + config.handshake_timeout;
    let mut last_heartbeat: Option<Instant> = None;

    loop {
        if last_heartbeat.map_or(true, |at| at.elapsed() >= config.heartbeat_interval) {
            command::send_message(connection, config, command::heartbeat_message());
            last_heartbeat = Some(Instant::now());
        }

        match connection.try_recv() {
            Ok((header, msg)) => {
                router.handle(&header, &msg, now_unix());
                if !vehicles.lock().expect("vehicles lock").is_empty() {
                    return Ok(());
                }
            }
            Err(err) if is_idle_read_error(&err) => {
                thread::sleep(config.recv_idle_sleep);
            }
            Err(MessageReadError::Parse(err)) => {
                debug!("dropping undecodable frame during handshake: {err}");
            }
            Err(err) => {
                return Err(LinkError::ConnectionFailed(format!(
                    "receive failed during handshake: {err}"
                )));
            }
        }

        if Instant::now() >= deadline {
            return Err(LinkError::HandshakeTimeout);
        }
    }
}

fn run_worker(
    connection: Connection,
    command_rx: Receiver<OutboundCommand>,
    router: Router,
    stop_flag: Arc<AtomicBool>,
    config: LinkConfig,
) {
    debug!("link worker started");
    let mut last_heartbeat = Instant::now();

    while !stop_flag.load(Ordering::Relaxed) {
        if last_heartbeat.elapsed() >= config.heartbeat_interval {
            command::send_message(&*connection, &config, command::heartbeat_message());
            last_heartbeat = Instant::now();
        }

        while let Ok(record) = command_rx.try_recv() {
            command::execute(&*connection, &config, record);
        }

        match connection.try_recv() {
            Ok((header, msg)) => {
                router.handle(&header, &msg, now_unix());
            }
            Err(err) if is_idle_read_error(&err) => {
                thread::sleep(config.recv_idle_sleep);
            }
            Err(MessageReadError::Parse(err)) => {
                if let ParserError::UnknownMessage { id } = err {
                    router.note_unknown_message(id, now_unix());
                }
            }
            Err(err) => {
                // Transport hiccups are survivable on datagram links;
                // the operator tears the link down if it stays dead.
                warn!("receive failed: {err}");
                thread::sleep(config.recv_idle_sleep);
            }
        }
    }

    debug!("link worker stopped");
}

fn is_idle_read_error(error: &MessageReadError) -> bool {
    match error {
        MessageReadError::Io(io_error) => {
            io_error.kind() == std::io::ErrorKind::WouldBlock
                || io_error.kind() == std::io::ErrorKind::TimedOut
        }
        _ => false,
    }
}
