#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("no autopilot heartbeat within the handshake window")]
    HandshakeTimeout,
    #[error("connection '{0}' not found")]
    ConnectionNotFound(String),
    #[error("vehicle '{0}' not found")]
    VehicleNotFound(String),
    #[error("no active vehicle")]
    NoActiveVehicle,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("mode '{0}' not available for this vehicle")]
    ModeNotAvailable(String),
    #[error("command '{0}' not supported by this vehicle class")]
    CommandNotSupported(String),
    #[error("mission transfer failed: [{code}] {message}")]
    MissionTransfer { code: String, message: String },
    #[error("mission validation failed: {0}")]
    MissionValidation(String),
    #[error("MAVLink I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    pub(crate) fn transfer(code: &str, message: impl Into<String>) -> Self {
        LinkError::MissionTransfer {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
