use crate::error::LinkError;

const DEFAULT_SERIAL_BAUD: u32 = 57600;

/// Parsed transport specification for a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Listen for UDP datagrams (SITL and telemetry radios push here).
    UdpIn { host: String, port: u16 },
    /// Send to a remote UDP endpoint; handshake heartbeats teach the
    /// remote our return address.
    UdpOut { host: String, port: u16 },
    Tcp { host: String, port: u16 },
    Serial { path: String, baud: u32 },
}

impl Endpoint {
    /// Parse a connection string: `udpin:host:port`, `udpout:host:port`,
    /// `tcp:host:port` or `serial:path[:baud]`.
    pub fn parse(spec: &str) -> Result<Self, LinkError> {
        let mut parts = spec.splitn(2, ':');
        let scheme = parts.next().unwrap_or_default();
        let rest = parts
            .next()
            .ok_or_else(|| LinkError::InvalidArgument(format!("bad connection string '{spec}'")))?;

        match scheme {
            "udpin" | "udpout" | "tcp" => {
                let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
                    LinkError::InvalidArgument(format!("'{spec}' needs host:port"))
                })?;
                let port: u16 = port.parse().map_err(|_| {
                    LinkError::InvalidArgument(format!("bad port in '{spec}'"))
                })?;
                let host = host.to_string();
                Ok(match scheme {
                    "udpin" => Endpoint::UdpIn { host, port },
                    "udpout" => Endpoint::UdpOut { host, port },
                    _ => Endpoint::Tcp { host, port },
                })
            }
            "serial" => {
                let (path, baud) = match rest.rsplit_once(':') {
                    Some((path, baud_str)) => match baud_str.parse::<u32>() {
                        Ok(baud) => (path.to_string(), baud),
                        // The tail wasn't a baud rate; treat the whole
                        // rest as the device path (e.g. Windows COM3).
                        Err(_) => (rest.to_string(), DEFAULT_SERIAL_BAUD),
                    },
                    None => (rest.to_string(), DEFAULT_SERIAL_BAUD),
                };
                Ok(Endpoint::Serial { path, baud })
            }
            other => Err(LinkError::InvalidArgument(format!(
                "unknown transport '{other}'"
            ))),
        }
    }

    /// Address string for the MAVLink codec connector.
    pub fn address(&self) -> String {
        match self {
            Endpoint::UdpIn { host, port } => format!("udpin:{host}:{port}"),
            Endpoint::UdpOut { host, port } => format!("udpout:{host}:{port}"),
            Endpoint::Tcp { host, port } => format!("tcpout:{host}:{port}"),
            Endpoint::Serial { path, baud } => format!("serial:{path}:{baud}"),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Endpoint::UdpIn { host, port } => format!("udp listen {host}:{port}"),
            Endpoint::UdpOut { host, port } => format!("udp {host}:{port}"),
            Endpoint::Tcp { host, port } => format!("tcp {host}:{port}"),
            Endpoint::Serial { path, baud } => format!("serial {path}@{baud}"),
        }
    }
}

/// Serial devices present on this machine, for the connection dialog.
pub fn list_serial_ports() -> Result<Vec<String>, LinkError> {
    let ports = serialport::available_ports()
        .map_err(|err| LinkError::ConnectionFailed(format!("unable to list serial ports: {err}")))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
