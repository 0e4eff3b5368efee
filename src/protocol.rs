//! The wire protocol spoken between source, balancer and services.
//!
//! Frames are plain text, one logical message per connection, delimited by a
//! trailing newline. Readers also accept a frame terminated by EOF so that a
//! peer which writes and closes is still understood.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::clock;
use crate::error::{Result, SurgeError};

// ===== Tokens =====

pub const PING: &str = "ping";
pub const FREE: &str = "free";
pub const BUSY: &str = "busy";
pub const CONFIG_PREFIX: &str = "config;";
pub const CONFIG_OK: &str = "CONFIG_OK";
pub const CONFIG_FAIL: &str = "CONFIG_FAIL";
pub const CONFIG_ERROR_PREFIX: &str = "CONFIG_ERROR:";
pub const BUSY_NO_ACTIVE: &str = "busy_no_active_services";
pub const BUSY_ALL_OCCUPIED: &str = "busy_all_services_occupied_or_down";
pub const ERROR_SERVICE_TIMEOUT: &str = "error_service_timeout";
pub const ERROR_CONTACTING_SERVICE: &str = "error_contacting_service";
pub const INTERNAL_LB_ERROR: &str = "internal_lb_error";
pub const AI_RESPONSE_PREFIX: &str = "AI_RESPONSE:";

/// True for any balancer-generated frame that signals the request never
/// produced a service response. These never enter the timing statistics.
pub fn is_failure_token(reply: &str) -> bool {
    matches!(
        reply,
        BUSY | BUSY_NO_ACTIVE | BUSY_ALL_OCCUPIED | ERROR_SERVICE_TIMEOUT
            | ERROR_CONTACTING_SERVICE
            | INTERNAL_LB_ERROR
    )
}

// ===== Timeouts =====

/// Liveness probe round trip.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
/// Balancer waiting on a service it has forwarded work to.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);
/// Source waiting on a full request round trip through a balancer.
pub const ROUND_TRIP_TIMEOUT: Duration = Duration::from_secs(20);
/// Source delivering a config frame.
pub const CONFIG_TIMEOUT: Duration = Duration::from_secs(15);
/// Outer bound on joining one emission task at the end of a cycle.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(30);
/// Fire-and-forget sends during the feeding stage.
pub const FEED_TIMEOUT: Duration = Duration::from_secs(5);

/// A frame larger than this is a protocol violation, not a fragment.
const MAX_FRAME_LEN: usize = 64 * 1024;

// ===== Endpoint =====

/// A `host:port` pair naming a balancer or a service. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Endpoint {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    /// Parse a comma-separated `host:port,host:port,...` list.
    pub fn parse_list(s: &str) -> Result<Vec<Endpoint>> {
        s.split(',')
            .map(|pair| pair.trim().parse())
            .collect::<Result<Vec<_>>>()
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Endpoint {
        Endpoint::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for Endpoint {
    type Err = SurgeError;

    fn from_str(s: &str) -> Result<Endpoint> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| SurgeError::Endpoint(s.to_string()))?;
        if host.is_empty() {
            return Err(SurgeError::Endpoint(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| SurgeError::Endpoint(s.to_string()))?;
        Ok(Endpoint::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = SurgeError;

    fn try_from(s: String) -> Result<Endpoint> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(ep: Endpoint) -> String {
        ep.to_string()
    }
}

// ===== Envelope =====

/// A routed unit of work: `cycle;seq;sentTs[;payload]`.
///
/// `sent_ts` is stamped exactly once, at construction, and rides along
/// unchanged so the source can subtract it from the receive time.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub cycle: u64,
    pub seq: u64,
    pub sent_ts: f64,
    pub payload: Option<String>,
}

impl Envelope {
    /// Build an envelope stamped with the current wall clock.
    pub fn stamped(cycle: u64, seq: u64, payload: Option<String>) -> Envelope {
        Envelope {
            cycle,
            seq,
            sent_ts: clock::now_millis(),
            payload,
        }
    }
}

impl FromStr for Envelope {
    type Err = SurgeError;

    fn from_str(s: &str) -> Result<Envelope> {
        let mut parts = s.splitn(4, ';');
        let cycle = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| SurgeError::Protocol(format!("bad cycle field in '{s}'")))?;
        let seq = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| SurgeError::Protocol(format!("bad seq field in '{s}'")))?;
        let sent_ts = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| SurgeError::Protocol(format!("bad timestamp field in '{s}'")))?;
        let payload = parts.next().map(str::to_string);
        Ok(Envelope {
            cycle,
            seq,
            sent_ts,
            payload,
        })
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{};{}", self.cycle, self.seq, self.sent_ts)?;
        if let Some(payload) = &self.payload {
            write!(f, ";{payload}")?;
        }
        Ok(())
    }
}

// ===== Framing =====

/// Write one frame: the message followed by the delimiter.
pub async fn write_frame<W>(writer: &mut W, frame: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame: everything up to the delimiter or EOF, trimmed.
pub async fn read_frame<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).await?;
        if n == 0 || byte[0] == b'\n' {
            break;
        }
        buf.push(byte[0]);
        if buf.len() > MAX_FRAME_LEN {
            return Err(SurgeError::Protocol("frame exceeds maximum length".into()));
        }
    }
    let frame = String::from_utf8_lossy(&buf);
    Ok(frame.trim_end_matches('\r').to_string())
}

/// Connect, send one frame and read the reply, all within `bound`.
pub async fn exchange(endpoint: &Endpoint, frame: &str, bound: Duration) -> Result<String> {
    let fut = async {
        let mut stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        write_frame(&mut stream, frame).await?;
        read_frame(&mut stream).await
    };
    timeout(bound, fut).await.map_err(|_| SurgeError::Timeout)?
}
