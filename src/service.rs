use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::compute::Compute;
use crate::error::Result;
use crate::protocol::{self, Envelope};

/// Queue capacity when the role is started without an explicit override.
pub const DEFAULT_CAPACITY: usize = 10;

/// Prompt used when an envelope carries no payload of its own.
const DEFAULT_PROMPT: &str = "How has AI reshaped the 21st century?";

/// A worker process: admits up to `capacity` requests at a time, runs each
/// one through the compute backend and frames a timestamped reply.
pub struct Service {
    listener: TcpListener,
    admission: Arc<Admission>,
    compute: Arc<dyn Compute>,
}

impl Service {
    /// Bind the listen socket. Capacity 0 means unbounded admission.
    pub async fn bind(
        addr: SocketAddr,
        capacity: usize,
        compute: Arc<dyn Compute>,
    ) -> Result<Service> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Service {
            listener,
            admission: Arc::new(Admission::new(capacity)),
            compute,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        info!(addr = %self.local_addr()?, "service listening");
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };
            let admission = self.admission.clone();
            let compute = self.compute.clone();
            tokio::spawn(async move {
                if let Err(err) = handle(stream, admission, compute).await {
                    debug!(%peer, error = %err, "connection dropped");
                }
            });
        }
    }
}

async fn handle(
    mut stream: TcpStream,
    admission: Arc<Admission>,
    compute: Arc<dyn Compute>,
) -> Result<()> {
    let frame = timeout(protocol::FORWARD_TIMEOUT, protocol::read_frame(&mut stream))
        .await
        .map_err(|_| crate::error::SurgeError::Timeout)??;

    if frame == protocol::PING {
        let status = if admission.has_room() {
            protocol::FREE
        } else {
            protocol::BUSY
        };
        return protocol::write_frame(&mut stream, status).await;
    }

    // Admission is all or nothing: a request that finds the queue full is
    // rejected on the spot, never parked.
    let permit = match admission.try_admit() {
        Some(permit) => permit,
        None => {
            debug!("queue full, rejecting request");
            return protocol::write_frame(&mut stream, protocol::BUSY).await;
        }
    };

    let prompt = frame
        .parse::<Envelope>()
        .ok()
        .and_then(|env| env.payload)
        .unwrap_or_else(|| DEFAULT_PROMPT.to_string());

    let arrival_ts = clock::now_millis();
    // Frames are newline-delimited, so the answer has to stay on one line.
    let answer = compute.ask(&prompt).await.replace('\n', " ");
    let completion_ts = clock::now_millis();

    let reply = format!(
        "{arrival_ts};{completion_ts};{}{answer}",
        protocol::AI_RESPONSE_PREFIX
    );
    let outcome = protocol::write_frame(&mut stream, &reply).await;

    // The permit is released here on every path, success or not.
    drop(permit);
    if let Err(err) = &outcome {
        error!(error = %err, "failed to send reply");
    }
    outcome
}

// ===== Admission =====

/// The bounded-queue admission counter. A permit is held for the full life
/// of an admitted request and returned exactly once, when it drops.
struct Admission {
    slots: Option<Arc<Semaphore>>,
}

struct AdmissionPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl Admission {
    fn new(capacity: usize) -> Admission {
        let slots = (capacity > 0).then(|| Arc::new(Semaphore::new(capacity)));
        Admission { slots }
    }

    fn has_room(&self) -> bool {
        self.slots
            .as_ref()
            .map_or(true, |s| s.available_permits() > 0)
    }

    fn try_admit(&self) -> Option<AdmissionPermit> {
        match &self.slots {
            None => Some(AdmissionPermit { _permit: None }),
            Some(slots) => match slots.clone().try_acquire_owned() {
                Ok(permit) => Some(AdmissionPermit {
                    _permit: Some(permit),
                }),
                Err(TryAcquireError::NoPermits) => None,
                Err(TryAcquireError::Closed) => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_enforces_capacity() {
        let admission = Admission::new(2);
        let a = admission.try_admit().unwrap();
        let _b = admission.try_admit().unwrap();
        assert!(!admission.has_room());
        assert!(admission.try_admit().is_none());

        drop(a);
        assert!(admission.has_room());
        assert!(admission.try_admit().is_some());
    }

    #[test]
    fn zero_capacity_means_unbounded() {
        let admission = Admission::new(0);
        let permits: Vec<_> = (0..100).map(|_| admission.try_admit().unwrap()).collect();
        assert!(admission.has_room());
        drop(permits);
    }
}
