use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::balance::WorkerPool;
use crate::error::{Result, SurgeError};
use crate::protocol::{self, Endpoint};

/// A dispatcher: accepts traffic from sources, keeps the active service
/// subset, and relays each request to the next free service in rotation.
pub struct LoadBalancer {
    listener: TcpListener,
    pool: Arc<Mutex<WorkerPool>>,
    forward_timeout: Duration,
}

impl LoadBalancer {
    /// Bind the listen socket over a non-empty set of service endpoints.
    pub async fn bind(addr: SocketAddr, services: Vec<Endpoint>) -> Result<LoadBalancer> {
        if services.is_empty() {
            return Err(SurgeError::Config(
                "load balancer needs at least one service endpoint".into(),
            ));
        }
        let listener = TcpListener::bind(addr).await?;
        Ok(LoadBalancer {
            listener,
            pool: Arc::new(Mutex::new(WorkerPool::new(services))),
            forward_timeout: protocol::FORWARD_TIMEOUT,
        })
    }

    /// Override how long a forwarded request may wait on its service.
    pub fn with_forward_timeout(mut self, bound: Duration) -> LoadBalancer {
        self.forward_timeout = bound;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        info!(addr = %self.local_addr()?, "load balancer listening");
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };
            let pool = self.pool.clone();
            let forward_timeout = self.forward_timeout;
            tokio::spawn(async move {
                if let Err(err) = handle(stream, pool, forward_timeout).await {
                    debug!(%peer, error = %err, "connection dropped");
                }
            });
        }
    }
}

async fn handle(
    mut stream: TcpStream,
    pool: Arc<Mutex<WorkerPool>>,
    forward_timeout: Duration,
) -> Result<()> {
    let frame = timeout(protocol::FORWARD_TIMEOUT, protocol::read_frame(&mut stream))
        .await
        .map_err(|_| SurgeError::Timeout)??;

    // Whatever goes wrong past this point, the caller gets a framed answer.
    let reply = match respond(&frame, &pool, forward_timeout).await {
        Ok(reply) => reply,
        Err(err) => {
            error!(error = %err, frame = %frame, "request handling failed");
            protocol::INTERNAL_LB_ERROR.to_string()
        }
    };
    protocol::write_frame(&mut stream, &reply).await
}

/// Compute the one reply frame owed for `frame`.
async fn respond(
    frame: &str,
    pool: &Arc<Mutex<WorkerPool>>,
    forward_timeout: Duration,
) -> Result<String> {
    if frame == protocol::PING {
        // The balancer itself applies no admission control.
        return Ok(protocol::FREE.to_string());
    }
    if frame == "config" || frame.starts_with(protocol::CONFIG_PREFIX) {
        return Ok(configure(frame, pool).await);
    }
    Ok(route(frame, pool, forward_timeout).await)
}

async fn configure(frame: &str, pool: &Arc<Mutex<WorkerPool>>) -> String {
    let arg = frame
        .strip_prefix(protocol::CONFIG_PREFIX)
        .unwrap_or("")
        .trim();
    if arg.is_empty() {
        return protocol::CONFIG_FAIL.to_string();
    }
    match arg.parse::<i64>() {
        Ok(n) => {
            let mut pool = pool.lock().await;
            pool.configure(n);
            info!(requested = n, active = pool.active().len(), "reconfigured pool");
            protocol::CONFIG_OK.to_string()
        }
        Err(_) => {
            warn!(arg, "unparseable worker count in config frame");
            format!("{}not an integer: '{arg}'", protocol::CONFIG_ERROR_PREFIX)
        }
    }
}

/// Pick the next free service in rotation and relay the frame to it.
///
/// The pool lock is held only to snapshot the candidates and, once one is
/// chosen, to push the cursor past it. Probing and forwarding run unlocked
/// so slow services never serialize unrelated traffic.
async fn route(frame: &str, pool: &Arc<Mutex<WorkerPool>>, forward_timeout: Duration) -> String {
    let (active, start) = pool.lock().await.snapshot();
    if active.is_empty() {
        return protocol::BUSY_NO_ACTIVE.to_string();
    }

    for i in 0..active.len() {
        let pos = (start + i) % active.len();
        let candidate = &active[pos];
        if !is_free(candidate).await {
            debug!(service = %candidate, "candidate busy or unreachable");
            continue;
        }

        pool.lock().await.advance_past(pos);
        debug!(service = %candidate, "relaying request");

        // Work travels on a fresh connection, separate from the probe.
        return match protocol::exchange(candidate, frame, forward_timeout).await {
            Ok(reply) => reply,
            Err(SurgeError::Timeout) => {
                warn!(service = %candidate, "service timed out");
                protocol::ERROR_SERVICE_TIMEOUT.to_string()
            }
            Err(err) => {
                warn!(service = %candidate, error = %err, "service unreachable");
                protocol::ERROR_CONTACTING_SERVICE.to_string()
            }
        };
    }

    protocol::BUSY_ALL_OCCUPIED.to_string()
}

/// One short-lived probe connection. Anything but a clean `free` reply,
/// including a refused connection or a timeout, counts as busy.
async fn is_free(endpoint: &Endpoint) -> bool {
    matches!(
        protocol::exchange(endpoint, protocol::PING, protocol::PROBE_TIMEOUT).await,
        Ok(reply) if reply == protocol::FREE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(n: u16) -> Arc<Mutex<WorkerPool>> {
        let services = (0..n)
            .map(|i| Endpoint::new("127.0.0.1", 4001 + i))
            .collect();
        Arc::new(Mutex::new(WorkerPool::new(services)))
    }

    async fn respond(frame: &str, pool: &Arc<Mutex<WorkerPool>>) -> Result<String> {
        super::respond(frame, pool, protocol::FORWARD_TIMEOUT).await
    }

    #[tokio::test]
    async fn config_clamps_and_acks() {
        let pool = pool_of(2);
        assert_eq!(respond("config;1", &pool).await.unwrap(), protocol::CONFIG_OK);
        assert_eq!(pool.lock().await.active().len(), 1);

        assert_eq!(respond("config;5", &pool).await.unwrap(), protocol::CONFIG_OK);
        assert_eq!(pool.lock().await.active().len(), 2);
    }

    #[tokio::test]
    async fn config_zero_empties_the_pool() {
        let pool = pool_of(3);
        assert_eq!(respond("config;0", &pool).await.unwrap(), protocol::CONFIG_OK);
        assert!(pool.lock().await.active().is_empty());
    }

    #[tokio::test]
    async fn bad_config_errors_and_leaves_pool_alone() {
        let pool = pool_of(2);
        let reply = respond("config;notanumber", &pool).await.unwrap();
        assert!(reply.starts_with(protocol::CONFIG_ERROR_PREFIX));
        assert_eq!(pool.lock().await.active().len(), 2);
    }

    #[tokio::test]
    async fn bare_config_frame_fails() {
        let pool = pool_of(2);
        assert_eq!(respond("config", &pool).await.unwrap(), protocol::CONFIG_FAIL);
        assert_eq!(respond("config;", &pool).await.unwrap(), protocol::CONFIG_FAIL);
    }

    #[tokio::test]
    async fn routing_with_empty_pool_reports_no_active() {
        let pool = pool_of(2);
        pool.lock().await.configure(0);
        let reply = respond("0;1;123.0", &pool).await.unwrap();
        assert_eq!(reply, protocol::BUSY_NO_ACTIVE);
    }

    #[tokio::test]
    async fn probe_frame_answers_free() {
        let pool = pool_of(1);
        assert_eq!(respond("ping", &pool).await.unwrap(), protocol::FREE);
    }
}
