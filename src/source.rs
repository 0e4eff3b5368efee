use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::clock;
use crate::config::SourceConfig;
use crate::error::Result;
use crate::protocol::{self, Endpoint, Envelope};
use crate::stats::{CycleReport, TimingSample};

/// The traffic generator. Feeds a burst of untimed traffic first, then runs
/// one measured validation cycle per configured service count.
pub struct Source {
    config: SourceConfig,
}

impl Source {
    pub fn new(config: SourceConfig) -> Source {
        Source { config }
    }

    pub async fn run(&self) -> Result<Vec<CycleReport>> {
        info!("starting source");
        self.feed().await;
        self.validate().await
    }

    /// Feeding stage: fire a fixed count of stamped messages at one target,
    /// spaced by the arrival delay. Replies are logged, never measured.
    pub async fn feed(&self) {
        info!(target = %self.config.feed_target, "feeding stage started");
        for seq in 0..self.config.feed_message_count as u64 {
            let envelope = Envelope::stamped(1, seq, None);
            let frame = envelope.to_string();
            debug!(%frame, "feeding");
            match protocol::exchange(&self.config.feed_target, &frame, protocol::FEED_TIMEOUT)
                .await
            {
                Ok(reply) if !reply.is_empty() => debug!(%reply, "feed reply"),
                Ok(_) => debug!(seq, "feed message got no reply"),
                Err(err) => warn!(seq, error = %err, "feed send failed"),
            }
            sleep(Duration::from_millis(self.config.arrival_delay_ms)).await;
        }
        info!("feeding stage finished");
    }

    /// Validation stage: one strictly sequential cycle per service count.
    pub async fn validate(&self) -> Result<Vec<CycleReport>> {
        if self.config.balancers.is_empty() {
            return Err(crate::error::SurgeError::Config(
                "no balancer addresses configured".into(),
            ));
        }
        let mut reports = Vec::with_capacity(self.config.service_counts.len());
        for (cycle, &count) in self.config.service_counts.iter().enumerate() {
            let report = self.run_cycle(cycle as u64, count).await;
            info!(
                cycle = report.cycle,
                services = report.service_count,
                sent = report.messages_sent,
                received = report.responses_received,
                mean_mrt_ms = report.mean_mrt_ms,
                stddev_mrt_ms = report.stddev_mrt_ms,
                "cycle finished"
            );
            reports.push(report);
        }
        Ok(reports)
    }

    async fn run_cycle(&self, cycle: u64, service_count: usize) -> CycleReport {
        info!(cycle, service_count, "starting cycle");
        self.configure_balancers(service_count).await;

        // Each cycle owns a fresh collection, so a straggler abandoned at
        // join time has nowhere left to write once this cycle is reported.
        let samples: Arc<Mutex<Vec<TimingSample>>> = Arc::new(Mutex::new(Vec::new()));

        let round_trip_bound = Duration::from_millis(self.config.round_trip_timeout_ms);
        let join_bound = Duration::from_millis(self.config.join_timeout_ms);

        let total = self.config.max_considered_messages_expected;
        let mut emissions = Vec::with_capacity(total);
        for i in 0..total {
            let balancer = self.config.balancers[i % self.config.balancers.len()].clone();
            let envelope = Envelope::stamped(cycle, (i + 1) as u64, None);
            let samples = samples.clone();
            emissions.push(tokio::spawn(emit(balancer, envelope, round_trip_bound, samples)));
            if i + 1 < total {
                sleep(Duration::from_millis(self.config.arrival_delay_ms)).await;
            }
        }

        for (i, task) in emissions.into_iter().enumerate() {
            match timeout(join_bound, task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(cycle, emission = i, error = %err, "emission task failed"),
                Err(_) => warn!(cycle, emission = i, "emission still running at join bound, abandoning"),
            }
        }

        let samples = samples.lock().await;
        CycleReport::from_samples(cycle, service_count, total, &samples)
    }

    async fn configure_balancers(&self, service_count: usize) {
        let frame = format!("{}{service_count}", protocol::CONFIG_PREFIX);
        for balancer in &self.config.balancers {
            match protocol::exchange(balancer, &frame, protocol::CONFIG_TIMEOUT).await {
                Ok(ack) if ack == protocol::CONFIG_OK => {
                    debug!(%balancer, service_count, "balancer configured")
                }
                Ok(ack) => warn!(%balancer, %ack, "balancer rejected config"),
                Err(err) => warn!(%balancer, error = %err, "config send failed"),
            }
        }
    }
}

/// One emission: full round trip through a balancer, recording a timing
/// sample only for a genuine service reply.
async fn emit(
    balancer: Endpoint,
    envelope: Envelope,
    bound: Duration,
    samples: Arc<Mutex<Vec<TimingSample>>>,
) {
    let cycle = envelope.cycle;
    let seq = envelope.seq;
    let frame = envelope.to_string();

    let reply = match protocol::exchange(&balancer, &frame, bound).await {
        Ok(reply) => reply,
        Err(err) => {
            warn!(cycle, seq, %balancer, error = %err, "round trip failed");
            return;
        }
    };

    if reply.is_empty() {
        warn!(cycle, seq, %balancer, "empty reply, dropping");
        return;
    }
    if protocol::is_failure_token(&reply) {
        debug!(cycle, seq, %balancer, %reply, "request not serviced");
        return;
    }

    let mrt_ms = clock::now_millis() - envelope.sent_ts;
    if !mrt_ms.is_finite() || mrt_ms < 0.0 {
        warn!(cycle, seq, mrt_ms, "nonsensical round-trip time, dropping");
        return;
    }

    info!(cycle, seq, mrt_ms, "response captured");
    samples.lock().await.push(TimingSample {
        response: reply,
        mrt_ms,
    });
}
