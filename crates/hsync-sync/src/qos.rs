//! Quality-of-service estimator.
//!
//! Maintains a smoothed round-trip-time estimate and a confidence factor
//! from which the adaptive request timeout is derived. A background loop
//! blends the registry's median peer RTT into the estimate once per RTT and
//! lets confidence recover towards 1.0; new peers lower it again.

use crate::DownloaderConfig;
use hsync_network::PeerRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
struct QosState {
    rtt: Duration,
    confidence: f64,
}

/// Adaptive RTT and TTL estimator.
#[derive(Debug)]
pub struct QosTuner {
    rtt_min: Duration,
    rtt_max: Duration,
    min_confidence: f64,
    ttl_scaling: u32,
    ttl_limit: Duration,
    tuning_peers: usize,
    confidence_cap: usize,
    tuning_impact: f64,
    state: Mutex<QosState>,
}

/// Timeout for a request given an RTT estimate and confidence.
pub fn compute_ttl(rtt: Duration, confidence: f64, scaling: u32, limit: Duration) -> Duration {
    let confidence = if confidence > 0.0 { confidence } else { f64::MIN_POSITIVE };
    let ttl_secs = scaling as f64 * rtt.as_secs_f64() / confidence;
    if !ttl_secs.is_finite() || ttl_secs >= limit.as_secs_f64() {
        return limit;
    }
    Duration::from_secs_f64(ttl_secs)
}

impl QosTuner {
    /// Create an estimator starting at the maximum RTT with full confidence.
    pub fn new(config: &DownloaderConfig) -> Self {
        Self {
            rtt_min: config.rtt_min_estimate,
            rtt_max: config.rtt_max_estimate,
            min_confidence: config.rtt_min_confidence,
            ttl_scaling: config.ttl_scaling,
            ttl_limit: config.ttl_limit,
            tuning_peers: config.qos_tuning_peers,
            confidence_cap: config.qos_confidence_cap,
            tuning_impact: config.qos_tuning_impact,
            state: Mutex::new(QosState {
                rtt: config.rtt_max_estimate,
                confidence: 1.0,
            }),
        }
    }

    /// Current RTT estimate.
    pub fn rtt(&self) -> Duration {
        self.state.lock().rtt
    }

    /// Current confidence in the RTT estimate.
    pub fn confidence(&self) -> f64 {
        self.state.lock().confidence
    }

    /// Target RTT for sizing requests, slightly below the estimate so
    /// smaller requests are preferred.
    pub fn request_rtt(&self) -> Duration {
        self.rtt().mul_f64(0.9)
    }

    /// Timeout allowance for a single request.
    pub fn request_ttl(&self) -> Duration {
        let state = *self.state.lock();
        compute_ttl(state.rtt, state.confidence, self.ttl_scaling, self.ttl_limit)
    }

    /// Run one tuning cycle with a fresh median RTT. Returns the new estimate.
    pub fn tune(&self, median: Duration) -> Duration {
        let mut state = self.state.lock();
        let blended = (1.0 - self.tuning_impact) * state.rtt.as_secs_f64()
            + self.tuning_impact * median.as_secs_f64();
        state.rtt = Duration::from_secs_f64(blended);
        state.confidence += (1.0 - state.confidence) / 2.0;
        trace!(rtt = ?state.rtt, confidence = state.confidence, "Recalculated QoS values");
        state.rtt
    }

    /// Lower confidence after the `peers`-th peer joined.
    pub fn reduce_confidence(&self, peers: usize) {
        if peers == 0 {
            return;
        }
        let mut state = self.state.lock();
        if peers == 1 {
            state.confidence = 1.0;
            return;
        }
        if peers >= self.confidence_cap {
            return;
        }
        let n = peers as f64;
        state.confidence = (state.confidence * (n - 1.0) / n).max(self.min_confidence);

        let ttl = compute_ttl(state.rtt, state.confidence, self.ttl_scaling, self.ttl_limit);
        debug!(rtt = ?state.rtt, confidence = state.confidence, ttl = ?ttl, "Relaxed QoS values");
    }

    /// Tune from the registry once per RTT until `quit` fires.
    pub async fn run(self: Arc<Self>, registry: Arc<PeerRegistry>, quit: CancellationToken) {
        loop {
            let median = registry.median_rtt(self.tuning_peers, self.rtt_min, self.rtt_max);
            let rtt = self.tune(median);
            tokio::select! {
                _ = quit.cancelled() => return,
                _ = tokio::time::sleep(rtt) => {}
            }
        }
    }
}
