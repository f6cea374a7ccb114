//! Prometheus metrics for VibeGate
//!
//! Exposes metrics at /metrics endpoint for monitoring and observability.
//! Both gateway sides record into the same struct, distinguished by the
//! `side` label (`client` or `server`).

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

mod server;

pub use server::MetricsServer;

pub const SIDE_CLIENT: &str = "client";
pub const SIDE_SERVER: &str = "server";

/// All gateway metrics in one place
#[derive(Clone)]
pub struct GatewayMetrics {
    pub registry: Registry,

    // Session metrics
    pub sessions_opened_total: IntCounterVec,
    pub sessions_current: IntGaugeVec,

    // Message metrics
    pub requests_total: IntCounterVec,
    pub replies_total: IntCounterVec,
    pub messages_dropped_total: IntCounterVec,
    pub codec_failures_total: IntCounterVec,

    // Ask path
    pub ask_requests_total: IntCounterVec,
    pub ask_timeouts_total: IntCounterVec,
    pub ask_latency: Histogram,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let sessions_opened_total = IntCounterVec::new(
            Opts::new(
                "vibegate_sessions_opened_total",
                "Total sessions opened since startup",
            ),
            &["side"],
        )
        .unwrap();

        let sessions_current = IntGaugeVec::new(
            Opts::new("vibegate_sessions_current", "Current number of live sessions"),
            &["side"],
        )
        .unwrap();

        let requests_total = IntCounterVec::new(
            Opts::new(
                "vibegate_requests_total",
                "Requests forwarded (client) or dispatched (server) by kind",
            ),
            &["side", "kind"],
        )
        .unwrap();

        let replies_total = IntCounterVec::new(
            Opts::new(
                "vibegate_replies_total",
                "Replies streamed back (server) or delivered to callers (client)",
            ),
            &["side"],
        )
        .unwrap();

        let messages_dropped_total = IntCounterVec::new(
            Opts::new(
                "vibegate_messages_dropped_total",
                "Messages dropped due to session buffer overflow",
            ),
            &["side"],
        )
        .unwrap();

        let codec_failures_total = IntCounterVec::new(
            Opts::new(
                "vibegate_codec_failures_total",
                "Payloads that failed to encode or decode",
            ),
            &["side", "op"],
        )
        .unwrap();

        let ask_requests_total = IntCounterVec::new(
            Opts::new("vibegate_ask_requests_total", "Total one-shot ask requests"),
            &["side"],
        )
        .unwrap();

        let ask_timeouts_total = IntCounterVec::new(
            Opts::new(
                "vibegate_ask_timeouts_total",
                "One-shot ask requests that timed out",
            ),
            &["side"],
        )
        .unwrap();

        let ask_latency = Histogram::with_opts(
            HistogramOpts::new(
                "vibegate_ask_latency_seconds",
                "Time from ask dispatch to reply on the receptionist",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
            ]),
        )
        .unwrap();

        registry
            .register(Box::new(sessions_opened_total.clone()))
            .unwrap();
        registry
            .register(Box::new(sessions_current.clone()))
            .unwrap();
        registry
            .register(Box::new(requests_total.clone()))
            .unwrap();
        registry
            .register(Box::new(replies_total.clone()))
            .unwrap();
        registry
            .register(Box::new(messages_dropped_total.clone()))
            .unwrap();
        registry
            .register(Box::new(codec_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(ask_requests_total.clone()))
            .unwrap();
        registry
            .register(Box::new(ask_timeouts_total.clone()))
            .unwrap();
        registry.register(Box::new(ask_latency.clone())).unwrap();

        GatewayMetrics {
            registry,
            sessions_opened_total,
            sessions_current,
            requests_total,
            replies_total,
            messages_dropped_total,
            codec_failures_total,
            ask_requests_total,
            ask_timeouts_total,
            ask_latency,
        }
    }

    pub fn session_opened(&self, side: &str) {
        self.sessions_opened_total.with_label_values(&[side]).inc();
        self.sessions_current.with_label_values(&[side]).inc();
    }

    pub fn session_closed(&self, side: &str) {
        self.sessions_current.with_label_values(&[side]).dec();
    }

    pub fn request(&self, side: &str, kind: &str) {
        self.requests_total.with_label_values(&[side, kind]).inc();
    }

    pub fn reply(&self, side: &str) {
        self.replies_total.with_label_values(&[side]).inc();
    }

    pub fn message_dropped(&self, side: &str) {
        self.messages_dropped_total.with_label_values(&[side]).inc();
    }

    pub fn encode_failed(&self, side: &str) {
        self.codec_failures_total
            .with_label_values(&[side, "encode"])
            .inc();
    }

    pub fn decode_failed(&self, side: &str) {
        self.codec_failures_total
            .with_label_values(&[side, "decode"])
            .inc();
    }

    pub fn ask_started(&self, side: &str) {
        self.ask_requests_total.with_label_values(&[side]).inc();
    }

    pub fn ask_timed_out(&self, side: &str) {
        self.ask_timeouts_total.with_label_values(&[side]).inc();
    }

    pub fn ask_completed(&self, seconds: f64) {
        self.ask_latency.observe(seconds);
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode_text(&self) -> Result<Vec<u8>, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
