//! Prometheus metrics for the matchmaking engine

use crate::error::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

/// Collector owning every engine metric and the registry they live in
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Registry,
    pub groups_queued: IntCounter,
    pub matches_created: IntCounter,
    pub invites_sent: IntCounter,
    pub invites_expired: IntCounter,
    pub active_instances: IntGauge,
    pub players_waiting: IntGauge,
    pub queue_wait_seconds: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let groups_queued = IntCounter::with_opts(Opts::new(
            "battlemaster_groups_queued_total",
            "Groups accepted into a matchmaking queue",
        ))?;
        let matches_created = IntCounter::with_opts(Opts::new(
            "battlemaster_matches_created_total",
            "Battleground and arena instances started",
        ))?;
        let invites_sent = IntCounter::with_opts(Opts::new(
            "battlemaster_invites_sent_total",
            "Invitations delivered to queued players",
        ))?;
        let invites_expired = IntCounter::with_opts(Opts::new(
            "battlemaster_invites_expired_total",
            "Invitations that lapsed without confirmation",
        ))?;
        let active_instances = IntGauge::with_opts(Opts::new(
            "battlemaster_active_instances",
            "Live battleground and arena instances",
        ))?;
        let players_waiting = IntGauge::with_opts(Opts::new(
            "battlemaster_players_waiting",
            "Players currently queued across all queues",
        ))?;
        let queue_wait_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "battlemaster_queue_wait_seconds",
                "Time between enqueue and invitation",
            )
            .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        )?;

        registry.register(Box::new(groups_queued.clone()))?;
        registry.register(Box::new(matches_created.clone()))?;
        registry.register(Box::new(invites_sent.clone()))?;
        registry.register(Box::new(invites_expired.clone()))?;
        registry.register(Box::new(active_instances.clone()))?;
        registry.register(Box::new(players_waiting.clone()))?;
        registry.register(Box::new(queue_wait_seconds.clone()))?;

        Ok(Self {
            registry,
            groups_queued,
            matches_created,
            invites_sent,
            invites_expired,
            active_instances,
            players_waiting,
            queue_wait_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format
    pub fn gather_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
