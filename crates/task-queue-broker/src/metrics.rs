use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use task_queue_core::StoreStats;

/// Prometheus metrics for the broker
pub struct BrokerMetrics {
    pub registry: Registry,

    // Command counters
    pub commands_total: IntCounterVec,

    // Task lifecycle counters
    pub tasks_added_total: IntCounter,
    pub tasks_acked_total: IntCounter,
    pub leases_expired_total: IntCounter,

    // Task gauges
    pub tasks_pending: IntGauge,
    pub tasks_leased: IntGauge,
    pub queues: IntGauge,

    // Connections
    pub connections_active: IntGauge,

    // Snapshots by result
    pub snapshots_total: IntCounterVec,
}

impl BrokerMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let commands_total = IntCounterVec::new(
            Opts::new("tq_commands_total", "Commands handled, by verb and outcome"),
            &["command", "outcome"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let tasks_added_total = IntCounter::new("tq_tasks_added_total", "Tasks accepted by ADD")?;
        registry.register(Box::new(tasks_added_total.clone()))?;

        let tasks_acked_total = IntCounter::new("tq_tasks_acked_total", "Tasks removed by ACK")?;
        registry.register(Box::new(tasks_acked_total.clone()))?;

        let leases_expired_total = IntCounter::new(
            "tq_leases_expired_total",
            "Leases that timed out and were returned to their queue",
        )?;
        registry.register(Box::new(leases_expired_total.clone()))?;

        let tasks_pending = IntGauge::new("tq_tasks_pending", "Number of available tasks")?;
        registry.register(Box::new(tasks_pending.clone()))?;

        let tasks_leased = IntGauge::new("tq_tasks_leased", "Number of leased tasks")?;
        registry.register(Box::new(tasks_leased.clone()))?;

        let queues = IntGauge::new("tq_queues", "Number of known queues")?;
        registry.register(Box::new(queues.clone()))?;

        let connections_active = IntGauge::new("tq_connections_active", "Open client connections")?;
        registry.register(Box::new(connections_active.clone()))?;

        let snapshots_total = IntCounterVec::new(
            Opts::new("tq_snapshots_total", "Snapshot writes by result"),
            &["result"],
        )?;
        registry.register(Box::new(snapshots_total.clone()))?;

        Ok(BrokerMetrics {
            registry,
            commands_total,
            tasks_added_total,
            tasks_acked_total,
            leases_expired_total,
            tasks_pending,
            tasks_leased,
            queues,
            connections_active,
            snapshots_total,
        })
    }

    /// Increment command counter
    pub fn inc_command(&self, command: &str, outcome: &str) {
        self.commands_total
            .with_label_values(&[command, outcome])
            .inc();
    }

    /// Update store gauges
    pub fn update_store(&self, stats: StoreStats) {
        self.tasks_pending.set(stats.pending as i64);
        self.tasks_leased.set(stats.leased as i64);
        self.queues.set(stats.queues as i64);
    }

    pub fn inc_snapshot(&self, result: &str) {
        self.snapshots_total.with_label_values(&[result]).inc();
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
