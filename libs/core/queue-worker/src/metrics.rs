//! Metrics for the queue worker.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::recovery::ProcessorHealth;

/// Metrics published by one worker, labelled with its entity address.
#[derive(Clone)]
pub struct WorkerMetrics {
    entity: String,
}

impl WorkerMetrics {
    /// Create metrics for an entity.
    pub fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
        }
    }

    /// Record a delivery received from the broker.
    pub fn delivery_received(&self) {
        counter!(
            "queue_worker_deliveries_received_total",
            "entity" => self.entity.clone()
        )
        .increment(1);
    }

    /// Record a delivery completed.
    pub fn delivery_completed(&self) {
        counter!(
            "queue_worker_deliveries_completed_total",
            "entity" => self.entity.clone()
        )
        .increment(1);
    }

    /// Record a delivery abandoned for redelivery.
    pub fn delivery_abandoned(&self) {
        counter!(
            "queue_worker_deliveries_abandoned_total",
            "entity" => self.entity.clone()
        )
        .increment(1);
    }

    /// Record a delivery dead-lettered, labelled with its reason.
    pub fn delivery_dead_lettered(&self, reason: &str) {
        counter!(
            "queue_worker_deliveries_dead_lettered_total",
            "entity" => self.entity.clone(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    /// Record how long one consumer invocation took.
    pub fn consume_duration(&self, duration: Duration) {
        histogram!(
            "queue_worker_consume_duration_seconds",
            "entity" => self.entity.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a successful subscription restart.
    pub fn processor_restarted(&self) {
        counter!(
            "queue_worker_processor_restarts_total",
            "entity" => self.entity.clone()
        )
        .increment(1);
    }

    /// Publish the current health state as a gauge.
    pub fn health(&self, health: ProcessorHealth) {
        let value = match health {
            ProcessorHealth::Stopped => 0.0,
            ProcessorHealth::Running => 1.0,
            ProcessorHealth::StoppedFaulted => 2.0,
            ProcessorHealth::Restarting => 3.0,
            ProcessorHealth::TerminallyFailed => 4.0,
        };
        gauge!(
            "queue_worker_processor_health",
            "entity" => self.entity.clone()
        )
        .set(value);
    }
}
