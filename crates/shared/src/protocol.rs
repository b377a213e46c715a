use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChannelName, SimulationId};

/// One record on the inbound event stream. Read-only, ordered by arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactEvent {
    pub channel: ChannelName,
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventKind {
    /// A complete agent message (chat reply, progress line).
    Message { agent: String, text: String },
    /// A streaming fragment of an in-progress reply.
    Token { text: String },
    /// Terminal event of a simulation run, carrying the metrics snapshot.
    Completed { metrics: MetricsSnapshot },
    Error { message: String },
}

/// Percentage deltas per metric, as emitted by the simulation backend.
/// Metric names are snake_case (`housing_affordability`,
/// `traffic_congestion`, `gdp_growth`, ...). A BTreeMap keeps iteration
/// deterministic so descriptor synthesis from the same snapshot is
/// reproducible.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(flatten)]
    pub metrics: BTreeMap<String, MetricDelta>,
}

impl MetricsSnapshot {
    pub fn single(name: impl Into<String>, percentage: f64) -> Self {
        let mut metrics = BTreeMap::new();
        metrics.insert(name.into(), MetricDelta { percentage });
        Self { metrics }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub percentage: f64,
}

/// Outbound request to the backend. The core only consumes the resulting
/// event stream or the synchronous JSON reply; it does not depend on any
/// particular backend implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BackendRequest {
    CreateSimulation {
        city: String,
        policy_text: String,
    },
    SendChat {
        simulation_id: SimulationId,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationCreated {
    pub simulation_id: SimulationId,
    pub channel: ChannelName,
}

/// Fire-and-forget subscription frames sent to the transport. No
/// acknowledgment is required by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StreamRequest {
    Subscribe { channel: ChannelName },
    Unsubscribe { channel: ChannelName },
}

/// Display-log record for Message/Token events shown in the thoughts panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtEntry {
    pub agent: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
