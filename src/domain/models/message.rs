//! Bus message domain model.
//!
//! Every event inside a cluster is an immutable `BusMessage` appended to the
//! cluster ledger. Sequence numbers are assigned by the bus under its lock
//! and are gap-free within a cluster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved topic names with orchestrator-level meaning.
pub mod topics {
    /// Default seed topic published by the supervisor on cluster start.
    pub const ISSUE_OPENED: &str = "ISSUE_OPENED";
    /// Conventionally published by worker completion hooks.
    pub const TASK_COMPLETE: &str = "TASK_COMPLETE";
    /// Reserved stop signal; the supervisor's shutdown detector watches it.
    pub const CLUSTER_STOP: &str = "CLUSTER_STOP";
    /// Published by error hooks when an agent run fails.
    pub const AGENT_ERROR: &str = "AGENT_ERROR";
}

/// Publisher id used for messages originated by the supervisor itself.
pub const ORCHESTRATOR_PUBLISHER: &str = "orchestrator";

/// An immutable event on a cluster's message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    /// Monotonically increasing, gap-free within the cluster. Starts at 1.
    pub sequence: u64,
    /// Owning cluster.
    pub cluster_id: String,
    /// Topic string; never empty.
    pub topic: String,
    /// Publishing agent id, or [`ORCHESTRATOR_PUBLISHER`].
    pub publisher: String,
    /// Opaque payload.
    pub payload: serde_json::Value,
    /// Assigned at publish time.
    pub timestamp: DateTime<Utc>,
}

/// Filter for ledger queries. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    /// Exact topic match.
    pub topic: Option<String>,
    /// Only messages with `sequence > since_seq`.
    pub since_seq: Option<u64>,
    /// Exact publisher match.
    pub publisher: Option<String>,
}

impl MessageQuery {
    /// Query for everything after a cursor position.
    pub fn since(seq: u64) -> Self {
        Self {
            since_seq: Some(seq),
            ..Self::default()
        }
    }

    /// Query for a single topic.
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Self::default()
        }
    }

    /// Whether a message passes this filter.
    pub fn matches(&self, message: &BusMessage) -> bool {
        if let Some(ref topic) = self.topic {
            if message.topic != *topic {
                return false;
            }
        }
        if let Some(since) = self.since_seq {
            if message.sequence <= since {
                return false;
            }
        }
        if let Some(ref publisher) = self.publisher {
            if message.publisher != *publisher {
                return false;
            }
        }
        true
    }
}
