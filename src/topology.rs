//! Static topology snapshot
//!
//! A point-in-time description of what a bus has seen: channels with their
//! traffic counts and the subscription patterns registered on it. Written as
//! pretty-printed JSON with keys sorted at every level.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::registry::SubscriptionInfo;
use crate::stats::{BusStats, ChannelStats};

/// Snapshot of one bus
#[derive(Debug, Clone, Serialize)]
pub struct Topology {
    /// Transport selector the bus was created with
    pub transport: String,
    /// Traffic per channel
    pub channels: BTreeMap<String, ChannelStats>,
    /// Subscriptions in registration order
    pub subscriptions: Vec<SubscriptionInfo>,
    /// Bus counters
    pub stats: BusStats,
}

/// Render a topology as pretty JSON with sorted keys
pub fn to_json(topology: &Topology) -> Result<String> {
    // Round-trip through Value so struct fields are key-sorted too
    let value = serde_json::to_value(topology)?;
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Write a topology snapshot to `path`, replacing any existing file
pub fn write_topology(topology: &Topology, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let json = to_json(topology)?;

    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(json.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;

    tracing::debug!(
        path = %path.display(),
        channels = topology.channels.len(),
        subscriptions = topology.subscriptions.len(),
        "Topology written"
    );
    Ok(())
}
