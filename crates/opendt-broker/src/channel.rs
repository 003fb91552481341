//! Logical channel descriptors.

/// Retention semantics of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Append-only, retained by time; consumers checkpoint offsets.
    Stream,
    /// Key/value; the broker retains the latest value per key and replays
    /// it to new subscribers.
    Compacted,
}

/// A named logical channel with fixed semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel {
    pub name: &'static str,
    pub kind: ChannelKind,
}

/// Workload messages (tasks + heartbeats) from the replay source.
pub const WORKLOAD: Channel = Channel {
    name: "workload",
    kind: ChannelKind::Stream,
};

/// Measured power samples from the physical datacenter.
pub const POWER: Channel = Channel {
    name: "power",
    kind: ChannelKind::Stream,
};

/// Observed (real) topology snapshots, compacted per datacenter.
pub const TOPOLOGY_OBSERVED: Channel = Channel {
    name: "topology.observed",
    kind: ChannelKind::Compacted,
};

/// Calibrated topology snapshots published by the calibration engine.
pub const TOPOLOGY_CALIBRATED: Channel = Channel {
    name: "topology.calibrated",
    kind: ChannelKind::Compacted,
};

/// Per-window simulation reports for downstream consumers.
pub const RESULTS: Channel = Channel {
    name: "results",
    kind: ChannelKind::Stream,
};
