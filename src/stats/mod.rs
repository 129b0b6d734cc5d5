//! Bus statistics

pub mod metrics;

pub use metrics::{BusCounters, BusStats, ChannelStats, ChannelTable};
