//! Tool aggregation, call routing and request observability

mod aggregator;
mod observability;

pub use aggregator::{ToolsAggregator, ToolsList};
pub use observability::{RequestRecorder, DEFAULT_CAPACITY as RECORDER_CAPACITY};
