//! Request observability
//!
//! Records go through a bounded channel to a background writer. Recording
//! never waits: when the channel is full the record is dropped.

use std::sync::Arc;

use mcproxy_core::{RequestLogRepository, RequestRecord};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone, Default)]
pub struct RequestRecorder {
    tx: Option<mpsc::Sender<RequestRecord>>,
}

impl RequestRecorder {
    /// Start the background writer. It exits once every recorder clone is dropped.
    pub fn spawn(
        repository: Option<Arc<dyn RequestLogRepository>>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<RequestRecord>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                info!(
                    instance_id = %record.instance_id,
                    method = %record.method,
                    tool = record.tool_name.as_deref().unwrap_or("-"),
                    duration_ms = record.duration_ms,
                    request_bytes = record.request_bytes,
                    response_bytes = record.response_bytes,
                    cache_hit = record.cache_hit,
                    error = record.error_code.as_deref().unwrap_or("-"),
                    "[RequestLog] Completed"
                );

                if let Some(repository) = &repository {
                    if let Err(e) = repository.append(&record).await {
                        warn!("[RequestLog] Failed to persist record: {:#}", e);
                    }
                }
            }
            debug!("[RequestLog] Writer stopped");
        });

        (Self { tx: Some(tx) }, handle)
    }

    /// A recorder that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn record(&self, record: RequestRecord) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                debug!(
                    instance_id = %record.instance_id,
                    "[RequestLog] Channel full, dropping record"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("[RequestLog] Writer gone, dropping record");
            }
        }
    }
}
