//! Bounded worker pool in front of the pipeline.
//!
//! Intake never waits: every submitted message gets its own task right away,
//! and the task queues on a semaphore until one of `MAX_CONCURRENT_DOWNLOADS`
//! slots frees up. Requests share nothing but the immutable [`Pipeline`].

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::download::artifact::RequesterId;
use crate::download::error::PipelineError;
use crate::download::pipeline::{DeliveryReport, Pipeline};

pub type RequestHandle = JoinHandle<Option<Result<DeliveryReport, PipelineError>>>;

#[derive(Clone)]
pub struct DownloadQueue {
    pipeline: Arc<Pipeline>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl DownloadQueue {
    pub fn new(pipeline: Arc<Pipeline>, max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        Self {
            pipeline,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Spawns the pipeline for one message.
    ///
    /// The handle resolves to `None` only if the pool was shut down before the
    /// request got a slot.
    pub fn submit(&self, text: String, requester: RequesterId) -> RequestHandle {
        let pipeline = Arc::clone(&self.pipeline);
        let slots = Arc::clone(&self.slots);

        tokio::spawn(async move {
            let _permit = match slots.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    log::warn!("Worker pool closed, dropping request from {}", requester);
                    return None;
                }
            };
            Some(pipeline.handle_message(&text, requester).await)
        })
    }

    /// Number of idle workers.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stops handing out slots; queued requests resolve to `None`.
    pub fn close(&self) {
        self.slots.close();
    }
}
