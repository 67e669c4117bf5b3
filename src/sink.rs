//! Result sinks.
//!
//! The loop's only contract with the display layer is "replace what you show
//! with this batch". Sinks get no say in scheduling and send nothing back.

use std::sync::{Arc, Mutex, PoisonError};

use crate::detect::DetectionBatch;

/// Receiver of published detection batches.
pub trait ResultSink: Send + Sync {
    fn publish(&self, batch: DetectionBatch);
}

impl<F> ResultSink for F
where
    F: Fn(DetectionBatch) + Send + Sync,
{
    fn publish(&self, batch: DetectionBatch) {
        self(batch)
    }
}

/// Latest-result slot read by the display layer.
///
/// Holds exactly one batch; each publish replaces it wholesale. Clones share
/// the same slot.
#[derive(Clone, Default)]
pub struct LatestBatch {
    inner: Arc<Mutex<Slot>>,
}

#[derive(Default)]
struct Slot {
    batch: Option<DetectionBatch>,
    publish_count: u64,
}

impl LatestBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The batch currently on display, if any has been published.
    pub fn latest(&self) -> Option<DetectionBatch> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .batch
            .clone()
    }

    /// Number of batches published so far.
    pub fn publish_count(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .publish_count
    }

    /// Drop the displayed batch (screen teardown).
    pub fn clear(&self) {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        slot.batch = None;
    }
}

impl ResultSink for LatestBatch {
    fn publish(&self, batch: DetectionBatch) {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        slot.batch = Some(batch);
        slot.publish_count += 1;
    }
}

/// Logs a one-line summary per batch.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn publish(&self, batch: DetectionBatch) {
        if batch.is_empty() {
            log::debug!("frame #{}: nothing detected", batch.frame_seq);
            return;
        }
        let labels: Vec<String> = batch
            .detections
            .iter()
            .map(crate::overlay::label_for)
            .collect();
        log::info!("frame #{}: {}", batch.frame_seq, labels.join(", "));
    }
}

/// Forwards every batch to each inner sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ResultSink for FanoutSink {
    fn publish(&self, batch: DetectionBatch) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.publish(batch.clone());
            }
            last.publish(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(seq: u64) -> DetectionBatch {
        DetectionBatch {
            frame_seq: seq,
            ..DetectionBatch::default()
        }
    }

    #[test]
    fn latest_batch_replaces_wholesale() {
        let slot = LatestBatch::new();
        assert!(slot.latest().is_none());

        slot.publish(batch(1));
        slot.publish(batch(2));
        assert_eq!(slot.latest().unwrap().frame_seq, 2);
        assert_eq!(slot.publish_count(), 2);

        slot.clear();
        assert!(slot.latest().is_none());
        assert_eq!(slot.publish_count(), 2);
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = LatestBatch::new();
        let b = LatestBatch::new();
        let fanout = FanoutSink::new()
            .with(Arc::new(a.clone()))
            .with(Arc::new(b.clone()));
        fanout.publish(batch(7));
        assert_eq!(a.latest().unwrap().frame_seq, 7);
        assert_eq!(b.latest().unwrap().frame_seq, 7);
    }
}
