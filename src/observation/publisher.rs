use super::record::{ObservationKind, ObservationRecord};
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Consumer of observation records. Must not block.
pub trait ObservationSink: Send + Sync {
    fn emit(&self, record: ObservationRecord);
}

/// Sink that drops every record
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ObservationSink for NoopSink {
    fn emit(&self, _record: ObservationRecord) {}
}

/// High-throughput broadcast fan-out of observation records
#[derive(Debug, Clone)]
pub struct ObservationPublisher {
    sender: broadcast::Sender<ObservationRecord>,
}

impl ObservationPublisher {
    /// Create a new publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a record to all current subscribers
    pub fn publish(&self, record: ObservationRecord) {
        // send() only fails when nobody is subscribed, which is fine for telemetry
        let _ = self.sender.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObservationRecord> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ObservationPublisher {
    fn default() -> Self {
        Self::new(crate::constants::system::DEFAULT_PUBLISHER_CAPACITY)
    }
}

impl ObservationSink for ObservationPublisher {
    fn emit(&self, record: ObservationRecord) {
        self.publish(record);
    }
}

/// In-memory buffer of every emitted record
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<ObservationRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ObservationRecord> {
        self.records.lock().clone()
    }

    pub fn records_of(&self, kind: ObservationKind) -> Vec<ObservationRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Remove and return everything collected so far
    pub fn drain(&self) -> Vec<ObservationRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl ObservationSink for CollectingSink {
    fn emit(&self, record: ObservationRecord) {
        self.records.lock().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_publisher_delivers_to_subscribers() {
        let publisher = ObservationPublisher::new(16);
        let mut receiver = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        publisher.emit(ObservationRecord::new(
            ObservationKind::Interrupt,
            "interrupt",
            Utc::now(),
        ));

        let record = receiver.recv().await.unwrap();
        assert_eq!(record.kind, ObservationKind::Interrupt);
    }

    #[test]
    fn test_publish_without_subscribers_is_not_an_error() {
        let publisher = ObservationPublisher::default();
        publisher.emit(ObservationRecord::new(ObservationKind::Graph, "graph", Utc::now()));
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn test_collecting_sink_filters_by_kind() {
        let sink = CollectingSink::new();
        sink.emit(ObservationRecord::new(ObservationKind::Graph, "graph", Utc::now()));
        sink.emit(ObservationRecord::new(ObservationKind::Resume, "resume", Utc::now()));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.records_of(ObservationKind::Resume).len(), 1);
        assert_eq!(sink.drain().len(), 2);
        assert!(sink.is_empty());
    }
}
