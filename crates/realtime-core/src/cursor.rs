use crate::events::EventRecord;

/// Highest event id already delivered for one queue. Never moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorTracker {
    last_event_id: i64,
}

impl CursorTracker {
    pub fn new(last_event_id: i64) -> Self {
        Self { last_event_id }
    }

    pub fn current(&self) -> i64 {
        self.last_event_id
    }

    /// Advance to the highest wire id in `batch`, keeping the current cursor
    /// when the batch holds nothing newer. Records without an id are ignored.
    pub fn advance(&mut self, batch: &[EventRecord]) -> i64 {
        let batch_max = batch.iter().filter_map(EventRecord::wire_id).max();
        if let Some(batch_max) = batch_max {
            self.last_event_id = self.last_event_id.max(batch_max);
        }
        self.last_event_id
    }
}
