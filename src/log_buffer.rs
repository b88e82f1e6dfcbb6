use crate::log_entry::LogRecord;
use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 500;

/// Newest-first list of records backing the rendered table.
///
/// Eviction is by age only: once full, every `prepend` drops the oldest
/// record off the back.
#[derive(Debug)]
pub struct LogBuffer {
    entries: VecDeque<LogRecord>,
    max_size: usize,
}

impl LogBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_size.min(DEFAULT_CAPACITY)),
            max_size,
        }
    }

    /// Swaps in a freshly loaded history, already ordered newest-first.
    pub fn replace(&mut self, records: Vec<LogRecord>) {
        self.entries = records.into();
        self.entries.truncate(self.max_size);
    }

    pub fn prepend(&mut self, record: LogRecord) {
        self.entries.push_front(record);
        self.entries.truncate(self.max_size);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.iter().cloned().collect()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
