//! Append-only log for one partition of the in-process broker.

use crate::types::Message;

#[derive(Debug, Default)]
pub struct PartitionLog {
    records: Vec<Message>,
}

impl PartitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, assigning it the next offset.
    pub fn append(&mut self, mut record: Message) -> i64 {
        let offset = self.high_watermark();
        record.offset = offset;
        self.records.push(record);
        offset
    }

    /// Offset the next appended record will receive.
    pub fn high_watermark(&self) -> i64 {
        self.records.len() as i64
    }

    /// Up to `max_records` records starting at `from_offset`.
    pub fn read(&self, from_offset: i64, max_records: usize) -> Vec<Message> {
        if from_offset < 0 || from_offset >= self.high_watermark() {
            return Vec::new();
        }
        self.records
            .iter()
            .skip(from_offset as usize)
            .take(max_records)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: &str) -> Message {
        Message {
            topic: "t".into(),
            partition: 0,
            offset: -1,
            key: None,
            value: value.into(),
            headers: vec![],
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn offsets_are_dense_from_zero() {
        let mut log = PartitionLog::new();
        assert_eq!(log.append(record("a")), 0);
        assert_eq!(log.append(record("b")), 1);
        assert_eq!(log.high_watermark(), 2);

        let read = log.read(0, 10);
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].offset, 1);
        assert_eq!(read[1].value, "b");
    }

    #[test]
    fn read_from_last_offset_returns_only_newest() {
        let mut log = PartitionLog::new();
        for v in ["a", "b", "c"] {
            log.append(record(v));
        }
        let read = log.read(log.high_watermark() - 1, 10);
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].value, "c");
    }

    #[test]
    fn read_out_of_range_is_empty() {
        let log = PartitionLog::new();
        assert!(log.is_empty());
        assert!(log.read(0, 10).is_empty());
        assert!(log.read(-1, 10).is_empty());
    }
}
