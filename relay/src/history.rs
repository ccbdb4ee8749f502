use crate::model::{AggregateStatistics, TelemetryRecord};
use std::collections::VecDeque;
use std::num::NonZeroUsize;

/// Fixed-capacity, insertion-ordered record store. The oldest record is
/// evicted when a push would exceed capacity.
#[derive(Debug, Clone)]
pub struct History {
    records: VecDeque<TelemetryRecord>,
    capacity: NonZeroUsize,
}

impl History {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.get()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the evicted record, if any.
    pub fn push(&mut self, record: TelemetryRecord) -> Option<TelemetryRecord> {
        let evicted = if self.records.len() >= self.capacity.get() {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        evicted
    }

    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.records.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TelemetryRecord> {
        self.records.iter()
    }

    pub fn to_vec(&self) -> Vec<TelemetryRecord> {
        self.records.iter().cloned().collect()
    }

    /// The most recent `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<TelemetryRecord> {
        let skip = self.records.len().saturating_sub(limit);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn statistics(&self) -> AggregateStatistics {
        let mut iter = self.records.iter().map(|r| r.temperature);
        let Some(first) = iter.next() else {
            return AggregateStatistics::default();
        };

        let (mut min, mut max, mut sum, mut count) = (first, first, first, 1usize);
        for temp in iter {
            min = min.min(temp);
            max = max.max(temp);
            sum += temp;
            count += 1;
        }

        AggregateStatistics {
            count,
            min,
            max,
            mean: sum / count as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::Rng;
    use telemetry_protocol::OperatingMode;

    fn record(temperature: f64, timestamp: u64) -> TelemetryRecord {
        TelemetryRecord {
            vin: "VIN1".to_string(),
            temperature,
            mileage: timestamp,
            state: OperatingMode::Normal,
            dtc: None,
            timestamp,
            signature: "00".to_string(),
            received_at: Utc::now(),
        }
    }

    fn history(capacity: usize) -> History {
        History::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let mut h = history(5);
        let mut evicted = 0;
        for i in 0..13 {
            if h.push(record(20.0, i)).is_some() {
                evicted += 1;
            }
        }

        assert_eq!(h.len(), 5);
        assert_eq!(evicted, 8);
        let kept: Vec<u64> = h.iter().map(|r| r.timestamp).collect();
        assert_eq!(kept, vec![8, 9, 10, 11, 12]);
        assert_eq!(h.latest().unwrap().timestamp, 12);
    }

    #[test]
    fn test_capacity_one() {
        let mut h = history(1);
        assert!(h.push(record(1.0, 1)).is_none());
        assert_eq!(h.push(record(2.0, 2)).unwrap().timestamp, 1);
        assert_eq!(h.to_vec().len(), 1);
    }

    #[test]
    fn test_recent() {
        let mut h = history(10);
        for i in 0..4 {
            h.push(record(20.0, i));
        }
        let recent: Vec<u64> = h.recent(2).iter().map(|r| r.timestamp).collect();
        assert_eq!(recent, vec![2, 3]);
        assert_eq!(h.recent(100).len(), 4);
    }

    #[test]
    fn test_empty_statistics_are_zero() {
        let h = history(3);
        assert!(h.is_empty());
        assert!(h.latest().is_none());
        assert_eq!(
            h.statistics(),
            AggregateStatistics {
                count: 0,
                min: 0.0,
                max: 0.0,
                mean: 0.0
            }
        );
    }

    #[test]
    fn test_statistics() {
        let mut h = history(10);
        for (i, t) in [20.0, 35.0, 45.0, 28.0].into_iter().enumerate() {
            h.push(record(t, i as u64));
        }
        let stats = h.statistics();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min, 20.0);
        assert_eq!(stats.max, 45.0);
        assert!((stats.mean - 32.0).abs() < 1e-9);
    }

    #[test]
    fn test_statistics_cover_only_retained_records() {
        let mut rng = rand::thread_rng();
        let mut h = history(16);
        let mut all = Vec::new();
        for i in 0..100 {
            let t = rng.gen_range(-10.0..60.0);
            all.push(t);
            h.push(record(t, i));
        }

        let window = &all[all.len() - 16..];
        let stats = h.statistics();
        let min = window.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = window.iter().sum::<f64>() / window.len() as f64;

        assert_eq!(stats.count, 16);
        assert_eq!(stats.min, min);
        assert_eq!(stats.max, max);
        assert!((stats.mean - mean).abs() < 1e-9);
    }
}
