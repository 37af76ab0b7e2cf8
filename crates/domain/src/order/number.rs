//! Human-readable order numbers.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use rand::Rng;

const SEQUENCE_MODULUS: u32 = 1_000_000;

/// Generates order numbers of the form `ORD-20241220-143052-000042-9F1C`.
///
/// The timestamp keeps numbers sortable and readable. The per-process
/// sequence makes numbers from one process distinct within a second, and
/// the random suffix separates numbers from different processes. Stores
/// still check the number against existing orders before inserting it.
#[derive(Debug)]
pub struct OrderNumberGenerator {
    prefix: String,
    sequence: AtomicU32,
}

impl OrderNumberGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sequence: AtomicU32::new(0),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Produces the next order number for the current time.
    pub fn next(&self) -> String {
        self.next_at(Utc::now())
    }

    /// Produces the next order number for the given time.
    pub fn next_at(&self, now: DateTime<Utc>) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) % SEQUENCE_MODULUS;
        let suffix: u16 = rand::thread_rng().gen_range(0..=u16::MAX);
        format!(
            "{}-{}-{:06}-{:04X}",
            self.prefix,
            now.format("%Y%m%d-%H%M%S"),
            sequence,
            suffix
        )
    }
}

impl Default for OrderNumberGenerator {
    fn default() -> Self {
        Self::new("ORD")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn format_includes_prefix_timestamp_sequence_and_suffix() {
        let generator = OrderNumberGenerator::new("INJ");
        let at = Utc.with_ymd_and_hms(2024, 12, 20, 14, 30, 52).unwrap();
        let number = generator.next_at(at);

        assert!(number.starts_with("INJ-20241220-143052-000000-"));
        assert_eq!(number.len(), "INJ-20241220-143052-000000-ABCD".len());
    }

    #[test]
    fn numbers_generated_in_the_same_second_are_distinct() {
        let generator = OrderNumberGenerator::default();
        let at = Utc::now();
        let numbers: HashSet<String> = (0..10_000).map(|_| generator.next_at(at)).collect();
        assert_eq!(numbers.len(), 10_000);
    }

    #[test]
    fn concurrent_generation_never_repeats() {
        let generator = std::sync::Arc::new(OrderNumberGenerator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || (0..500).map(|_| generator.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for number in handle.join().unwrap() {
                assert!(seen.insert(number), "duplicate order number");
            }
        }
    }
}
