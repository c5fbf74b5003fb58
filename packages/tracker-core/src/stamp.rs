//! Change stamps: the causal-ordering token attached to every content location update.
//!
//! Ordering is defined as: sequence number first, then timestamp, then operation
//! rank (`Delete` ranks above `Add`, so a delete wins a tie). This mirrors the
//! teacher's `Timestamp` ordering in spirit (millis, then counter, then node id)
//! but keys on an explicit per-(machine, hash) sequence number instead of a
//! logical counter, since the tracker's causality unit is "one mutation by one
//! machine to one hash", not "one event on one node".

use std::cmp::Ordering as CmpOrdering;

use serde::{Deserialize, Serialize};

/// The kind of mutation a change stamp records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Add,
    Delete,
}

impl Operation {
    /// Rank used as the final tie-breaker in [`ChangeStamp`] ordering.
    /// `Delete` outranks `Add` so that deletes win when two stamps are
    /// otherwise identical.
    fn rank(self) -> u8 {
        match self {
            Operation::Add => 0,
            Operation::Delete => 1,
        }
    }
}

/// A causal token disambiguating concurrent writes to the same (machine, hash) pair.
///
/// `sequence_number` is per-(machine, hash), monotonically increasing, minted
/// by [`crate::clock::ClockSource`]-timestamped local mutations. Two stamps
/// compare by `(sequence_number, timestamp_millis, operation rank)` in that
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeStamp {
    pub sequence_number: u64,
    pub timestamp_millis: i64,
    pub operation: Operation,
}

impl ChangeStamp {
    #[must_use]
    pub fn new(sequence_number: u64, timestamp_millis: i64, operation: Operation) -> Self {
        Self {
            sequence_number,
            timestamp_millis,
            operation,
        }
    }
}

impl Ord for ChangeStamp {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.sequence_number
            .cmp(&other.sequence_number)
            .then_with(|| self.timestamp_millis.cmp(&other.timestamp_millis))
            .then_with(|| self.operation.rank().cmp(&other.operation.rank()))
    }
}

impl PartialOrd for ChangeStamp {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// A value paired with the change stamp that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamped<T> {
    pub stamp: ChangeStamp,
    pub value: T,
}

impl<T> Stamped<T> {
    #[must_use]
    pub fn new(stamp: ChangeStamp, value: T) -> Self {
        Self { stamp, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(seq: u64, ts: i64, op: Operation) -> ChangeStamp {
        ChangeStamp::new(seq, ts, op)
    }

    #[test]
    fn orders_by_sequence_number_first() {
        let a = stamp(1, 100, Operation::Delete);
        let b = stamp(2, 0, Operation::Add);
        assert!(a < b);
    }

    #[test]
    fn orders_by_timestamp_second() {
        let a = stamp(1, 100, Operation::Delete);
        let b = stamp(1, 200, Operation::Add);
        assert!(a < b);
    }

    #[test]
    fn delete_wins_tie() {
        let add = stamp(1, 100, Operation::Add);
        let delete = stamp(1, 100, Operation::Delete);
        assert!(add < delete);
    }

    #[test]
    fn equal_stamps_compare_equal() {
        let a = stamp(5, 50, Operation::Add);
        let b = stamp(5, 50, Operation::Add);
        assert_eq!(a.cmp(&b), CmpOrdering::Equal);
    }

    #[test]
    fn serde_roundtrip() {
        let s = Stamped::new(stamp(3, 10, Operation::Delete), 42u32);
        let bytes = rmp_serde::to_vec(&s).unwrap();
        let decoded: Stamped<u32> = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(s, decoded);
    }
}
