//! Day-scoped order numbering.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use crate::domain::value_objects::OrderNumber;
use crate::store::StoreTx;
use crate::Result;

/// Issues `ORD-YYYYMMDD-NNN` numbers from a per-day counter row.
///
/// The counter is advanced by a single atomic statement inside the order
/// transaction, so two checkouts in the same second never share a number.
/// The counter never falls behind the highest number already stored for the
/// day. If the unique index on `order_number` still fires, the transaction
/// fails with a conflict and the retry reads the winner's number and moves past it.
#[derive(Debug, Clone, Copy)]
pub struct OrderSequencer {
    offset: FixedOffset,
}

impl OrderSequencer {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Store-local calendar day containing `now`.
    pub fn local_day(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    pub async fn next(&self, tx: &mut dyn StoreTx, now: DateTime<Utc>) -> Result<OrderNumber> {
        let day = self.local_day(now);
        let seq = tx.next_order_sequence(day).await?;
        Ok(OrderNumber::new(day, seq))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::store::{MemoryStore, Store};

    fn ist() -> OrderSequencer {
        OrderSequencer::new(FixedOffset::east_opt(330 * 60).unwrap())
    }

    #[test]
    fn test_local_day_uses_store_offset() {
        // 20:00 UTC on Jan 1 is already Jan 2 in IST
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 20, 0, 0).unwrap();
        assert_eq!(ist().local_day(now), NaiveDate::from_ymd_opt(2026, 1, 2).unwrap());
        let before_midnight = Utc.with_ymd_and_hms(2026, 1, 1, 18, 29, 59).unwrap();
        assert_eq!(ist().local_day(before_midnight), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    }

    #[tokio::test]
    async fn test_numbers_advance_and_reset_per_day() {
        let store = MemoryStore::new();
        let seq = ist();
        let day1 = Utc.with_ymd_and_hms(2026, 3, 4, 6, 0, 0).unwrap();
        let day2 = day1 + Duration::days(1);

        let mut tx = store.begin().await.unwrap();
        assert_eq!(seq.next(tx.as_mut(), day1).await.unwrap().as_str(), "ORD-20260304-001");
        assert_eq!(seq.next(tx.as_mut(), day1).await.unwrap().as_str(), "ORD-20260304-002");
        assert_eq!(seq.next(tx.as_mut(), day2).await.unwrap().as_str(), "ORD-20260305-001");
        tx.commit().await.unwrap();
    }
}
