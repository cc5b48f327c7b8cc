// Point-in-time snapshot reads of the escrow ledger

use ethers::types::Address;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::escrow::EscrowLedger;
use crate::models::Snapshot;

/// Highest deposit id read per snapshot
pub const MAX_DEPOSIT_SCAN: u64 = 10;

pub struct LedgerReader {
    ledger: Arc<dyn EscrowLedger>,
    max_deposit_id: u64,
}

impl LedgerReader {
    pub fn new(ledger: Arc<dyn EscrowLedger>) -> Self {
        Self {
            ledger,
            max_deposit_id: MAX_DEPOSIT_SCAN,
        }
    }

    /// Read the counter, deposits `1..=min(count, cap)` and the identity's intent.
    ///
    /// A failed deposit read drops that id from the result. A failed counter or
    /// intent read fails the whole snapshot; callers keep their previous one.
    pub async fn read_snapshot(&self, identity: Option<Address>) -> Result<Snapshot, LedgerError> {
        let deposit_count = self.ledger.deposit_count().await?;
        let last_id = deposit_count.min(self.max_deposit_id);

        let mut deposits = Vec::with_capacity(last_id as usize);
        for deposit_id in 1..=last_id {
            match self.ledger.deposit(deposit_id).await {
                Ok(deposit) if deposit.is_sentinel() => {
                    debug!("Deposit {} is an unused slot", deposit_id);
                }
                Ok(deposit) => deposits.push(deposit),
                Err(e) => warn!("Skipping deposit {}: {}", deposit_id, e),
            }
        }

        let intent = match identity {
            Some(buyer) => Some(self.ledger.intent_of(buyer).await?),
            None => None,
        };

        Ok(Snapshot {
            deposit_count,
            deposits,
            intent,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::{deposit, FakeLedger};
    use super::*;
    use crate::intent::IntentState;
    use ethers::types::U256;

    fn reader(ledger: FakeLedger) -> LedgerReader {
        LedgerReader::new(Arc::new(ledger))
    }

    #[tokio::test]
    async fn test_zero_seller_slot_is_excluded() {
        let mut ledger = FakeLedger {
            deposit_count: Some(3),
            ..Default::default()
        };
        ledger.deposits.insert(1, deposit(1, Address::zero(), 0));
        ledger.deposits.insert(2, deposit(2, Address::repeat_byte(2), 10));
        ledger.deposits.insert(3, deposit(3, Address::repeat_byte(3), 10));

        let snapshot = reader(ledger).read_snapshot(None).await.unwrap();
        let ids: Vec<u64> = snapshot.available_deposits().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_failed_deposit_read_is_isolated() {
        let mut ledger = FakeLedger {
            deposit_count: Some(3),
            ..Default::default()
        };
        for id in 1..=3 {
            ledger.deposits.insert(id, deposit(id, Address::repeat_byte(id as u8), 5));
        }
        ledger.failing_deposits.insert(2);

        let snapshot = reader(ledger).read_snapshot(None).await.unwrap();
        let ids: Vec<u64> = snapshot.deposits.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(snapshot.deposit_count, 3);
    }

    #[tokio::test]
    async fn test_scan_is_capped() {
        let mut ledger = FakeLedger {
            deposit_count: Some(25),
            ..Default::default()
        };
        for id in 1..=25 {
            ledger.deposits.insert(id, deposit(id, Address::repeat_byte(1), 5));
        }

        let snapshot = reader(ledger).read_snapshot(None).await.unwrap();
        assert_eq!(snapshot.deposits.len(), MAX_DEPOSIT_SCAN as usize);
        assert_eq!(snapshot.deposit_count, 25);
    }

    #[tokio::test]
    async fn test_counter_failure_fails_snapshot() {
        let ledger = FakeLedger::default();
        assert!(reader(ledger).read_snapshot(None).await.is_err());
    }

    #[tokio::test]
    async fn test_intent_failure_fails_snapshot() {
        let ledger = FakeLedger {
            deposit_count: Some(0),
            fail_intent: true,
            ..Default::default()
        };
        let result = reader(ledger)
            .read_snapshot(Some(Address::repeat_byte(7)))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_anonymous_snapshot_has_no_intent() {
        let ledger = FakeLedger {
            deposit_count: Some(0),
            fail_intent: true,
            ..Default::default()
        };
        let snapshot = reader(ledger).read_snapshot(None).await.unwrap();
        assert_eq!(IntentState::derive(snapshot.intent.as_ref()), IntentState::NoIntent);
    }

    #[tokio::test]
    async fn test_zero_amount_intent_reads_as_no_intent() {
        let buyer = Address::repeat_byte(7);
        let ledger = FakeLedger {
            deposit_count: Some(0),
            ..Default::default()
        };
        let snapshot = reader(ledger).read_snapshot(Some(buyer)).await.unwrap();
        let intent = snapshot.intent.as_ref().unwrap();
        assert_eq!(intent.amount, U256::zero());
        let state = IntentState::derive(Some(intent));
        assert_eq!(state, IntentState::NoIntent);
        assert!(state.can_signal_intent());
    }
}
