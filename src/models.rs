// Data model for the escrow client

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// Display cap for the activity timeline
pub const TIMELINE_CAP: usize = 100;

/// Seller-funded escrow slot tied to a payment identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    pub id: u64,
    pub seller: Address,
    /// UPI id the buyer pays to
    pub payment_id: String,
    pub remaining_amount: U256,
    pub minimum_amount: U256,
}

impl Deposit {
    /// Zero seller marks a slot that was never used
    pub fn is_sentinel(&self) -> bool {
        self.seller == Address::zero()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_amount.is_zero()
    }
}

/// On-ledger intent record, one per buyer address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyerIntent {
    pub buyer: Address,
    pub amount: U256,
    pub timestamp: U256,
    pub claimed: bool,
    pub deposit_id: u64,
}

/// Point-in-time read of ledger state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub deposit_count: u64,
    pub deposits: Vec<Deposit>,
    pub intent: Option<BuyerIntent>,
}

impl Snapshot {
    /// Deposits a buyer can still signal intent against
    pub fn available_deposits(&self) -> Vec<&Deposit> {
        self.deposits
            .iter()
            .filter(|d| !d.is_sentinel() && !d.is_exhausted())
            .collect()
    }

    /// All deposits owned by `seller`, exhausted ones included
    pub fn seller_deposits(&self, seller: Address) -> Vec<&Deposit> {
        self.deposits
            .iter()
            .filter(|d| !d.is_sentinel() && d.seller == seller)
            .collect()
    }

    pub fn deposit(&self, id: u64) -> Option<&Deposit> {
        self.deposits.iter().find(|d| d.id == id && !d.is_sentinel())
    }
}

/// The five event streams emitted by the escrow contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    FundsDeposited,
    BuyerIntent,
    IntentCancelled,
    PaymentClaimed,
    FundsWithdrawn,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::FundsDeposited,
        EventKind::BuyerIntent,
        EventKind::IntentCancelled,
        EventKind::PaymentClaimed,
        EventKind::FundsWithdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::FundsDeposited => "FundsDeposited",
            EventKind::BuyerIntent => "BuyerIntent",
            EventKind::IntentCancelled => "IntentCancelled",
            EventKind::PaymentClaimed => "PaymentClaimed",
            EventKind::FundsWithdrawn => "FundsWithdrawn",
        }
    }
}

/// Type-specific event fields, one case per event kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EventPayload {
    FundsDeposited {
        deposit_id: U256,
        seller: Address,
        payment_id: String,
        remaining_amount: U256,
        minimum_amount: U256,
    },
    BuyerIntent {
        deposit_id: U256,
        buyer: Address,
        amount: U256,
    },
    IntentCancelled {
        buyer: Address,
        deposit_id: U256,
    },
    PaymentClaimed {
        buyer: Address,
        amount: U256,
        payment_transaction_id: String,
    },
    FundsWithdrawn {
        seller: Address,
        deposit_id: U256,
        amount: U256,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::FundsDeposited { .. } => EventKind::FundsDeposited,
            EventPayload::BuyerIntent { .. } => EventKind::BuyerIntent,
            EventPayload::IntentCancelled { .. } => EventKind::IntentCancelled,
            EventPayload::PaymentClaimed { .. } => EventKind::PaymentClaimed,
            EventPayload::FundsWithdrawn { .. } => EventKind::FundsWithdrawn,
        }
    }

    /// Buyer or seller address carried by the event
    pub fn party(&self) -> Address {
        match self {
            EventPayload::FundsDeposited { seller, .. } => *seller,
            EventPayload::BuyerIntent { buyer, .. } => *buyer,
            EventPayload::IntentCancelled { buyer, .. } => *buyer,
            EventPayload::PaymentClaimed { buyer, .. } => *buyer,
            EventPayload::FundsWithdrawn { seller, .. } => *seller,
        }
    }
}

/// Normalized timeline entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub block_number: u64,
    pub tx_hash: H256,
    pub log_index: Option<u64>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl HistoryEvent {
    pub fn involves(&self, address: Address) -> bool {
        self.payload.party() == address
    }
}

/// Raw log as returned by the node, before normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub block_number: u64,
    pub tx_hash: H256,
    pub log_index: Option<u64>,
    pub data: Vec<u8>,
}

/// Locally persisted authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub identity: Address,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// API TYPES
// ============================================================================

/// Query for the activity timeline
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub mine: bool,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    TIMELINE_CAP
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalIntentRequest {
    pub deposit_id: u64,
    /// Token amount as entered, e.g. "1.5"
    pub amount: String,
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub proof: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    pub payment_id: String,
    pub amount: String,
    pub minimum_amount: String,
    pub permit: TransferPermit,
}

/// Pre-authorized token transfer produced by the wallet
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPermit {
    pub token: Address,
    pub amount: U256,
    pub nonce: U256,
    pub deadline: U256,
    pub signature: ethers::types::Bytes,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxSubmitted {
    pub transaction_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn deposit(id: u64, seller: Address, remaining: u64) -> Deposit {
        Deposit {
            id,
            seller,
            payment_id: format!("seller{}@upi", id),
            remaining_amount: U256::from(remaining),
            minimum_amount: U256::from(1),
        }
    }

    #[test]
    fn test_sentinel_excluded_from_all_listings() {
        let snapshot = Snapshot {
            deposit_count: 3,
            deposits: vec![
                deposit(1, Address::zero(), 10),
                deposit(2, Address::repeat_byte(0x22), 10),
                deposit(3, Address::repeat_byte(0x33), 10),
            ],
            intent: None,
        };

        let ids: Vec<u64> = snapshot.available_deposits().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(snapshot.seller_deposits(Address::zero()).is_empty());
        assert!(snapshot.deposit(1).is_none());
    }

    #[test]
    fn test_exhausted_deposit_stays_in_seller_listing() {
        let seller = Address::repeat_byte(0x44);
        let snapshot = Snapshot {
            deposit_count: 2,
            deposits: vec![deposit(1, seller, 0), deposit(2, seller, 5)],
            intent: None,
        };

        let available: Vec<u64> = snapshot.available_deposits().iter().map(|d| d.id).collect();
        assert_eq!(available, vec![2]);
        assert_eq!(snapshot.seller_deposits(seller).len(), 2);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = HistoryEvent {
            block_number: 7,
            tx_hash: H256::repeat_byte(1),
            log_index: Some(0),
            payload: EventPayload::IntentCancelled {
                buyer: Address::repeat_byte(2),
                deposit_id: U256::from(4),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "IntentCancelled");
        assert_eq!(value["blockNumber"], 7);
        assert!(value.get("depositId").is_some());
    }

    // sellers drawn from a small pool so some collide with the zero address
    fn any_deposits() -> impl Strategy<Value = Vec<Deposit>> {
        proptest::collection::vec((0u8..4, 0u64..3), 0..12).prop_map(|slots| {
            slots
                .into_iter()
                .enumerate()
                .map(|(i, (seller, remaining))| {
                    deposit(i as u64 + 1, Address::repeat_byte(seller), remaining)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn test_sentinel_never_listed(deposits in any_deposits(), seller in 0u8..4) {
            let snapshot = Snapshot {
                deposit_count: deposits.len() as u64,
                deposits,
                intent: None,
            };
            let seller = Address::repeat_byte(seller);

            prop_assert!(snapshot.available_deposits().iter().all(|d| !d.is_sentinel()));
            prop_assert!(snapshot.seller_deposits(seller).iter().all(|d| !d.is_sentinel()));
            for d in snapshot.deposits.iter().filter(|d| d.is_sentinel()) {
                prop_assert!(snapshot.deposit(d.id).is_none());
            }
        }

        #[test]
        fn test_exhausted_never_available(deposits in any_deposits()) {
            let snapshot = Snapshot {
                deposit_count: deposits.len() as u64,
                deposits,
                intent: None,
            };
            let available = snapshot.available_deposits();

            prop_assert!(available.iter().all(|d| !d.is_exhausted()));
            let expected = snapshot
                .deposits
                .iter()
                .filter(|d| !d.is_sentinel() && !d.is_exhausted())
                .count();
            prop_assert_eq!(available.len(), expected);

            // exhausted deposits stay in their owner's listing
            for d in snapshot.deposits.iter().filter(|d| !d.is_sentinel()) {
                prop_assert!(snapshot.seller_deposits(d.seller).iter().any(|o| o.id == d.id));
            }
        }
    }
}
