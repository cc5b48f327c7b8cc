// Buyer intent state machine
//
// NoIntent --signal--> Active --cancel--> NoIntent
//                      Active --claim---> Claimed --signal--> Active

use ethers::types::U256;
use serde::Serialize;
use tracing::{debug, info};

use crate::models::BuyerIntent;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all_fields = "camelCase")]
pub enum IntentState {
    #[default]
    NoIntent,
    Active {
        deposit_id: u64,
        amount: U256,
        timestamp: U256,
    },
    Claimed {
        deposit_id: u64,
        amount: U256,
        timestamp: U256,
    },
}

impl IntentState {
    /// Derive the state from the ledger's intent record
    pub fn derive(intent: Option<&BuyerIntent>) -> Self {
        match intent {
            None => IntentState::NoIntent,
            Some(i) if i.amount.is_zero() => IntentState::NoIntent,
            Some(i) if i.claimed => IntentState::Claimed {
                deposit_id: i.deposit_id,
                amount: i.amount,
                timestamp: i.timestamp,
            },
            Some(i) => IntentState::Active {
                deposit_id: i.deposit_id,
                amount: i.amount,
                timestamp: i.timestamp,
            },
        }
    }

    /// A new intent may be signalled unless an unclaimed one exists
    pub fn can_signal_intent(&self) -> bool {
        matches!(self, IntentState::NoIntent | IntentState::Claimed { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(self, IntentState::Active { .. })
    }
}

/// Local intent view: the last accepted state plus an optimistic claim marker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentTracker {
    state: IntentState,
    pending_claim: bool,
}

impl IntentTracker {
    pub fn state(&self) -> &IntentState {
        &self.state
    }

    pub fn pending_claim(&self) -> bool {
        self.pending_claim
    }

    /// Optimistically move Active to Claimed after a claim was submitted
    pub fn mark_claimed(&mut self) -> bool {
        match self.state {
            IntentState::Active {
                deposit_id,
                amount,
                timestamp,
            } => {
                self.state = IntentState::Claimed {
                    deposit_id,
                    amount,
                    timestamp,
                };
                self.pending_claim = true;
                info!("Intent on deposit {} marked claimed pending confirmation", deposit_id);
                true
            }
            _ => false,
        }
    }

    /// Apply a freshly read state. Returns false when the read was discarded.
    ///
    /// While a claim is pending, a read showing the same intent still Active is
    /// stale and must not regress the local state.
    pub fn reconcile(&mut self, fresh: IntentState) -> bool {
        if self.pending_claim {
            if let (
                IntentState::Claimed {
                    deposit_id,
                    amount,
                    timestamp,
                },
                IntentState::Active {
                    deposit_id: d,
                    amount: a,
                    timestamp: t,
                },
            ) = (&self.state, &fresh)
            {
                if deposit_id == d && amount == a && timestamp == t {
                    debug!("Discarding stale intent read for deposit {}", d);
                    return false;
                }
            }
        }
        self.state = fresh;
        self.pending_claim = false;
        true
    }

    /// Undo an optimistic claim whose transaction did not go through
    pub fn rollback_claim(&mut self) -> bool {
        if !self.pending_claim {
            return false;
        }
        if let IntentState::Claimed {
            deposit_id,
            amount,
            timestamp,
        } = self.state
        {
            self.state = IntentState::Active {
                deposit_id,
                amount,
                timestamp,
            };
            info!("Claim on deposit {} did not land, intent is active again", deposit_id);
        }
        self.pending_claim = false;
        true
    }

    pub fn reset(&mut self) {
        *self = IntentTracker::default();
    }
}
