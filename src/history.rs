// Activity timeline built from the five escrow event streams

use ethers::types::Address;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{info, warn};

use crate::abi;
use crate::error::LedgerError;
use crate::escrow::EscrowLedger;
use crate::models::{EventKind, HistoryEvent, RawLog};

pub const DEFAULT_WINDOW_BLOCKS: u64 = 150_000;

pub struct HistoryAggregator {
    ledger: Arc<dyn EscrowLedger>,
    window_blocks: u64,
}

impl HistoryAggregator {
    pub fn new(ledger: Arc<dyn EscrowLedger>, window_blocks: u64) -> Self {
        Self {
            ledger,
            window_blocks,
        }
    }

    /// Merged timeline over the last `window_blocks` blocks, newest first.
    ///
    /// Any failing stream abandons the whole pass and yields an empty timeline.
    pub async fn fetch_history(&self) -> Vec<HistoryEvent> {
        match self.try_fetch_history().await {
            Ok(events) => {
                info!("Fetched {} history events", events.len());
                events
            }
            Err(e) => {
                warn!("History fetch failed, discarding timeline: {}", e);
                Vec::new()
            }
        }
    }

    async fn try_fetch_history(&self) -> Result<Vec<HistoryEvent>, LedgerError> {
        let head = self.ledger.block_number().await?;
        let from_block = head.saturating_sub(self.window_blocks);

        let streams = EventKind::ALL.iter().map(|kind| {
            let ledger = self.ledger.clone();
            let kind = *kind;
            async move {
                let logs = ledger.logs(kind, from_block, head).await?;
                logs.into_iter()
                    .map(|log| normalize(kind, log))
                    .collect::<Result<Vec<_>, _>>()
            }
        });
        let results = try_join_all(streams).await?;

        Ok(merge(results))
    }
}

fn normalize(kind: EventKind, log: RawLog) -> Result<HistoryEvent, LedgerError> {
    Ok(HistoryEvent {
        block_number: log.block_number,
        tx_hash: log.tx_hash,
        log_index: log.log_index,
        payload: abi::decode_event(kind, &log.data)?,
    })
}

/// Concatenate the streams and order by block, then log index, descending
pub fn merge(streams: Vec<Vec<HistoryEvent>>) -> Vec<HistoryEvent> {
    let mut events: Vec<HistoryEvent> = streams.into_iter().flatten().collect();
    events.sort_by(|a, b| {
        b.block_number
            .cmp(&a.block_number)
            .then_with(|| b.log_index.cmp(&a.log_index))
    });
    events
}

/// Optionally keep only events touching `mine`, then truncate to `limit`
pub fn timeline_view(
    events: &[HistoryEvent],
    mine: Option<Address>,
    limit: usize,
) -> Vec<HistoryEvent> {
    events
        .iter()
        .filter(|e| mine.map_or(true, |address| e.involves(address)))
        .take(limit)
        .cloned()
        .collect()
}
