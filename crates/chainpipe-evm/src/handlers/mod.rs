//! Log handlers for SFC staking events and ERC-20 tokens.

pub mod erc20;
pub mod sfc;

pub use erc20::Erc20Handler;
pub use sfc::{SfcEvent, SfcHandler};

use chainpipe_core::error::PipelineError;
use chainpipe_core::handler::HandlerContext;
use chainpipe_core::store::{Document, Filter};
use chainpipe_core::types::{log_ordinal, LogEvent};

/// Primary key of a record derived from `log`.
pub(crate) fn record_key(log: &LogEvent, ctx: &HandlerContext) -> u64 {
    log_ordinal(ctx.block.number, log.log_index)
}

/// Store a log-derived record. Keyed by its ordinal, so a replayed log
/// overwrites instead of duplicating.
pub(crate) async fn save<T: Document>(ctx: &HandlerContext, record: &T) -> Result<(), PipelineError> {
    ctx.store
        .upsert(T::COLLECTION, &Filter::pk(record.pk()), record.to_document()?)
        .await
}

#[cfg(test)]
pub(crate) mod testing {
    use alloy_primitives::{Address, Bytes, B256, U256};
    use chainpipe_core::handler::HandlerContext;
    use chainpipe_core::memory::{MemoryCache, MemoryStore};
    use chainpipe_core::types::{Block, LogEvent, Transaction};
    use std::sync::Arc;

    pub const BLOCK: u64 = 100;
    pub const TRX_INDEX: u32 = 2;

    pub fn context(store: Arc<MemoryStore>) -> HandlerContext {
        let block = Block {
            number: BLOCK,
            hash: B256::repeat_byte(0x10),
            parent_hash: B256::repeat_byte(0x0f),
            timestamp: 1_600_000_000,
        };
        let transaction = Transaction {
            hash: B256::repeat_byte(0xcd),
            index: TRX_INDEX,
            from: Address::repeat_byte(0x11),
            to: Some(Address::repeat_byte(0xfc)),
            contract_address: None,
            value: U256::ZERO,
            gas_used: 50_000,
            status: 1,
            logs: vec![],
            block_number: BLOCK,
            block_hash: block.hash,
        };
        HandlerContext {
            block: Arc::new(block),
            transaction: Arc::new(transaction),
            store,
            cache: Arc::new(MemoryCache::new()),
            chain: "opera".into(),
        }
    }

    /// Build a log; `words` become consecutive 32-byte data words.
    pub fn log(address: Address, log_index: u32, topics: Vec<B256>, words: &[u64]) -> LogEvent {
        let data: Vec<u8> = words
            .iter()
            .flat_map(|w| U256::from(*w).to_be_bytes::<32>())
            .collect();
        LogEvent {
            address,
            topics,
            data: Bytes::from(data),
            log_index,
            block_number: BLOCK,
            transaction_hash: B256::repeat_byte(0xcd),
        }
    }

    pub fn uint_topic(v: u64) -> B256 {
        B256::from(U256::from(v).to_be_bytes::<32>())
    }
}
