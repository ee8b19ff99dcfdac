//! Shared chain types for the ingestion pipeline.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

// ─── Block ────────────────────────────────────────────────────────────────────

/// A block header as delivered by the chain data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

// ─── LogEvent ─────────────────────────────────────────────────────────────────

/// An event log emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    /// Contract that emitted the log.
    pub address: Address,
    /// Indexed topics; `topics[0]` is the event signature.
    pub topics: Vec<B256>,
    /// Non-indexed payload.
    #[serde(default)]
    pub data: Bytes,
    /// Position of the log within its block.
    #[serde(default)]
    pub log_index: u32,
    /// Block the log belongs to.
    pub block_number: u64,
    /// Transaction the log belongs to.
    pub transaction_hash: B256,
}

impl LogEvent {
    /// The routing signature of the log, if it has any topics.
    pub fn signature(&self) -> Option<&B256> {
        self.topics.first()
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

/// A mined transaction together with its receipt details and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: B256,
    /// Position of the transaction in its block.
    #[serde(rename = "transactionIndex")]
    pub index: u32,
    pub from: Address,
    /// `None` for contract deployments.
    #[serde(default)]
    pub to: Option<Address>,
    /// Address of the contract created by this transaction, if any.
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub gas_used: u64,
    /// Receipt status, `1` for success.
    #[serde(default)]
    pub status: u8,
    #[serde(default)]
    pub logs: Vec<LogEvent>,
    pub block_number: u64,
    pub block_hash: B256,
}

impl Transaction {
    /// Ordinal index of the transaction; grows with chain time.
    pub fn ordinal(&self) -> u64 {
        trx_ordinal(self.block_number, self.index)
    }

    /// Returns `true` if this transaction deployed a contract.
    pub fn is_deployment(&self) -> bool {
        self.to.is_none() && self.contract_address.is_some()
    }
}

// ─── IngestionEvent ───────────────────────────────────────────────────────────

/// One block + transaction pair pushed by the chain data source.
///
/// Both parts are optional on the wire; an event missing either one is
/// rejected by the transaction dispatcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionEvent {
    #[serde(default)]
    pub block: Option<Block>,
    #[serde(default)]
    pub transaction: Option<Transaction>,
}

impl IngestionEvent {
    pub fn new(block: Block, transaction: Transaction) -> Self {
        Self {
            block: Some(block),
            transaction: Some(transaction),
        }
    }
}

// ─── AccountTouch ─────────────────────────────────────────────────────────────

/// The role an address plays in a touched transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    Wallet,
    Contract,
}

impl std::fmt::Display for AccountRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wallet => write!(f, "wallet"),
            Self::Contract => write!(f, "contract"),
        }
    }
}

/// An address mentioned by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountTouch {
    pub address: Address,
    pub role: AccountRole,
    pub block_number: u64,
    pub timestamp: i64,
    pub transaction_hash: B256,
    /// Set only for contracts created by `transaction_hash`.
    pub deploy_tx_hash: Option<B256>,
}

// ─── Ordinals ─────────────────────────────────────────────────────────────────

/// Ordinal key of a transaction: block number in the high bits, position in
/// the block in the low 14 bits.
pub fn trx_ordinal(block_number: u64, index: u32) -> u64 {
    (block_number << 14) | (u64::from(index) & 0x3fff)
}

/// Ordinal key of a log-derived record: block number in the high 32 bits,
/// the log's position in the block in the low 32 bits.
///
/// `log_index` is unique within a block, so the key is unique chain-wide.
pub fn log_ordinal(block_number: u64, log_index: u32) -> u64 {
    (block_number << 32) | u64::from(log_index)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
