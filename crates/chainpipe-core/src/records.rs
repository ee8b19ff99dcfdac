//! Stored record types.
//!
//! Every record lives in its own collection and is keyed by an ordinal that
//! grows with chain time, so each collection can be browsed with the
//! pagination engine.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::store::Document;
use crate::types::{AccountRole, Block, Transaction};

// ─── Transactions ─────────────────────────────────────────────────────────────

/// A committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(rename = "_id")]
    pub pk: u64,
    pub hash: B256,
    pub block_number: u64,
    pub block_hash: B256,
    pub timestamp: i64,
    pub index: u32,
    pub from: Address,
    pub to: Option<Address>,
    pub contract_address: Option<Address>,
    pub value: U256,
    pub gas_used: u64,
    pub status: u8,
    /// Every address the transaction touched, for per-account listing.
    pub participants: Vec<Address>,
    pub logs_count: u32,
}

impl TransactionRecord {
    pub fn new(block: &Block, trx: &Transaction) -> Self {
        let mut participants = vec![trx.from];
        participants.extend(trx.to);
        participants.extend(trx.contract_address);
        participants.dedup();

        Self {
            pk: trx.ordinal(),
            hash: trx.hash,
            block_number: block.number,
            block_hash: block.hash,
            timestamp: block.timestamp,
            index: trx.index,
            from: trx.from,
            to: trx.to,
            contract_address: trx.contract_address,
            value: trx.value,
            gas_used: trx.gas_used,
            status: trx.status,
            participants,
            logs_count: trx.logs.len() as u32,
        }
    }
}

impl Document for TransactionRecord {
    const COLLECTION: &'static str = "transactions";
    fn pk(&self) -> u64 {
        self.pk
    }
}

// ─── Accounts ─────────────────────────────────────────────────────────────────

/// A known account, keyed by the ordinal of the transaction it first
/// appeared in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    #[serde(rename = "_id")]
    pub pk: u64,
    pub address: Address,
    pub role: AccountRole,
    pub first_block: u64,
    pub first_trx: B256,
    /// Set for contracts deployed by a known transaction.
    pub deploy_trx: Option<B256>,
    pub last_block: u64,
    pub last_activity: i64,
    pub trx_count: u64,
}

impl Document for AccountRecord {
    const COLLECTION: &'static str = "accounts";
    fn pk(&self) -> u64 {
        self.pk
    }
}

// ─── Staking ──────────────────────────────────────────────────────────────────

/// Stake delegated by an address to a validator, keyed by the log that
/// opened the position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRecord {
    #[serde(rename = "_id")]
    pub pk: u64,
    pub address: Address,
    pub to_validator: U256,
    /// Sum of every delegation to the validator.
    pub amount: U256,
    pub created_block: u64,
    pub created_time: i64,
    pub created_trx: B256,
    /// Log ordinals of every delegation already added to `amount`.
    #[serde(default)]
    pub applied: Vec<u64>,
}

impl Document for DelegationRecord {
    const COLLECTION: &'static str = "delegations";
    fn pk(&self) -> u64 {
        self.pk
    }
}

/// A pending or finished undelegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequestRecord {
    #[serde(rename = "_id")]
    pub pk: u64,
    pub request_id: U256,
    pub address: Address,
    pub to_validator: U256,
    pub amount: U256,
    pub created_time: i64,
    pub created_trx: B256,
    pub withdrawn_time: Option<i64>,
    pub withdrawn_trx: Option<B256>,
}

impl Document for WithdrawRequestRecord {
    const COLLECTION: &'static str = "withdrawals";
    fn pk(&self) -> u64 {
        self.pk
    }
}

/// A claimed (or restaked) staking reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardClaimRecord {
    #[serde(rename = "_id")]
    pub pk: u64,
    pub address: Address,
    pub to_validator: U256,
    pub amount: U256,
    pub claimed_time: i64,
    pub claim_trx: B256,
    pub restaked: bool,
}

impl Document for RewardClaimRecord {
    const COLLECTION: &'static str = "reward_claims";
    fn pk(&self) -> u64 {
        self.pk
    }
}

// ─── Tokens ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenTransactionKind {
    Transfer,
    Approval,
}

/// An ERC-20 transfer or approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransactionRecord {
    #[serde(rename = "_id")]
    pub pk: u64,
    pub token: Address,
    pub kind: TokenTransactionKind,
    pub sender: Address,
    pub recipient: Address,
    pub amount: U256,
    pub trx: B256,
    pub block_number: u64,
    pub timestamp: i64,
    /// Sender and recipient, for per-account listing.
    pub participants: Vec<Address>,
}

impl Document for TokenTransactionRecord {
    const COLLECTION: &'static str = "erc20_transactions";
    fn pk(&self) -> u64 {
        self.pk
    }
}
