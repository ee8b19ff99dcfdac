//! Account registry fan-out and the account dispatcher.
//!
//! [`derive_touches`] turns a transaction into the set of addresses it
//! mentions. The transaction dispatcher queues one [`AccountWork`] per touch;
//! the [`AccountDispatcher`] keeps the `accounts` collection current and
//! returns each work item's ticket.

use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::barrier::Ticket;
use crate::error::PipelineError;
use crate::records::AccountRecord;
use crate::stats::PipelineStats;
use crate::store::{Document, Filter, FindOptions, PersistentStore};
use crate::types::{AccountRole, AccountTouch, Block, Transaction};

/// Derive the account touches of a transaction.
///
/// Always yields the sender, then the recipient if present, then the created
/// contract if present. Each address appears once.
pub fn derive_touches(block: &Block, trx: &Transaction) -> Vec<AccountTouch> {
    let touch = |address, role, deploy_tx_hash| AccountTouch {
        address,
        role,
        block_number: block.number,
        timestamp: block.timestamp,
        transaction_hash: trx.hash,
        deploy_tx_hash,
    };

    let mut touches = vec![touch(trx.from, AccountRole::Wallet, None)];
    if let Some(to) = trx.to.filter(|to| *to != trx.from) {
        touches.push(touch(to, AccountRole::Wallet, None));
    }
    if let Some(contract) = trx.contract_address {
        touches.retain(|t| t.address != contract);
        touches.push(touch(contract, AccountRole::Contract, Some(trx.hash)));
    }
    touches
}

/// One account touch travelling through the account queue.
#[derive(Debug)]
pub struct AccountWork {
    pub touch: AccountTouch,
    /// Primary key to use if the account is new.
    pub first_seen: u64,
    pub ticket: Ticket,
}

/// Consumes the account queue and maintains account records.
pub struct AccountDispatcher {
    store: Arc<dyn PersistentStore>,
    stats: Arc<PipelineStats>,
    queue: mpsc::Receiver<AccountWork>,
}

impl AccountDispatcher {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        stats: Arc<PipelineStats>,
        queue: mpsc::Receiver<AccountWork>,
    ) -> Self {
        Self { store, stats, queue }
    }

    /// Drain the queue until every sender is gone.
    pub async fn run(mut self) {
        info!("account dispatcher is running");
        while let Some(work) = self.queue.recv().await {
            PipelineStats::bump(&self.stats.touches);
            if let Err(e) = register(self.store.as_ref(), &work.touch, work.first_seen).await {
                error!(address = %work.touch.address, error = %e, "can not register account");
            }
            work.ticket.complete();
        }
        info!("account dispatcher is closed");
    }
}

/// Insert a new account or refresh the activity of a known one.
pub async fn register(
    store: &dyn PersistentStore,
    touch: &AccountTouch,
    first_seen: u64,
) -> Result<(), PipelineError> {
    let filter = Filter::new().eq("address", touch.address);
    let known = store
        .find(AccountRecord::COLLECTION, &filter, &FindOptions::new().limit(1))
        .await?
        .into_iter()
        .next()
        .map(AccountRecord::from_document)
        .transpose()?;

    match known {
        None => {
            debug!(address = %touch.address, role = %touch.role, "new account found");
            let rec = AccountRecord {
                pk: first_seen,
                address: touch.address,
                role: touch.role,
                first_block: touch.block_number,
                first_trx: touch.transaction_hash,
                deploy_trx: touch.deploy_tx_hash,
                last_block: touch.block_number,
                last_activity: touch.timestamp,
                trx_count: 1,
            };
            store.insert(AccountRecord::COLLECTION, rec.to_document()?).await
        }
        Some(rec) => {
            let mut patch = json!({
                "last_block": rec.last_block.max(touch.block_number),
                "last_activity": rec.last_activity.max(touch.timestamp),
                "trx_count": rec.trx_count + 1,
            });
            // an address may receive funds before a contract is deployed to it
            if touch.role == AccountRole::Contract && rec.role != AccountRole::Contract {
                patch["role"] = serde_json::to_value(AccountRole::Contract)?;
                patch["deploy_trx"] = serde_json::to_value(touch.deploy_tx_hash)?;
            }
            store.upsert(AccountRecord::COLLECTION, &filter, patch).await
        }
    }
}
