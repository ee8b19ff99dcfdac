//! ERC-20 `Transfer` and `Approval` events.

use async_trait::async_trait;
use tracing::debug;

use chainpipe_core::error::PipelineError;
use chainpipe_core::handler::{HandlerContext, LogHandler};
use chainpipe_core::records::{TokenTransactionKind, TokenTransactionRecord};
use chainpipe_core::types::LogEvent;

use super::{record_key, save};
use crate::decode::{data_uint, topic_address};

/// Records ERC-20 token activity of one kind.
///
/// ERC-721 shares both signatures but indexes the token id as a third topic
/// and carries no data; such logs are skipped.
pub struct Erc20Handler {
    kind: TokenTransactionKind,
}

impl Erc20Handler {
    pub fn new(kind: TokenTransactionKind) -> Self {
        Self { kind }
    }

    fn is_erc20_layout(log: &LogEvent) -> bool {
        log.topics.len() == 3 && log.data.len() >= 32
    }
}

#[async_trait]
impl LogHandler for Erc20Handler {
    async fn handle(&self, log: &LogEvent, ctx: &HandlerContext) -> Result<(), PipelineError> {
        if !Self::is_erc20_layout(log) {
            debug!(token = %log.address, topics = log.topics.len(), "not an erc20 log");
            return Ok(());
        }

        let sender = topic_address(log, 1)?;
        let recipient = topic_address(log, 2)?;
        let mut participants = vec![sender];
        if recipient != sender {
            participants.push(recipient);
        }

        let record = TokenTransactionRecord {
            pk: record_key(log, ctx),
            token: log.address,
            kind: self.kind,
            sender,
            recipient,
            amount: data_uint(log, 0)?,
            trx: ctx.transaction.hash,
            block_number: ctx.block.number,
            timestamp: ctx.block.timestamp,
            participants,
        };
        save(ctx, &record).await
    }

    fn name(&self) -> &str {
        match self.kind {
            TokenTransactionKind::Transfer => "erc20.transfer",
            TokenTransactionKind::Approval => "erc20.approval",
        }
    }
}
