//! Special Fee Contract (SFC) staking events.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use chainpipe_core::error::PipelineError;
use chainpipe_core::handler::{HandlerContext, LogHandler};
use chainpipe_core::records::{DelegationRecord, RewardClaimRecord, WithdrawRequestRecord};
use chainpipe_core::store::{Document, Filter, FindOptions};
use chainpipe_core::types::LogEvent;

use super::{record_key, save};
use crate::decode::{data_uint, expect_topics, expect_words, topic_address, topic_uint};
use crate::topics;

/// SFC events with a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SfcEvent {
    Delegated,
    Undelegated,
    Withdrawn,
    ClaimedRewards,
    RestakedRewards,
    /// SFC1 delegator reward claim.
    ClaimedDelegationReward,
    /// SFC1 validator reward claim.
    ClaimedValidatorReward,
}

impl SfcEvent {
    pub const ALL: [SfcEvent; 7] = [
        SfcEvent::Delegated,
        SfcEvent::Undelegated,
        SfcEvent::Withdrawn,
        SfcEvent::ClaimedRewards,
        SfcEvent::RestakedRewards,
        SfcEvent::ClaimedDelegationReward,
        SfcEvent::ClaimedValidatorReward,
    ];

    /// Canonical event declaration.
    pub fn declaration(self) -> &'static str {
        match self {
            SfcEvent::Delegated => topics::SFC_DELEGATED,
            SfcEvent::Undelegated => topics::SFC_UNDELEGATED,
            SfcEvent::Withdrawn => topics::SFC_WITHDRAWN,
            SfcEvent::ClaimedRewards => topics::SFC_CLAIMED_REWARDS,
            SfcEvent::RestakedRewards => topics::SFC_RESTAKED_REWARDS,
            SfcEvent::ClaimedDelegationReward => topics::SFC1_CLAIMED_DELEGATION_REWARD,
            SfcEvent::ClaimedValidatorReward => topics::SFC1_CLAIMED_VALIDATOR_REWARD,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SfcEvent::Delegated => "sfc.delegated",
            SfcEvent::Undelegated => "sfc.undelegated",
            SfcEvent::Withdrawn => "sfc.withdrawn",
            SfcEvent::ClaimedRewards => "sfc.claimed_rewards",
            SfcEvent::RestakedRewards => "sfc.restaked_rewards",
            SfcEvent::ClaimedDelegationReward => "sfc1.claimed_delegation_reward",
            SfcEvent::ClaimedValidatorReward => "sfc1.claimed_validator_reward",
        }
    }
}

/// Handles one SFC event kind. Logs emitted by any contract other than the
/// configured SFC are ignored.
pub struct SfcHandler {
    event: SfcEvent,
    contract: Address,
}

impl SfcHandler {
    pub fn new(event: SfcEvent, contract: Address) -> Self {
        Self { event, contract }
    }
}

#[async_trait]
impl LogHandler for SfcHandler {
    async fn handle(&self, log: &LogEvent, ctx: &HandlerContext) -> Result<(), PipelineError> {
        if log.address != self.contract {
            debug!(event = self.event.name(), emitter = %log.address, "not emitted by the SFC");
            return Ok(());
        }

        match self.event {
            SfcEvent::Delegated => delegated(log, ctx).await,
            SfcEvent::Undelegated => undelegated(log, ctx).await,
            SfcEvent::Withdrawn => withdrawn(log, ctx).await,
            SfcEvent::ClaimedRewards => claimed_rewards(log, ctx, false).await,
            SfcEvent::RestakedRewards => claimed_rewards(log, ctx, true).await,
            SfcEvent::ClaimedDelegationReward => sfc1_delegation_reward(log, ctx).await,
            SfcEvent::ClaimedValidatorReward => sfc1_validator_reward(log, ctx).await,
        }
    }

    fn name(&self) -> &str {
        self.event.name()
    }
}

/// Add the delegated amount to the `{delegator, validator}` position,
/// opening it on the first delegation.
async fn delegated(log: &LogEvent, ctx: &HandlerContext) -> Result<(), PipelineError> {
    expect_topics(log, 3)?;
    expect_words(log, 1)?;

    let address = topic_address(log, 1)?;
    let to_validator = topic_uint(log, 2)?;
    let amount = data_uint(log, 0)?;

    let filter = Filter::new()
        .eq("address", address)
        .eq("to_validator", to_validator);
    let known = ctx
        .store
        .find(DelegationRecord::COLLECTION, &filter, &FindOptions::new().limit(1))
        .await?
        .into_iter()
        .next()
        .map(DelegationRecord::from_document)
        .transpose()?;

    let key = record_key(log, ctx);
    let record = match known {
        // a replayed log must not add its amount twice
        Some(rec) if rec.applied.contains(&key) => {
            debug!(delegator = %address, validator = %to_validator, key, "delegation already applied");
            return Ok(());
        }
        Some(mut rec) => {
            rec.amount = rec.amount.checked_add(amount).ok_or_else(|| {
                PipelineError::Decode(format!("delegation of {address} to {to_validator} overflows"))
            })?;
            rec.applied.push(key);
            rec
        }
        None => DelegationRecord {
            pk: key,
            address,
            to_validator,
            amount,
            created_block: ctx.block.number,
            created_time: ctx.block.timestamp,
            created_trx: ctx.transaction.hash,
            applied: vec![key],
        },
    };
    debug!(delegator = %address, validator = %to_validator, amount = %record.amount, "delegation updated");
    save(ctx, &record).await
}

async fn undelegated(log: &LogEvent, ctx: &HandlerContext) -> Result<(), PipelineError> {
    expect_topics(log, 4)?;
    expect_words(log, 1)?;

    let record = WithdrawRequestRecord {
        pk: record_key(log, ctx),
        request_id: topic_uint(log, 3)?,
        address: topic_address(log, 1)?,
        to_validator: topic_uint(log, 2)?,
        amount: data_uint(log, 0)?,
        created_time: ctx.block.timestamp,
        created_trx: ctx.transaction.hash,
        withdrawn_time: None,
        withdrawn_trx: None,
    };
    save(ctx, &record).await
}

/// Close the matching withdraw request.
async fn withdrawn(log: &LogEvent, ctx: &HandlerContext) -> Result<(), PipelineError> {
    expect_topics(log, 4)?;

    let address = topic_address(log, 1)?;
    let to_validator = topic_uint(log, 2)?;
    let request_id = topic_uint(log, 3)?;

    let filter = Filter::new()
        .eq("address", address)
        .eq("to_validator", to_validator)
        .eq("request_id", request_id);
    let found = ctx
        .store
        .find(WithdrawRequestRecord::COLLECTION, &filter, &FindOptions::new().limit(1))
        .await?;
    let Some(doc) = found.into_iter().next() else {
        warn!(
            delegator = %address,
            validator = %to_validator,
            request = %request_id,
            "withdraw request not found"
        );
        return Ok(());
    };

    let request = WithdrawRequestRecord::from_document(doc)?;
    let mut patch = json!({
        "withdrawn_time": ctx.block.timestamp,
        "withdrawn_trx": ctx.transaction.hash,
    });
    // the paid out amount may differ from the requested one after slashing
    if let Ok(amount) = data_uint(log, 0) {
        patch["amount"] = serde_json::to_value(amount)?;
    }
    ctx.store
        .upsert(WithdrawRequestRecord::COLLECTION, &Filter::pk(request.pk), patch)
        .await
}

async fn claimed_rewards(log: &LogEvent, ctx: &HandlerContext, restaked: bool) -> Result<(), PipelineError> {
    expect_topics(log, 3)?;
    expect_words(log, 3)?;

    // lockup extra + lockup base + unlocked
    let amount = [data_uint(log, 0)?, data_uint(log, 1)?, data_uint(log, 2)?]
        .into_iter()
        .try_fold(U256::ZERO, |acc, v| acc.checked_add(v))
        .ok_or_else(|| PipelineError::Decode("claimed reward overflows".into()))?;

    let record = RewardClaimRecord {
        pk: record_key(log, ctx),
        address: topic_address(log, 1)?,
        to_validator: topic_uint(log, 2)?,
        amount,
        claimed_time: ctx.block.timestamp,
        claim_trx: ctx.transaction.hash,
        restaked,
    };
    save(ctx, &record).await
}

async fn sfc1_delegation_reward(log: &LogEvent, ctx: &HandlerContext) -> Result<(), PipelineError> {
    expect_topics(log, 3)?;
    expect_words(log, 1)?;

    let record = RewardClaimRecord {
        pk: record_key(log, ctx),
        address: topic_address(log, 1)?,
        to_validator: topic_uint(log, 2)?,
        amount: data_uint(log, 0)?,
        claimed_time: ctx.block.timestamp,
        claim_trx: ctx.transaction.hash,
        restaked: false,
    };
    save(ctx, &record).await
}

/// The SFC1 validator claim names only the staker; the claimer is the
/// transaction sender.
async fn sfc1_validator_reward(log: &LogEvent, ctx: &HandlerContext) -> Result<(), PipelineError> {
    expect_topics(log, 2)?;
    expect_words(log, 1)?;

    let record = RewardClaimRecord {
        pk: record_key(log, ctx),
        address: ctx.transaction.from,
        to_validator: topic_uint(log, 1)?,
        amount: data_uint(log, 0)?,
        claimed_time: ctx.block.timestamp,
        claim_trx: ctx.transaction.hash,
        restaked: false,
    };
    save(ctx, &record).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{context, log, uint_topic, BLOCK};
    use crate::topics::event_signature;
    use alloy_primitives::Bytes;
    use chainpipe_core::memory::MemoryStore;
    use chainpipe_core::types::log_ordinal;
    use std::sync::Arc;

    const SFC: Address = Address::repeat_byte(0xfc);

    fn handler(event: SfcEvent) -> SfcHandler {
        SfcHandler::new(event, SFC)
    }

    async fn all<T: Document>(store: &MemoryStore) -> Vec<T> {
        use chainpipe_core::store::PersistentStore;
        store
            .find(T::COLLECTION, &Filter::new(), &FindOptions::new())
            .await
            .unwrap()
            .into_iter()
            .map(|d| T::from_document(d).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn delegation_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let delegator = Address::repeat_byte(0x42);
        let l = log(
            SFC,
            5,
            vec![event_signature(topics::SFC_DELEGATED), delegator.into_word(), uint_topic(9)],
            &[1_000],
        );

        handler(SfcEvent::Delegated).handle(&l, &ctx).await.unwrap();
        // replaying the same log does not count it twice
        handler(SfcEvent::Delegated).handle(&l, &ctx).await.unwrap();

        let rows: Vec<DelegationRecord> = all(&store).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pk, log_ordinal(BLOCK, 5));
        assert_eq!(rows[0].address, delegator);
        assert_eq!(rows[0].to_validator, U256::from(9u64));
        assert_eq!(rows[0].amount, U256::from(1_000u64));

        // a later delegation to the same validator adds up
        let more = log(
            SFC,
            6,
            vec![event_signature(topics::SFC_DELEGATED), delegator.into_word(), uint_topic(9)],
            &[250],
        );
        handler(SfcEvent::Delegated).handle(&more, &ctx).await.unwrap();
        let rows: Vec<DelegationRecord> = all(&store).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pk, log_ordinal(BLOCK, 5));
        assert_eq!(rows[0].amount, U256::from(1_250u64));
    }

    #[tokio::test]
    async fn replayed_earlier_delegation_is_not_added_again() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let delegator = Address::repeat_byte(0x42);
        let topics = vec![event_signature(topics::SFC_DELEGATED), delegator.into_word(), uint_topic(9)];
        let first = log(SFC, 1, topics.clone(), &[10]);
        let second = log(SFC, 2, topics, &[5]);

        for l in [&first, &second, &first, &second] {
            handler(SfcEvent::Delegated).handle(l, &ctx).await.unwrap();
        }

        let rows: Vec<DelegationRecord> = all(&store).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, U256::from(15u64));
        assert_eq!(rows[0].applied, vec![log_ordinal(BLOCK, 1), log_ordinal(BLOCK, 2)]);
    }

    #[tokio::test]
    async fn undelegate_then_withdraw() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let delegator = Address::repeat_byte(0x42);
        let topics_for = |sig: &str| {
            vec![event_signature(sig), delegator.into_word(), uint_topic(3), uint_topic(77)]
        };

        let undelegate = log(SFC, 0, topics_for(topics::SFC_UNDELEGATED), &[500]);
        handler(SfcEvent::Undelegated).handle(&undelegate, &ctx).await.unwrap();

        let rows: Vec<WithdrawRequestRecord> = all(&store).await;
        assert_eq!(rows[0].request_id, U256::from(77u64));
        assert!(rows[0].withdrawn_trx.is_none());

        let withdraw = log(SFC, 1, topics_for(topics::SFC_WITHDRAWN), &[450]);
        handler(SfcEvent::Withdrawn).handle(&withdraw, &ctx).await.unwrap();

        let rows: Vec<WithdrawRequestRecord> = all(&store).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].withdrawn_trx, Some(ctx.transaction.hash));
        assert_eq!(rows[0].withdrawn_time, Some(ctx.block.timestamp));
        assert_eq!(rows[0].amount, U256::from(450u64));
    }

    #[tokio::test]
    async fn withdraw_without_request_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let l = log(
            SFC,
            0,
            vec![
                event_signature(topics::SFC_WITHDRAWN),
                Address::repeat_byte(1).into_word(),
                uint_topic(1),
                uint_topic(1),
            ],
            &[1],
        );
        handler(SfcEvent::Withdrawn).handle(&l, &ctx).await.unwrap();
        assert!(store.is_empty(WithdrawRequestRecord::COLLECTION));
    }

    #[tokio::test]
    async fn rewards_sum_all_parts() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let delegator = Address::repeat_byte(0x42);
        let claim = log(
            SFC,
            0,
            vec![event_signature(topics::SFC_CLAIMED_REWARDS), delegator.into_word(), uint_topic(3)],
            &[1, 2, 3],
        );
        let restake = log(
            SFC,
            1,
            vec![event_signature(topics::SFC_RESTAKED_REWARDS), delegator.into_word(), uint_topic(3)],
            &[10, 20, 30],
        );
        handler(SfcEvent::ClaimedRewards).handle(&claim, &ctx).await.unwrap();
        handler(SfcEvent::RestakedRewards).handle(&restake, &ctx).await.unwrap();

        let rows: Vec<RewardClaimRecord> = all(&store).await;
        assert_eq!(rows.len(), 2);
        let claimed = rows.iter().find(|r| !r.restaked).unwrap();
        let restaked = rows.iter().find(|r| r.restaked).unwrap();
        assert_eq!(claimed.amount, U256::from(6u64));
        assert_eq!(restaked.amount, U256::from(60u64));
    }

    #[tokio::test]
    async fn overflowing_reward_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let mut claim = log(
            SFC,
            0,
            vec![
                event_signature(topics::SFC_CLAIMED_REWARDS),
                Address::repeat_byte(0x42).into_word(),
                uint_topic(3),
            ],
            &[],
        );
        let words: Vec<u8> = [U256::MAX, U256::from(1u64), U256::ZERO]
            .iter()
            .flat_map(|w| w.to_be_bytes::<32>())
            .collect();
        claim.data = Bytes::from(words);

        let err = handler(SfcEvent::ClaimedRewards).handle(&claim, &ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert!(store.is_empty(RewardClaimRecord::COLLECTION));
    }

    #[tokio::test]
    async fn legacy_validator_claim_uses_sender() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let l = log(
            SFC,
            0,
            vec![event_signature(topics::SFC1_CLAIMED_VALIDATOR_REWARD), uint_topic(12)],
            &[99, 1, 2],
        );
        handler(SfcEvent::ClaimedValidatorReward).handle(&l, &ctx).await.unwrap();

        let rows: Vec<RewardClaimRecord> = all(&store).await;
        assert_eq!(rows[0].address, ctx.transaction.from);
        assert_eq!(rows[0].to_validator, U256::from(12u64));
        assert_eq!(rows[0].amount, U256::from(99u64));
    }

    #[tokio::test]
    async fn foreign_emitter_and_bad_layout() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let topics = vec![
            event_signature(topics::SFC_DELEGATED),
            Address::repeat_byte(1).into_word(),
            uint_topic(1),
        ];

        let spoofed = log(Address::repeat_byte(0x66), 0, topics.clone(), &[5]);
        handler(SfcEvent::Delegated).handle(&spoofed, &ctx).await.unwrap();
        assert!(store.is_empty(DelegationRecord::COLLECTION));

        let short = log(SFC, 0, topics, &[]);
        let err = handler(SfcEvent::Delegated).handle(&short, &ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }
}
