//! Event signatures routed by the default topic router.
//!
//! The signature of an EVM event is the keccak256 hash of its canonical
//! declaration, e.g.:
//!   keccak256("Transfer(address,address,uint256)")
//!   → 0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef

use alloy_primitives::B256;
use tiny_keccak::{Hasher, Keccak};

/// SFC3 `Delegated(address indexed delegator, uint256 indexed toValidatorID, uint256 amount)`
pub const SFC_DELEGATED: &str = "Delegated(address,uint256,uint256)";

/// SFC3 `Undelegated(address indexed delegator, uint256 indexed toValidatorID, uint256 indexed wrID, uint256 amount)`
pub const SFC_UNDELEGATED: &str = "Undelegated(address,uint256,uint256,uint256)";

/// SFC3 `Withdrawn(address indexed delegator, uint256 indexed toValidatorID, uint256 indexed wrID, uint256 amount)`
pub const SFC_WITHDRAWN: &str = "Withdrawn(address,uint256,uint256,uint256)";

/// SFC3 `ClaimedRewards(address indexed delegator, uint256 indexed toValidatorID, uint256 lockupExtraReward, uint256 lockupBaseReward, uint256 unlockedReward)`
pub const SFC_CLAIMED_REWARDS: &str = "ClaimedRewards(address,uint256,uint256,uint256,uint256)";

/// SFC3 `RestakedRewards(...)`, same layout as `ClaimedRewards`.
pub const SFC_RESTAKED_REWARDS: &str = "RestakedRewards(address,uint256,uint256,uint256,uint256)";

/// SFC1 `ClaimedDelegationReward(address indexed from, uint256 indexed stakerID, uint256 reward, uint256 fromEpoch, uint256 untilEpoch)`
pub const SFC1_CLAIMED_DELEGATION_REWARD: &str =
    "ClaimedDelegationReward(address,uint256,uint256,uint256,uint256)";

/// SFC1 `ClaimedValidatorReward(uint256 indexed stakerID, uint256 reward, uint256 fromEpoch, uint256 untilEpoch)`
pub const SFC1_CLAIMED_VALIDATOR_REWARD: &str =
    "ClaimedValidatorReward(uint256,uint256,uint256,uint256)";

/// ERC-20 `Approval(address indexed owner, address indexed spender, uint256 value)`
pub const ERC20_APPROVAL: &str = "Approval(address,address,uint256)";

/// ERC-20 `Transfer(address indexed from, address indexed to, uint256 value)`
pub const ERC20_TRANSFER: &str = "Transfer(address,address,uint256)";

/// Compute the keccak256 signature of a canonical event declaration.
pub fn event_signature(declaration: &str) -> B256 {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(declaration.as_bytes());
    hasher.finalize(&mut output);
    B256::from(output)
}
