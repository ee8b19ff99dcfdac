//! The default topic table.

use alloy_primitives::{address, Address};
use chainpipe_core::handler::TopicRouter;
use chainpipe_core::records::TokenTransactionKind;
use std::sync::Arc;

use crate::handlers::{Erc20Handler, SfcEvent, SfcHandler};
use crate::topics::{event_signature, ERC20_APPROVAL, ERC20_TRANSFER};

/// SFC contract address on the Opera network.
pub const OPERA_SFC_CONTRACT: Address = address!("fc00face00000000000000000000000000000000");

/// Build the router for every SFC staking event emitted by `sfc_contract`
/// plus ERC-20 approvals and transfers from any token.
pub fn default_router(sfc_contract: Address) -> TopicRouter {
    let mut builder = TopicRouter::builder();
    for event in SfcEvent::ALL {
        builder = builder.route(
            event_signature(event.declaration()),
            Arc::new(SfcHandler::new(event, sfc_contract)),
        );
    }
    builder
        .route(
            event_signature(ERC20_APPROVAL),
            Arc::new(Erc20Handler::new(TokenTransactionKind::Approval)),
        )
        .route(
            event_signature(ERC20_TRANSFER),
            Arc::new(Erc20Handler::new(TokenTransactionKind::Transfer)),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    #[test]
    fn routes_all_known_topics() {
        let router = default_router(OPERA_SFC_CONTRACT);
        assert_eq!(router.len(), 9);

        let transfer = b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");
        assert_eq!(router.get(&transfer).unwrap().name(), "erc20.transfer");

        let delegated = b256!("9a8f44850296624dadfd9c246d17e47171d35727a181bd090aa14bbbe00238bb");
        assert_eq!(router.get(&delegated).unwrap().name(), "sfc.delegated");
    }
}
