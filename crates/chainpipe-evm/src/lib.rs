//! chainpipe-evm: event signatures, log decoding and the handlers routed by
//! the default topic table.
//!
//! - `topics[0]` → event signature (keccak256 of the canonical declaration)
//! - `topics[1..]` → indexed parameters
//! - `data` → non-indexed parameters, one 32-byte word each

pub mod decode;
pub mod handlers;
pub mod router;
pub mod topics;

pub use decode::LogDecodeError;
pub use handlers::{Erc20Handler, SfcEvent, SfcHandler};
pub use router::{default_router, OPERA_SFC_CONTRACT};
pub use topics::event_signature;
