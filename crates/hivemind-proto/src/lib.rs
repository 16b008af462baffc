//! Wire formats for the SPNS hivemind: client JSON requests/responses, the bencoded snode RPC
//! surface, and the bencoded notifier protocol.

pub mod bytes;
pub mod client;
pub mod error;
pub mod notifier;
pub mod snode;

pub use client::{
    DecodedSubscribeRequest, DecodedUnsubscribeRequest, ErrorResponse, SubscribeRequest,
    SuccessResponse, UnsubscribeRequest,
};
pub use error::{ProtoError, Result};
pub use notifier::{decode_service_stats, decode_validate_reply, encode_validate_request, PushEnvelope, StatValue, ValidateReply};
pub use snode::{encode_monitor_messages, NotifyMessage, SubscribeRecord};
