//! Wire protocol for the sixtun broker and its peers.
//!
//! Every inter-service message travels as a JSON envelope signed with a
//! shared-secret HMAC. This crate holds the envelope and payload types,
//! the command set, the list-query mini-language and the signer.

pub mod messages;
pub mod sign;

pub use messages::{
    AgentRequest, AgentResponse, Command, ErrNo, IdEntry, IdList, ListQuery, ListQueryError,
    NameEntry, NameList, RequestEnvelope, ResponseEnvelope, SortField,
};
pub use sign::{
    check_freshness, check_service, httpdate, parse_httpdate, SignError, Signer,
    FRESHNESS_WINDOW_SECS, HDR_SERVICE, HDR_SIGNATURE,
};
