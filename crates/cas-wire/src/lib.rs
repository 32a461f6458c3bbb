//! Wire-level building blocks shared by the central service: the 16-byte
//! framed header codec, CAS digest authentication, CAP-1.2 envelope
//! (de)serialization, the message-id registry and the event-code allowlist.

pub mod auth;
pub mod cap;
pub mod event_codes;
pub mod frame;
pub mod message_id;
pub mod xml;

pub use auth::AuthError;
pub use cap::{Alert, AlertInfo, CapInfo, Envelope};
pub use event_codes::{is_valid_event_code, VALID_EVENT_CODES};
pub use frame::{Deframer, FrameError, FrameHeader, HEADER_LEN, MAX_BODY_LENGTH};
pub use message_id::MessageId;
pub use xml::{build_envelope, parse_envelope, XmlError};
