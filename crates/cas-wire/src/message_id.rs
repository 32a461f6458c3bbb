//! The CAS message-id registry.
//!
//! The wire only ever carries a `u32` in the header; this enum is the single
//! source of truth mapping that integer to an operation so the framed parser
//! and the outbound builders never drift out of sync.

use std::fmt;

macro_rules! message_ids {
    ($($variant:ident = $value:expr),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageId {
            $($variant),+
        }

        impl MessageId {
            pub const fn as_u32(self) -> u32 {
                match self {
                    $(MessageId::$variant => $value),+
                }
            }
        }

        impl TryFrom<u32> for MessageId {
            type Error = u32;

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(MessageId::$variant),)+
                    other => Err(other),
                }
            }
        }

        impl From<MessageId> for u32 {
            fn from(id: MessageId) -> u32 {
                id.as_u32()
            }
        }

        impl fmt::Display for MessageId {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(MessageId::$variant => write!(f, stringify!($variant))),+
                }
            }
        }
    };
}

message_ids! {
    EtsReqSysCon = 1001,
    EtsResSysCon = 1002,
    EtsReqSysSts = 1011,
    EtsResSysSts = 1012,
    EtsNfyDisInfo = 2001,
    EtsCnfDisInfo = 2002,
    EtsReqDisReport = 2011,
    EtsResDisReport = 2012,
    EtsNfyDeviceInfo = 2021,
    EtsCnfDeviceInfo = 2022,
    EtsNfyDeviceSts = 2031,
    EtsCnfDeviceSts = 2032,
}

/// `data_format` field of the header; only XML is defined by CAS.
pub const DATA_FORMAT_XML: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u32() {
        for id in [
            MessageId::EtsReqSysCon,
            MessageId::EtsNfyDisInfo,
            MessageId::EtsCnfDeviceSts,
        ] {
            let raw: u32 = id.into();
            assert_eq!(MessageId::try_from(raw), Ok(id));
        }
    }

    #[test]
    fn unknown_id_is_an_error() {
        assert_eq!(MessageId::try_from(999_999), Err(999_999));
    }
}
