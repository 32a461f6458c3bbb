//! Typed CAP-1.2 records and the CAS `<data>` envelope.
//!
//! The source system parses/builds XML into untyped nested dictionaries;
//! this is the one place in the codebase that touches raw XML, and it
//! converts to these typed records before anything downstream sees them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub trans_msg_id: Option<String>,
    pub trans_msg_seq: Option<u32>,
    pub dest_id: Option<String>,
    pub realm: Option<String>,
    pub nonce: Option<String>,
    pub response: Option<String>,
    pub cmd: Option<String>,
    pub time: Option<String>,
    pub result_code: Option<String>,
    pub result: Option<String>,
    pub cap_info: Option<CapInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapInfo {
    pub alert: Alert,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub identifier: String,
    pub sender: String,
    pub sent: String,
    pub status: String,
    pub msg_type: String,
    pub scope: String,
    pub code: String,
    pub note: Option<String>,
    pub references: Option<String>,
    pub info: AlertInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertInfo {
    pub event: String,
    pub event_code: String,
    pub parameter_value_name: Option<String>,
    pub parameter_value: Option<String>,
}

impl Alert {
    /// Builds the `<references>` value CAS expects: `sender,identifier,sent`.
    pub fn reference_triple(&self) -> String {
        format!("{},{},{}", self.sender, self.identifier, self.sent)
    }
}

/// `code` every CAP alert in this system carries, per the central-system profile.
pub const GOV_CODE: &str = "대한민국정부1.2";

pub const SCOPE_PRIVATE: &str = "Private";
pub const MSG_TYPE_ALERT: &str = "Alert";
pub const MSG_TYPE_ACK: &str = "Ack";
pub const STATUS_ACTUAL: &str = "Actual";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_triple_joins_sender_identifier_sent() {
        let alert = Alert {
            identifier: "KR.ALERT001".to_owned(),
            sender: "KR.CENTRAL1".to_owned(),
            sent: "2026-07-26T09:00:00+09:00".to_owned(),
            status: STATUS_ACTUAL.to_owned(),
            msg_type: MSG_TYPE_ALERT.to_owned(),
            scope: SCOPE_PRIVATE.to_owned(),
            code: GOV_CODE.to_owned(),
            note: None,
            references: None,
            info: AlertInfo {
                event: "지진".to_owned(),
                event_code: "EQK".to_owned(),
                parameter_value_name: None,
                parameter_value: None,
            },
        };
        assert_eq!(alert.reference_triple(), "KR.CENTRAL1,KR.ALERT001,2026-07-26T09:00:00+09:00");
    }

    /// `Envelope`/`CapInfo` round-trip as JSON across the broker boundary
    /// (the `rawMessage` field of `disaster.*` payloads), not just as XML.
    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = Envelope {
            trans_msg_id: Some("KR.TEST001".to_owned()),
            trans_msg_seq: Some(1),
            cap_info: Some(CapInfo {
                alert: Alert {
                    identifier: "KR.ALERT002".to_owned(),
                    sender: "KR.CENTRAL1".to_owned(),
                    sent: "2026-07-26T09:00:00+09:00".to_owned(),
                    status: STATUS_ACTUAL.to_owned(),
                    msg_type: MSG_TYPE_ALERT.to_owned(),
                    scope: SCOPE_PRIVATE.to_owned(),
                    code: GOV_CODE.to_owned(),
                    note: None,
                    references: None,
                    info: AlertInfo {
                        event: "태풍".to_owned(),
                        event_code: "TYP".to_owned(),
                        parameter_value_name: None,
                        parameter_value: None,
                    },
                },
            }),
            ..Default::default()
        };

        let json = serde_json::to_string(&envelope).unwrap();
        let round_tripped: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(round_tripped, envelope);
    }
}
