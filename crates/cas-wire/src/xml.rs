//! Parses/builds the `<data>` envelope XML.
//!
//! This module is deliberately the only place in the crate that walks
//! untyped XML events; everything it produces is a [`crate::cap::Envelope`].

use crate::cap::{Alert, AlertInfo, CapInfo, Envelope};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("xml read error: {0}")]
    Reader(#[from] quick_xml::Error),
    #[error("utf-8 decode error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed envelope: {0}")]
    Malformed(&'static str),
}

/// Parses a `<data>…</data>` envelope into a typed [`Envelope`].
///
/// Unknown elements are ignored. `capInfo`/`alert` is only populated when
/// both are present and `alert.info.eventCode.value` (and the other
/// required fields) could be read — callers perform CAP-required-field
/// validation themselves; this function only reports structural XML
/// failures.
pub fn parse_envelope(bytes: &[u8]) -> Result<Envelope, XmlError> {
    let text = std::str::from_utf8(bytes)?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut env = Envelope::default();
    let mut path: Vec<String> = Vec::new();

    let mut alert_identifier = None;
    let mut alert_sender = None;
    let mut alert_sent = None;
    let mut alert_status = None;
    let mut alert_msg_type = None;
    let mut alert_scope = None;
    let mut alert_code = None;
    let mut alert_note = None;
    let mut alert_references = None;
    let mut info_event = None;
    let mut info_event_code = None;
    let mut info_param_value_name = None;
    let mut info_param_value = None;
    let mut seen_cap_info = false;
    let mut seen_alert = false;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                path.push(name);
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                path.push(name);
                path.pop();
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Text(t) | Event::CData(t) => {
                let value = t.unescape().unwrap_or_default().into_owned();
                if value.is_empty() {
                    continue;
                }
                let p = path.join("/");
                match p.as_str() {
                    "data/transMsgId" => env.trans_msg_id = Some(value),
                    "data/transMsgSeq" => env.trans_msg_seq = value.parse().ok(),
                    "data/destId" => env.dest_id = Some(value),
                    "data/realm" => env.realm = Some(value),
                    "data/nonce" => env.nonce = Some(value),
                    "data/response" => env.response = Some(value),
                    "data/cmd" => env.cmd = Some(value),
                    "data/time" => env.time = Some(value),
                    "data/resultCode" => env.result_code = Some(value),
                    "data/result" => env.result = Some(value),
                    "data/capInfo/alert/identifier" => alert_identifier = Some(value),
                    "data/capInfo/alert/sender" => alert_sender = Some(value),
                    "data/capInfo/alert/sent" => alert_sent = Some(value),
                    "data/capInfo/alert/status" => alert_status = Some(value),
                    "data/capInfo/alert/msgType" => alert_msg_type = Some(value),
                    "data/capInfo/alert/scope" => alert_scope = Some(value),
                    "data/capInfo/alert/code" => alert_code = Some(value),
                    "data/capInfo/alert/note" => alert_note = Some(value),
                    "data/capInfo/alert/references" => alert_references = Some(value),
                    "data/capInfo/alert/info/event" => info_event = Some(value),
                    "data/capInfo/alert/info/eventCode/value" => info_event_code = Some(value),
                    "data/capInfo/alert/info/parameter/valueName" => {
                        info_param_value_name = Some(value)
                    }
                    "data/capInfo/alert/info/parameter/value" => info_param_value = Some(value),
                    _ => {}
                }
                if p == "data/capInfo" {
                    seen_cap_info = true;
                }
                if p.starts_with("data/capInfo/alert") {
                    seen_alert = true;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    if seen_cap_info || seen_alert {
        if let (Some(identifier), Some(sender), Some(sent), Some(event), Some(event_code)) = (
            alert_identifier,
            alert_sender,
            alert_sent,
            info_event,
            info_event_code,
        ) {
            env.cap_info = Some(CapInfo {
                alert: Alert {
                    identifier,
                    sender,
                    sent,
                    status: alert_status.unwrap_or_default(),
                    msg_type: alert_msg_type.unwrap_or_default(),
                    scope: alert_scope.unwrap_or_default(),
                    code: alert_code.unwrap_or_default(),
                    note: alert_note,
                    references: alert_references,
                    info: AlertInfo {
                        event,
                        event_code,
                        parameter_value_name: info_param_value_name,
                        parameter_value: info_param_value,
                    },
                },
            });
        }
    }

    Ok(env)
}

fn cdata(value: &str) -> String {
    format!("<![CDATA[{value}]]>")
}

fn tag(name: &str, value: &str) -> String {
    format!("<{name}>{value}</{name}>")
}

fn cdata_tag(name: &str, value: &str) -> String {
    format!("<{name}>{}</{name}>", cdata(value))
}

/// Builds the `<data>…</data>` envelope string for `env`.
///
/// Free-text fields (`sender`, `code`, `note`, `references`, `event`,
/// `parameter.value`) are emitted as CDATA, matching the CAS requirement
/// that free text be CDATA-wrapped.
pub fn build_envelope(env: &Envelope) -> String {
    let mut out = String::from("<data>");

    if let Some(v) = &env.trans_msg_id {
        out.push_str(&tag("transMsgId", v));
    }
    if let Some(v) = env.trans_msg_seq {
        out.push_str(&tag("transMsgSeq", &v.to_string()));
    }
    if let Some(v) = &env.dest_id {
        out.push_str(&tag("destId", v));
    }
    if let Some(v) = &env.realm {
        out.push_str(&tag("realm", v));
    }
    if let Some(v) = &env.nonce {
        out.push_str(&tag("nonce", v));
    }
    if let Some(v) = &env.response {
        out.push_str(&tag("response", v));
    }
    if let Some(v) = &env.cmd {
        out.push_str(&tag("cmd", v));
    }
    if let Some(v) = &env.time {
        out.push_str(&tag("time", v));
    }
    if let Some(v) = &env.result_code {
        out.push_str(&tag("resultCode", v));
    }
    if let Some(v) = &env.result {
        out.push_str(&tag("result", v));
    }
    if let Some(cap_info) = &env.cap_info {
        out.push_str("<capInfo><alert>");
        let a = &cap_info.alert;
        out.push_str(&tag("identifier", &a.identifier));
        out.push_str(&cdata_tag("sender", &a.sender));
        out.push_str(&tag("sent", &a.sent));
        out.push_str(&tag("status", &a.status));
        out.push_str(&tag("msgType", &a.msg_type));
        out.push_str(&tag("scope", &a.scope));
        out.push_str(&cdata_tag("code", &a.code));
        if let Some(note) = &a.note {
            out.push_str(&cdata_tag("note", note));
        }
        if let Some(references) = &a.references {
            out.push_str(&cdata_tag("references", references));
        }
        out.push_str("<info>");
        out.push_str(&cdata_tag("event", &a.info.event));
        out.push_str(&format!("<eventCode>{}</eventCode>", tag("value", &a.info.event_code)));
        if a.info.parameter_value_name.is_some() || a.info.parameter_value.is_some() {
            out.push_str("<parameter>");
            if let Some(name) = &a.info.parameter_value_name {
                out.push_str(&tag("valueName", name));
            }
            if let Some(value) = &a.info.parameter_value {
                out.push_str(&cdata_tag("value", value));
            }
            out.push_str("</parameter>");
        }
        out.push_str("</info>");
        out.push_str("</alert></capInfo>");
    }

    out.push_str("</data>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::{MSG_TYPE_ALERT, SCOPE_PRIVATE, STATUS_ACTUAL};

    fn sample_alert() -> Alert {
        Alert {
            identifier: "A1".to_owned(),
            sender: "KR.CS1".to_owned(),
            sent: "2026-07-26T00:00:00+09:00".to_owned(),
            status: STATUS_ACTUAL.to_owned(),
            msg_type: MSG_TYPE_ALERT.to_owned(),
            scope: SCOPE_PRIVATE.to_owned(),
            code: "대한민국정부1.2".to_owned(),
            note: None,
            references: None,
            info: AlertInfo {
                event: "폭염특보".to_owned(),
                event_code: "HTW".to_owned(),
                parameter_value_name: None,
                parameter_value: None,
            },
        }
    }

    #[test]
    fn builder_then_parser_round_trips_an_alert() {
        let env = Envelope {
            trans_msg_id: Some("T1".to_owned()),
            trans_msg_seq: Some(1),
            cap_info: Some(CapInfo {
                alert: sample_alert(),
            }),
            ..Default::default()
        };

        let xml = build_envelope(&env);
        let parsed = parse_envelope(xml.as_bytes()).unwrap();

        assert_eq!(parsed.trans_msg_id, env.trans_msg_id);
        assert_eq!(parsed.trans_msg_seq, env.trans_msg_seq);
        assert_eq!(parsed.cap_info.unwrap().alert, sample_alert());
    }

    #[test]
    fn parses_auth_challenge_fields() {
        let xml = r#"<data><resultCode>401</resultCode><realm>cas-realm</realm><nonce>n-123</nonce></data>"#;
        let env = parse_envelope(xml.as_bytes()).unwrap();
        assert_eq!(env.result_code.as_deref(), Some("401"));
        assert_eq!(env.realm.as_deref(), Some("cas-realm"));
        assert_eq!(env.nonce.as_deref(), Some("n-123"));
        assert!(env.cap_info.is_none());
    }
}
