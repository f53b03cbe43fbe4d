//! Envelope wire format.
//!
//! ```text
//! <messageType> TAB <correlationId> TAB <kindTag> TAB <jsonPayload>
//! ```
//!
//! The correlation id field is empty for notifications. The payload is
//! compact JSON, which never contains a raw newline, so the line can be handed
//! to the framing layer as-is.

use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::{MessageError, Result};
use crate::kind::MessageKind;

/// Separator between envelope fields.
pub const FIELD_SEPARATOR: char = '\t';

/// Encode an envelope as one line (without the trailing newline).
pub fn encode(envelope: &Envelope) -> Result<String> {
    check_token("type", &envelope.msg_type)?;

    let correlation_id = match (envelope.kind, envelope.correlation_id.as_deref()) {
        (MessageKind::Notification, None) => "",
        (MessageKind::Notification, Some(_)) => {
            return Err(MessageError::InvalidField {
                field: "correlationId",
                reason: "notifications carry no correlation id",
            })
        }
        (_, Some(id)) => {
            check_token("correlationId", id)?;
            id
        }
        (_, None) => return Err(MessageError::MissingField("correlationId")),
    };

    let payload = serde_json::to_string(&envelope.payload)?;
    let kind = envelope.kind.tag();

    let mut line = String::with_capacity(
        envelope.msg_type.len() + correlation_id.len() + kind.len() + payload.len() + 3,
    );
    line.push_str(&envelope.msg_type);
    line.push(FIELD_SEPARATOR);
    line.push_str(correlation_id);
    line.push(FIELD_SEPARATOR);
    line.push_str(kind);
    line.push(FIELD_SEPARATOR);
    line.push_str(&payload);
    Ok(line)
}

/// Decode one line into an envelope.
pub fn decode(line: &str) -> Result<Envelope> {
    let mut fields = line.splitn(4, FIELD_SEPARATOR);

    let msg_type = fields
        .next()
        .filter(|field| !field.is_empty())
        .ok_or(MessageError::MissingField("type"))?;
    let correlation_id = fields
        .next()
        .ok_or(MessageError::MissingField("correlationId"))?;
    let kind_tag = fields.next().ok_or(MessageError::MissingField("kind"))?;
    let payload = fields
        .next()
        .filter(|field| !field.trim().is_empty())
        .ok_or(MessageError::MissingField("payload"))?;

    check_token("type", msg_type)?;
    let kind = MessageKind::from_tag(kind_tag)
        .ok_or_else(|| MessageError::UnknownKind(kind_tag.to_string()))?;

    let correlation_id = match (kind, correlation_id.is_empty()) {
        (MessageKind::Notification, true) => None,
        (MessageKind::Notification, false) => {
            return Err(MessageError::InvalidField {
                field: "correlationId",
                reason: "notifications carry no correlation id",
            })
        }
        (_, true) => return Err(MessageError::MissingField("correlationId")),
        (_, false) => {
            check_token("correlationId", correlation_id)?;
            Some(correlation_id.to_string())
        }
    };

    let payload: Value = serde_json::from_str(payload)?;

    Ok(Envelope {
        msg_type: msg_type.to_string(),
        correlation_id,
        kind,
        payload,
    })
}

fn check_token(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(MessageError::MissingField(field));
    }
    if value.contains(|c: char| matches!(c, '\t' | '\r' | '\n')) {
        return Err(MessageError::InvalidField {
            field,
            reason: "must not contain tab or line break characters",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::envelope::{ErrorCode, ErrorInfo};

    fn envelope(kind: MessageKind, id: Option<&str>, payload: Value) -> Envelope {
        Envelope {
            msg_type: "ping".to_string(),
            correlation_id: id.map(str::to_string),
            kind,
            payload,
        }
    }

    #[test]
    fn encodes_ping_request() {
        let line = encode(&envelope(MessageKind::Request, Some("1"), Value::Null)).unwrap();
        assert_eq!(line, "ping\t1\treq\tnull");
    }

    #[test]
    fn decodes_ping_response() {
        let decoded = decode("ping\t1\tres\tnull").unwrap();
        assert_eq!(
            decoded,
            envelope(MessageKind::Response, Some("1"), Value::Null)
        );
    }

    #[test]
    fn roundtrip_preserves_every_kind() {
        let samples = [
            envelope(
                MessageKind::Request,
                Some("42"),
                json!({"solutionFilePath": "C:\\src\\App.sln", "runId": 1}),
            ),
            envelope(MessageKind::Response, Some("42"), json!([1, "two", null])),
            envelope(
                MessageKind::Error,
                Some("7"),
                ErrorInfo::new(ErrorCode::HandlerFailed, "tab\there, newline\nthere").into_value(),
            ),
            envelope(MessageKind::Notification, None, json!({"progress": 0.5})),
        ];

        for original in samples {
            let line = encode(&original).unwrap();
            assert!(!line.contains('\n'));
            assert_eq!(decode(&line).unwrap(), original);
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let e = envelope(
            MessageKind::Request,
            Some("1"),
            json!({"b": 1, "a": {"d": 2, "c": 3}}),
        );
        assert_eq!(encode(&e).unwrap(), encode(&e.clone()).unwrap());
    }

    #[test]
    fn payload_may_contain_tabs_after_third_separator() {
        let decoded = decode("echo\t9\treq\t\"a\\tb\"").unwrap();
        assert_eq!(decoded.payload, json!("a\tb"));
    }

    #[test]
    fn rejects_not_json_at_all() {
        let err = decode("not-json-at-all").unwrap_err();
        assert!(matches!(err, MessageError::MissingField("correlationId")));
    }

    #[test]
    fn rejects_missing_type() {
        let err = decode("\t1\treq\tnull").unwrap_err();
        assert!(matches!(err, MessageError::MissingField("type")));
    }

    #[test]
    fn rejects_missing_correlation_id_on_request() {
        let err = decode("ping\t\treq\tnull").unwrap_err();
        assert!(matches!(err, MessageError::MissingField("correlationId")));
    }

    #[test]
    fn rejects_correlation_id_on_notification() {
        let err = decode("onDataUpdate\t5\tntf\t{}").unwrap_err();
        assert!(matches!(
            err,
            MessageError::InvalidField {
                field: "correlationId",
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = decode("ping\t1\tbogus\tnull").unwrap_err();
        assert!(matches!(err, MessageError::UnknownKind(tag) if tag == "bogus"));
    }

    #[test]
    fn rejects_missing_and_malformed_payload() {
        assert!(matches!(
            decode("ping\t1\treq").unwrap_err(),
            MessageError::MissingField("payload")
        ));
        assert!(matches!(
            decode("ping\t1\treq\t{oops").unwrap_err(),
            MessageError::Json(_)
        ));
    }

    #[test]
    fn encode_rejects_separator_in_type() {
        let mut bad = envelope(MessageKind::Request, Some("1"), Value::Null);
        bad.msg_type = "pi\tng".to_string();
        assert!(matches!(
            encode(&bad).unwrap_err(),
            MessageError::InvalidField { field: "type", .. }
        ));
    }

    #[test]
    fn encode_rejects_uncorrelated_request() {
        let bad = envelope(MessageKind::Request, None, Value::Null);
        assert!(matches!(
            encode(&bad).unwrap_err(),
            MessageError::MissingField("correlationId")
        ));
    }

    proptest! {
        #[test]
        fn roundtrip_preserves_any_f64(bits in any::<u64>()) {
            let original = envelope(
                MessageKind::Request,
                Some("1"),
                json!(f64::from_bits(bits)),
            );
            let line = encode(&original).unwrap();
            prop_assert_eq!(decode(&line).unwrap(), original);
        }

        #[test]
        fn roundtrip_preserves_arbitrary_envelopes(
            msg_type in "[A-Za-z][A-Za-z0-9_.]{0,24}",
            id in 1u64..,
            text in ".*",
            count in any::<i64>(),
            ratio in any::<f64>(),
            notify in any::<bool>(),
        ) {
            let payload = json!({"text": text, "count": count, "ratio": ratio});
            let original = Envelope {
                msg_type,
                correlation_id: (!notify).then(|| id.to_string()),
                kind: if notify { MessageKind::Notification } else { MessageKind::Response },
                payload,
            };
            let line = encode(&original).unwrap();
            prop_assert!(!line.contains('\n'));
            prop_assert_eq!(decode(&line).unwrap(), original);
        }
    }
}
