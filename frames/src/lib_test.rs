use super::*;
use chrono::TimeZone;

fn fixed_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 5).single().expect("valid instant")
}

#[test]
fn envelope_serializes_type_payload_and_timestamp() {
    let env = Envelope::at("card-moved", serde_json::json!({ "cardId": "c1" }), fixed_instant());
    let text = encode_envelope(&env);
    let value: Value = serde_json::from_str(&text).expect("valid json");
    assert_eq!(value["type"], "card-moved");
    assert_eq!(value["payload"]["cardId"], "c1");
    assert_eq!(value["timestamp"], "2024-03-09T12:30:05.000Z");
}

#[test]
fn envelope_new_stamps_current_time() {
    let before = Utc::now();
    let env = Envelope::new("list-added", Value::Null);
    let parsed = DateTime::parse_from_rfc3339(&env.timestamp).expect("rfc3339 timestamp");
    assert!(parsed.with_timezone(&Utc) >= before - chrono::Duration::milliseconds(1));
}

#[test]
fn decode_prefers_data_over_payload() {
    let frame = decode_inbound(r#"{"type":"card_created","data":{"id":"c9"},"payload":{"id":"other"}}"#)
        .expect("decode");
    assert_eq!(frame.kind, "card_created");
    assert_eq!(frame.body, serde_json::json!({ "id": "c9" }));
}

#[test]
fn decode_falls_back_to_payload_when_data_missing_or_null() {
    let missing = decode_inbound(r#"{"type":"card-moved","payload":{"cardId":"c1"}}"#).expect("decode");
    assert_eq!(missing.body, serde_json::json!({ "cardId": "c1" }));

    let null = decode_inbound(r#"{"type":"card-moved","data":null,"payload":{"cardId":"c2"}}"#).expect("decode");
    assert_eq!(null.body, serde_json::json!({ "cardId": "c2" }));
}

#[test]
fn decode_without_body_yields_null() {
    let frame = decode_inbound(r#"{"type":"pong"}"#).expect("decode");
    assert_eq!(frame.body, Value::Null);
}

#[test]
fn decode_rejects_malformed_json() {
    let err = decode_inbound("{not json").expect_err("should fail");
    assert!(matches!(err, CodecError::Json(_)));
}

#[test]
fn decode_rejects_non_object_envelope() {
    let err = decode_inbound("[1,2,3]").expect_err("should fail");
    assert!(matches!(err, CodecError::NotAnObject));
}

#[test]
fn decode_rejects_missing_or_non_string_type() {
    assert!(matches!(decode_inbound(r#"{"data":{}}"#), Err(CodecError::MissingType)));
    assert!(matches!(decode_inbound(r#"{"type":7}"#), Err(CodecError::MissingType)));
}

#[test]
fn outbound_envelope_is_readable_as_inbound() {
    let env = Envelope::at("card-deleted", serde_json::json!({ "cardId": "c3" }), fixed_instant());
    let frame = decode_inbound(&encode_envelope(&env)).expect("decode");
    assert_eq!(frame.kind, "card-deleted");
    assert_eq!(frame.body["cardId"], "c3");
}
