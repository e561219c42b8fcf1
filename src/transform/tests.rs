//! Transform module tests

use bytes::Bytes;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use test_case::test_case;

use super::*;

fn data_transform() -> EnvelopeTransform {
    EnvelopeTransform::new(PayloadMode::Data)
}

#[test]
fn test_string_data_is_unquoted() {
    let record = data_transform()
        .transform(br#"{"type":"orders","data":"abc"}"#)
        .unwrap();

    assert_eq!(record.topic, "orders");
    assert_eq!(record.payload, Bytes::from_static(b"abc"));
    assert_eq!(record.key, None);
}

#[test]
fn test_id_becomes_key() {
    let record = data_transform()
        .transform(br#"{"id":"42","type":"orders","data":"abc"}"#)
        .unwrap();

    assert_eq!(record.key, Some(Bytes::from_static(b"42")));
}

#[test_case(br#"{"type":"t","data":{"a": 1}}"#, br#"{"a": 1}"# ; "object kept verbatim")]
#[test_case(br#"{"type":"t","data":[1,2,3]}"#, b"[1,2,3]" ; "array kept verbatim")]
#[test_case(br#"{"type":"t","data":17}"#, b"17" ; "number kept verbatim")]
#[test_case(br#"{"type":"t","data":true}"#, b"true" ; "bool kept verbatim")]
#[test_case(br#"{"type":"t","data":"line\nbreak"}"# , b"line\nbreak" ; "escapes resolved")]
#[test_case(br#"{"type":"t","data":""}"#, b"" ; "empty string")]
#[test_case(br#"{"type":"t","data":null}"#, b"" ; "null is empty")]
#[test_case(br#"{"type":"t"}"#, b"" ; "absent is empty")]
fn test_data_payload(input: &[u8], expected: &[u8]) {
    let record = data_transform().transform(input).unwrap();
    assert_eq!(record.topic, "t");
    assert_eq!(&record.payload[..], expected);
}

#[test]
fn test_envelope_mode_passes_raw_input() {
    let input: &[u8] = br#"{"id":"1","type":"orders","data":{"qty":3}}"#;
    let record = EnvelopeTransform::new(PayloadMode::Envelope)
        .transform(input)
        .unwrap();

    assert_eq!(record.topic, "orders");
    assert_eq!(&record.payload[..], input);
}

#[test_case(b"not json" ; "not json")]
#[test_case(b"" ; "empty input")]
#[test_case(br#"{"data":"abc"}"# ; "missing type")]
#[test_case(br#"{"type":7,"data":"abc"}"# ; "non-string type")]
#[test_case(br#"{"type":"","data":"abc"}"# ; "empty type")]
#[test_case(br#"["orders","abc"]"# ; "array root")]
#[test_case(br#"[null,"orders","abc"]"# ; "positional array")]
#[test_case(br#"  ["orders","abc"]"# ; "array after whitespace")]
#[test_case(br#""orders""# ; "string root")]
#[test_case(b"null" ; "null root")]
#[test_case(b"42" ; "number root")]
#[test_case(b" \n\t" ; "whitespace only")]
#[test_case(br#"{"type":"orders","data":"abc"} trailing"# ; "trailing garbage")]
#[test_case(br#"{"id":5,"type":"orders"}"# ; "non-string id")]
fn test_malformed(input: &[u8]) {
    let err = data_transform().transform(input).unwrap_err();
    assert!(
        matches!(err, TransformError::Malformed(_)),
        "expected Malformed, got {:?}",
        err
    );
}

#[test_case(r#"{"type":"orders/eu"}"# ; "slash")]
#[test_case(r#"{"type":"."}"# ; "dot")]
#[test_case(r#"{"type":"has space"}"# ; "space")]
fn test_invalid_topic(input: &str) {
    let err = data_transform().transform(input.as_bytes()).unwrap_err();
    assert!(matches!(err, TransformError::InvalidTopic(_)));
}

#[test]
fn test_leading_whitespace_before_object() {
    let record = data_transform()
        .transform(b" \r\n\t{\"type\":\"orders\",\"data\":\"abc\"}")
        .unwrap();
    assert_eq!(record.topic, "orders");
    assert_eq!(record.payload, Bytes::from_static(b"abc"));
}

#[test]
fn test_closure_is_a_transform() {
    let upper = |raw: &[u8]| -> Result<Record, TransformError> {
        Ok(Record::new("raw", raw.to_ascii_uppercase()))
    };
    let transform: &dyn Transform = &upper;

    let record = transform.transform(b"abc").unwrap();
    assert_eq!(record, Record::new("raw", Bytes::from_static(b"ABC")));
}

#[test]
fn test_error_display() {
    let err = TransformError::Malformed("expected value".to_string());
    assert_eq!(err.to_string(), "Malformed message: expected value");

    let err = TransformError::InvalidTopic("bad".to_string());
    assert_eq!(err.to_string(), "Invalid topic: bad");
}

proptest! {
    #[test]
    fn prop_valid_envelope_routes_to_type(
        topic in "[A-Za-z0-9._-]{1,40}".prop_filter("reserved", |t| t != "." && t != ".."),
        id in proptest::option::of("[a-z0-9]{1,12}"),
        data in ".*",
    ) {
        let mut envelope = serde_json::json!({ "type": topic, "data": data });
        if let Some(id) = &id {
            envelope["id"] = serde_json::Value::String(id.clone());
        }
        let raw = serde_json::to_vec(&envelope).unwrap();

        let record = data_transform().transform(&raw).unwrap();
        prop_assert_eq!(&record.topic, &topic);
        prop_assert_eq!(&record.payload[..], data.as_bytes());
        prop_assert_eq!(record.key, id.map(|id| Bytes::from(id.into_bytes())));
    }

    #[test]
    fn prop_arrays_are_never_envelopes(
        topic in "[a-z]{1,20}",
        data in "[a-z]{0,20}",
        lead_null in any::<bool>(),
    ) {
        let raw = if lead_null {
            serde_json::json!([null, topic, data])
        } else {
            serde_json::json!([topic, data])
        };
        let raw = serde_json::to_vec(&raw).unwrap();

        let result = data_transform().transform(&raw);
        prop_assert!(matches!(result, Err(TransformError::Malformed(_))));
    }

    #[test]
    fn prop_non_json_never_yields_record(raw in proptest::collection::vec(any::<u8>(), 0..256)) {
        // Anything that is not a JSON object with a string `type` must fail cleanly
        let parsed: Result<serde_json::Value, _> = serde_json::from_slice(&raw);
        let routable = matches!(
            &parsed,
            Ok(serde_json::Value::Object(map)) if map.get("type").map_or(false, |t| t.is_string())
        );
        prop_assume!(!routable);

        let result = data_transform().transform(&raw);
        prop_assert!(matches!(result, Err(TransformError::Malformed(_))));
    }
}
