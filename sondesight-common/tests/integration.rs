//! Integration tests for sondesight-common library.

use sondesight_common::{
    Format, TelemetryEnvelope, decode, decode_rawzb64, encode, encode_rawzb64,
};

#[test]
fn test_full_payload_workflow() {
    let document = br##"[{"#":0,"Parameter Name":"Temperature","Status":"Available","Value":23.5}]"##;

    // Pack the document the way the bridge publishes it
    let packed = encode_rawzb64(document).expect("pack failed");
    let envelope = TelemetryEnvelope::new("exosonde3", "rawzb64.data", packed)
        .with_timestamp(1_717_171_717_000_000_000);

    // Encode the envelope for the wire
    let json_bytes = encode(&envelope, Format::Json).expect("JSON encode failed");
    let cbor_bytes = encode(&envelope, Format::Cbor).expect("CBOR encode failed");
    assert!(cbor_bytes.len() < json_bytes.len());

    // A consumer reverses every step
    let received: TelemetryEnvelope = decode(&cbor_bytes, Format::Cbor).expect("decode failed");
    assert_eq!(received.timestamp, 1_717_171_717_000_000_000);
    assert_eq!(received.name, "rawzb64.data");

    let restored = decode_rawzb64(&received.value).expect("unpack failed");
    assert_eq!(restored, document);
}

#[test]
fn test_envelope_json_shape() {
    let envelope = TelemetryEnvelope::new("exosonde3", "rawzb64.data", "eJyLjgUAARUAuQ==")
        .with_timestamp(42);
    let json: serde_json::Value =
        serde_json::from_slice(&encode(&envelope, Format::Json).unwrap()).unwrap();

    assert_eq!(json["timestamp"], 42);
    assert_eq!(json["source"], "exosonde3");
    assert_eq!(json["name"], "rawzb64.data");
    assert_eq!(json["value"], "eJyLjgUAARUAuQ==");
}
