use bytes::Bytes;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

use super::serializer::{BINARY_ID, JSON_ID, RAW_BYTES_ID, UTF8_ID};
use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u64,
    item: String,
    quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping(u32);

struct NotRegistered;

fn registry() -> CodecRegistry {
    CodecRegistry::builder()
        .with_defaults()
        .register_as::<Order, _>("shop.Order", Json)
        .register_as::<Ping, _>("shop.Ping", Binary)
        .build()
}

#[test]
fn test_string_round_trip() {
    let codec = registry();
    let envelope = codec.encode(&Message::from("hello")).unwrap();
    assert_eq!(envelope.codec_id, UTF8_ID);
    assert_eq!(envelope.bytes, b"hello".to_vec());

    let decoded = codec.decode(&envelope).unwrap();
    assert_eq!(decoded.downcast_ref::<String>().unwrap(), "hello");
}

#[test]
fn test_bytes_pass_through() {
    let codec = registry();
    let raw = Bytes::from_static(&[0, 1, 2, 255]);
    let envelope = codec.encode(&Message::from(raw.clone())).unwrap();
    assert_eq!(envelope.codec_id, RAW_BYTES_ID);
    assert_eq!(envelope.bytes, raw.to_vec());

    let decoded = codec.decode(&envelope).unwrap();
    assert_eq!(decoded.downcast_ref::<Bytes>(), Some(&raw));
}

#[test]
fn test_json_envelope_carries_tag() {
    let codec = registry();
    let order = Order {
        id: 7,
        item: "widget".to_string(),
        quantity: 3,
    };
    let envelope = codec.encode(&Message::new(order.clone())).unwrap();
    assert_eq!(envelope.codec_id, JSON_ID);
    assert_eq!(envelope.type_tag, "shop.Order");

    let decoded = codec.decode(&envelope).unwrap();
    assert!(decoded.is::<Order>());
    assert_eq!(decoded.downcast_ref::<Order>(), Some(&order));
}

#[test]
fn test_binary_serializer() {
    let codec = registry();
    let envelope = codec.encode(&Message::new(Ping(42))).unwrap();
    assert_eq!(envelope.codec_id, BINARY_ID);

    let decoded = codec.decode(&envelope).unwrap();
    assert_eq!(decoded.downcast_ref::<Ping>(), Some(&Ping(42)));
}

#[test]
fn test_no_serializer() {
    let codec = registry();
    let err = codec.encode(&Message::new(NotRegistered)).unwrap_err();
    assert!(matches!(err, EncodeError::NoSerializer(_)));
}

#[test]
fn test_unknown_codec_id() {
    let codec = registry();
    let envelope = PayloadEnvelope {
        bytes: b"x".to_vec(),
        codec_id: 999,
        type_tag: String::new(),
    };
    assert_eq!(codec.decode(&envelope).unwrap_err(), DecodeError::UnknownCodec(999));
}

#[test]
fn test_unknown_type_tag() {
    let codec = registry();
    let envelope = PayloadEnvelope {
        bytes: b"{}".to_vec(),
        codec_id: JSON_ID,
        type_tag: "shop.Refund".to_string(),
    };
    assert_eq!(
        codec.decode(&envelope).unwrap_err(),
        DecodeError::UnknownTypeTag {
            codec_id: JSON_ID,
            type_tag: "shop.Refund".to_string(),
        }
    );
}

#[test]
fn test_malformed_bytes() {
    let codec = registry();
    let envelope = PayloadEnvelope {
        bytes: b"{not json".to_vec(),
        codec_id: JSON_ID,
        type_tag: "shop.Order".to_string(),
    };
    match codec.decode(&envelope).unwrap_err() {
        DecodeError::Malformed {
            codec_id, type_tag, ..
        } => {
            assert_eq!(codec_id, JSON_ID);
            assert_eq!(type_tag, "shop.Order");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let invalid_utf8 = PayloadEnvelope {
        bytes: vec![0xff, 0xfe],
        codec_id: UTF8_ID,
        type_tag: String::new(),
    };
    assert!(matches!(
        codec.decode(&invalid_utf8),
        Err(DecodeError::Malformed { .. })
    ));
}

#[test]
fn test_binary_rejects_trailing_bytes() {
    let codec = registry();
    let mut envelope = codec.encode(&Message::new(Ping(1))).unwrap();
    envelope.bytes.push(0);
    assert!(matches!(
        codec.decode(&envelope),
        Err(DecodeError::Malformed { .. })
    ));
}

#[test]
fn test_no_route_found_is_built_in() {
    let codec = CodecRegistry::with_defaults();
    let message = Message::new(NoRouteFound {
        path: "/user/missing".to_string(),
    });
    let envelope = codec.encode(&message).unwrap();
    assert_eq!(envelope.type_tag, NO_ROUTE_FOUND_TAG);

    let decoded = codec.decode(&envelope).unwrap();
    assert_eq!(
        decoded.downcast_ref::<NoRouteFound>().map(|n| n.path.as_str()),
        Some("/user/missing")
    );
}

#[test]
fn test_later_binding_replaces_earlier() {
    let codec = CodecRegistry::builder()
        .register_as::<Order, _>("v1.Order", Json)
        .register_as::<Order, _>("v2.Order", Binary)
        .build();
    assert_eq!(codec.len(), 1);

    let order = Order {
        id: 1,
        item: "bolt".to_string(),
        quantity: 10,
    };
    let envelope = codec.encode(&Message::new(order)).unwrap();
    assert_eq!(envelope.codec_id, BINARY_ID);
    assert_eq!(envelope.type_tag, "v2.Order");
    assert!(codec.decode(&envelope).unwrap().is::<Order>());

    // Nothing is bound under the old tag any more
    let stale = PayloadEnvelope {
        bytes: br#"{"id":1,"item":"bolt","quantity":10}"#.to_vec(),
        codec_id: JSON_ID,
        type_tag: "v1.Order".to_string(),
    };
    assert_eq!(codec.decode(&stale).unwrap_err(), DecodeError::UnknownCodec(JSON_ID));

    let same_codec = CodecRegistry::builder()
        .register_as::<Order, _>("v1.Order", Json)
        .register_as::<Order, _>("v2.Order", Json)
        .build();
    let stale = PayloadEnvelope {
        type_tag: "v1.Order".to_string(),
        ..stale
    };
    assert!(matches!(
        same_codec.decode(&stale),
        Err(DecodeError::UnknownTypeTag { .. })
    ));
}

#[test]
fn test_register_uses_type_name_as_tag() {
    let codec = CodecRegistry::builder().register::<Ping, _>(Json).build();
    let envelope = codec.encode(&Message::new(Ping(5))).unwrap();
    assert_eq!(envelope.type_tag, std::any::type_name::<Ping>());
}

#[test]
fn test_empty_registry() {
    let codec = CodecRegistry::builder().build();
    assert!(codec.is_empty());
    assert!(matches!(
        codec.encode(&Message::from("x")),
        Err(EncodeError::NoSerializer(_))
    ));
}

proptest! {
    #[test]
    fn prop_string_round_trip(s in ".*") {
        let codec = registry();
        let envelope = codec.encode(&Message::from(s.clone())).unwrap();
        let decoded = codec.decode(&envelope).unwrap();
        prop_assert_eq!(decoded.downcast_ref::<String>(), Some(&s));
    }

    #[test]
    fn prop_order_round_trip(id in any::<u64>(), item in "[a-z]{0,16}", quantity in any::<u32>()) {
        let codec = registry();
        let order = Order { id, item, quantity };
        let envelope = codec.encode(&Message::new(order.clone())).unwrap();
        let decoded = codec.decode(&envelope).unwrap();
        prop_assert_eq!(decoded.downcast_ref::<Order>(), Some(&order));
    }
}
