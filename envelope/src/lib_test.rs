use super::*;

fn board_key() -> ChannelKey {
    ChannelKey::new("paintboard", "")
}

#[test]
fn join_envelope_uses_wire_field_names() {
    let text = encode_envelope(&Outgoing::join(&board_key(), "")).expect("encode");
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(
        value,
        serde_json::json!({
            "type": "join_channel",
            "channel": "paintboard",
            "channel_param": "",
            "exclusive_key": "",
        })
    );
}

#[test]
fn disconnect_envelope_carries_exclusive_key() {
    let key = ChannelKey::new("chat", "room-1");
    let text = encode_envelope(&Outgoing::disconnect(&key, "me")).expect("encode");
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value["type"], "disconnect_channel");
    assert_eq!(value["channel_param"], "room-1");
    assert_eq!(value["exclusive_key"], "me");
}

#[test]
fn data_envelope_nests_payload() {
    let text = encode_envelope(&Outgoing::data(&board_key(), serde_json::json!({"k": 1}))).expect("encode");
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value["type"], "data");
    assert_eq!(value["data"]["k"], 1);
}

#[test]
fn decode_join_result() {
    let incoming = decode_envelope(
        r#"{"_ws_type":"join_result","_channel":"paintboard","_channel_param":"","client_number":3,"welcome_message":"hi"}"#,
    )
    .expect("decode");
    assert_eq!(
        incoming,
        Incoming::JoinResult {
            channel: "paintboard".to_owned(),
            channel_param: String::new(),
            welcome_message: Some(Value::String("hi".to_owned())),
            client_number: Some(3),
        }
    );
    assert_eq!(incoming.channel_key(), board_key());
}

#[test]
fn decode_heartbeat_without_optional_fields() {
    let incoming = decode_envelope(r#"{"_ws_type":"heartbeat","_channel":"paintboard","_channel_param":""}"#)
        .expect("decode");
    assert!(matches!(incoming, Incoming::Heartbeat { client_number: None, .. }));
}

#[test]
fn decode_broadcast_keeps_payload_fields_only() {
    let incoming = decode_envelope(
        r#"{"_ws_type":"server_broadcast","_channel":"paintboard","_channel_param":"","type":"paintboard_update","x":4,"y":7,"color":12}"#,
    )
    .expect("decode");
    let Incoming::ServerBroadcast { payload, .. } = incoming else {
        panic!("expected broadcast");
    };
    assert!(!payload.contains_key("_channel"));
    assert!(!payload.contains_key("_ws_type"));
    assert_eq!(
        decode_broadcast(&payload).expect("payload"),
        Broadcast::PaintboardUpdate { x: 4, y: 7, color: 12 }
    );
}

#[test]
fn decode_unknown_broadcast_type_is_other() {
    let mut payload = Map::new();
    payload.insert("type".to_owned(), Value::String("chat".to_owned()));
    payload.insert("text".to_owned(), Value::String("hello".to_owned()));
    assert_eq!(decode_broadcast(&payload).expect("payload"), Broadcast::Other);
}

#[test]
fn decode_malformed_update_is_error() {
    let mut payload = Map::new();
    payload.insert("type".to_owned(), Value::String("paintboard_update".to_owned()));
    payload.insert("x".to_owned(), Value::String("left".to_owned()));
    assert!(decode_broadcast(&payload).is_err());
}

#[test]
fn decode_kickoff_routes_to_channel() {
    let incoming = decode_envelope(
        r#"{"_ws_type":"exclusive_kickoff","_channel":"chat","_channel_param":"42","reason":"dup"}"#,
    )
    .expect("decode");
    assert_eq!(incoming.channel_key(), ChannelKey::new("chat", "42"));
}

#[test]
fn decode_unknown_ws_type_is_error() {
    let err = decode_envelope(r#"{"_ws_type":"mystery","_channel":"a","_channel_param":""}"#)
        .expect_err("unknown tag should fail");
    assert!(matches!(err, CodecError::Json(_)));
}

#[test]
fn decode_non_json_is_error() {
    assert!(decode_envelope("not json").is_err());
}

#[test]
fn channel_key_display_includes_param_when_present() {
    assert_eq!(board_key().to_string(), "paintboard");
    assert_eq!(ChannelKey::new("chat", "7").to_string(), "chat.7");
}
