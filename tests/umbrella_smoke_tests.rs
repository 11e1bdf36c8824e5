//! Smoke tests over the umbrella crate's public surface: the member crates
//! re-export and interoperate without reaching for any internals.

use percept::protocol::{
    decode, encode, Frame, FromClient, PayloadType, ResultWrapper, StatusCode, ToClient, Welcome,
};

#[test]
fn protocol_round_trips_through_the_umbrella() {
    let input = FromClient::Input {
        source_name: "camera".to_string(),
        frame_id: 1,
        target_engines: Vec::new(),
        frame: Frame::new(PayloadType::Image, vec![0x42]),
    };
    let decoded: FromClient = decode(&encode(&input).unwrap()).unwrap();
    assert_eq!(decoded, input);

    let response = ToClient::response(
        "camera",
        1,
        true,
        ResultWrapper::from_status(StatusCode::Success),
    )
    .unwrap();
    let decoded: ToClient = decode(&encode(&response).unwrap()).unwrap();
    assert_eq!(decoded, response);
}

#[test]
fn default_configuration_is_valid() {
    let config = percept::config::PerceptConfig::default();
    percept::config::validate_config(&config).unwrap();
    assert_eq!(config.broker.num_tokens_per_source, 2);
}

#[test]
fn welcome_carries_the_advertised_source_set() {
    let welcome = Welcome {
        sources_consumed: vec!["camera".to_string()],
        num_tokens_per_source: 2,
    };
    let envelope = ToClient::Welcome(welcome.clone());
    match decode::<ToClient>(&encode(&envelope).unwrap()).unwrap() {
        ToClient::Welcome(decoded) => assert_eq!(decoded, welcome),
        other => panic!("expected welcome, got {:?}", other),
    }
}

#[tokio::test]
async fn broker_types_are_reachable_for_embedders() {
    use bytes::Bytes;
    let id = percept::broker::ClientId::from_bytes(Bytes::from_static(b"client"));
    let mut hub = percept::broker::SessionHub::new(2);
    hub.add_source_consumed("camera").await;
    assert_eq!(hub.sources_consumed(), ["camera".to_string()]);
    assert_eq!(hub.client_count(), 0);
    hub.on_disconnect(&id);
}
