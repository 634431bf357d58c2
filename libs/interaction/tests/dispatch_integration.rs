//! # Consumer / Provider Integration Tests
//!
//! Two MAL instances connected through loopback endpoints: every pattern is
//! driven from a consumer on one instance to a provider on the other.

mod common;

use bytes::Bytes;
use common::{element, wait_until, Network, TestProvider, REJECTED, SERVICE, SERVICE_AREA};
use futures::future::join_all;
use mal_config::MalConfig;
use mal_interaction::test_utils::{NoopProvider, RecordingListener};
use mal_interaction::{Consumer, MalError, MalInstance, MessageDetails};
use mal_types::{stages, standard_errors, InteractionType, MessageBody, QosLevel, ServiceKey};
use std::sync::Arc;
use std::time::Duration;

const CONSUMER_URI: &str = "malloop://ground/consumer";
const PROVIDER_URI: &str = "malloop://space/provider";

struct Setup {
    network: Network,
    consumer_mal: MalInstance,
    provider_mal: MalInstance,
    provider: Arc<TestProvider>,
    consumer: Consumer,
}

fn service() -> ServiceKey {
    ServiceKey::new(SERVICE_AREA, SERVICE, 0, 1)
}

fn setup() -> Setup {
    let mut config = MalConfig::default();
    config.consumer.wait_timeout_ms = 2_000;

    let network = Network::new();
    let consumer_mal = MalInstance::new(config.clone());
    let provider_mal = MalInstance::new(config);

    let provider = Arc::new(TestProvider::default());
    let provider_endpoint = network.endpoint(PROVIDER_URI, &provider_mal);
    provider_mal.register_provider(provider_endpoint, service(), Bytes::from_static(b"space"), provider.clone());

    let consumer_endpoint = network.endpoint(CONSUMER_URI, &consumer_mal);
    let details = MessageDetails::new(consumer_endpoint, PROVIDER_URI, service())
        .with_qos(QosLevel::Assured, 2);
    let consumer = consumer_mal.create_consumer(details);

    Setup {
        network,
        consumer_mal,
        provider_mal,
        provider,
        consumer,
    }
}

#[test_log::test(tokio::test)]
async fn test_request_response_roundtrip() {
    let setup = setup();

    let response = setup
        .consumer
        .request(3, MessageBody::elements([element("ping")]))
        .await
        .unwrap();

    assert_eq!(response.header.interaction_type, InteractionType::Request);
    assert_eq!(response.header.interaction_stage, Some(stages::REQUEST_RESPONSE_STAGE));
    assert_eq!(response.header.uri_from, PROVIDER_URI);
    assert_eq!(response.header.qos_level, QosLevel::Assured);
    assert_eq!(response.header.service.operation, 3);
    assert_eq!(response.body, MessageBody::elements([element("ping")]));
    assert!(setup.consumer_mal.consumer_table().is_empty());
}

#[tokio::test]
async fn test_submit_handler_error_returned_at_ack_stage() {
    let setup = setup();

    let err = setup.consumer.submit(1, MessageBody::Empty).await.unwrap_err();
    match err {
        MalError::Standard(error) => {
            assert_eq!(error.error_number, REJECTED);
            assert_eq!(error.extra_information.as_deref(), Some("empty submit"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let ack = setup
        .consumer
        .submit(1, MessageBody::elements([element("ok")]))
        .await
        .unwrap();
    assert_eq!(ack.header.interaction_stage, Some(stages::SUBMIT_ACK_STAGE));
}

#[tokio::test]
async fn test_sync_invoke() {
    let setup = setup();

    let (ack, pending) = setup
        .consumer
        .invoke(5, MessageBody::elements([element("slew")]))
        .await
        .unwrap();
    assert_eq!(ack.header.interaction_stage, Some(stages::INVOKE_ACK_STAGE));
    assert_eq!(ack.transaction_id(), Some(pending.transaction_id()));

    let response = pending.next_stage().await.unwrap();
    assert_eq!(response.header.interaction_stage, Some(stages::INVOKE_RESPONSE_STAGE));
    assert!(!pending.is_pending());
}

#[tokio::test]
async fn test_async_progress_reports_every_stage() {
    let setup = setup();
    let listener = Arc::new(RecordingListener::new());

    setup
        .consumer
        .async_progress(
            6,
            MessageBody::elements([element("a"), element("b"), element("c")]),
            listener.clone(),
        )
        .await
        .unwrap();

    assert!(wait_until(|| listener.callbacks().len() == 5).await);
    assert_eq!(
        listener.callbacks(),
        vec![
            "progress_ack_received",
            "progress_update_received",
            "progress_update_received",
            "progress_update_received",
            "progress_response_received"
        ]
    );
    assert!(wait_until(|| setup.consumer_mal.consumer_table().is_empty()).await);
}

#[tokio::test]
async fn test_unbound_service_returns_destination_unknown() {
    let setup = setup();
    let other_service = ServiceKey::new(SERVICE_AREA, SERVICE + 1, 1, 1);
    let details = MessageDetails::new(
        setup.network.endpoint("malloop://ground/other", &setup.consumer_mal),
        PROVIDER_URI,
        other_service,
    );
    let consumer = setup.consumer_mal.create_consumer(details);

    let err = consumer.request(1, MessageBody::Empty).await.unwrap_err();
    assert!(matches!(
        err,
        MalError::Standard(ref e) if e.error_number == standard_errors::DESTINATION_UNKNOWN
    ));
}

#[tokio::test]
async fn test_unimplemented_operation_is_unsupported() {
    let setup = setup();
    let noop_service = ServiceKey::new(9, 9, 0, 1);
    setup.provider_mal.register_provider(
        setup.network.endpoint("malloop://space/noop", &setup.provider_mal),
        noop_service,
        Bytes::new(),
        Arc::new(NoopProvider),
    );
    let details = MessageDetails::new(
        setup.network.endpoint("malloop://ground/noop-client", &setup.consumer_mal),
        "malloop://space/noop",
        noop_service,
    );

    let listener = Arc::new(RecordingListener::new());
    setup
        .consumer_mal
        .create_consumer(details)
        .async_invoke(1, MessageBody::Empty, listener.clone())
        .await
        .unwrap();

    assert!(wait_until(|| !listener.callbacks().is_empty()).await);
    assert_eq!(listener.callbacks(), vec!["invoke_ack_error_received"]);
    assert_eq!(
        listener.last_error().map(|e| e.error_number),
        Some(standard_errors::UNSUPPORTED_OPERATION)
    );
}

#[tokio::test]
async fn test_concurrent_requests_correlate() {
    let setup = setup();
    let payloads: Vec<String> = (0..32).map(|i| format!("payload-{i}")).collect();

    let responses = join_all(payloads.iter().map(|payload| {
        let consumer = setup.consumer.clone();
        let body = MessageBody::elements([Bytes::from(payload.clone())]);
        async move { consumer.request(2, body).await }
    }))
    .await;

    for (payload, response) in payloads.iter().zip(responses) {
        let response = response.unwrap();
        assert_eq!(response.body, MessageBody::elements([Bytes::from(payload.clone())]));
    }
    assert_eq!(setup.provider.received.lock().len(), 32);
    assert!(setup.consumer_mal.consumer_table().is_empty());
}

#[tokio::test]
async fn test_wait_times_out_when_provider_is_gone() {
    let setup = setup();
    let consumer = setup.consumer.clone().with_wait_timeout(Duration::from_millis(50));
    setup.provider_mal.close_endpoint(PROVIDER_URI);
    setup.network.disconnect(CONSUMER_URI);

    let err = consumer.request(1, MessageBody::Empty).await.unwrap_err();
    assert!(matches!(err, MalError::Timeout { timeout_ms: 50, .. }));
    assert!(setup.consumer_mal.consumer_table().is_empty());
}

#[tokio::test]
async fn test_close_fails_pending_interactions() {
    let setup = setup();
    setup.network.disconnect(CONSUMER_URI);

    let consumer = setup.consumer.clone();
    let call = tokio::spawn(async move { consumer.request(1, MessageBody::Empty).await });
    assert!(wait_until(|| setup.consumer_mal.consumer_table().len() == 1).await);

    setup.consumer_mal.close().await.unwrap();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        MalError::Standard(ref e) if e.error_number == standard_errors::SHUTDOWN
    ));
}

#[tokio::test]
async fn test_transmit_error_terminates_async_interaction() {
    let setup = setup();
    setup.network.disconnect(CONSUMER_URI);
    let listener = Arc::new(RecordingListener::new());

    let tid = setup
        .consumer
        .async_request(1, MessageBody::Empty, listener.clone())
        .await
        .unwrap();
    let outgoing = setup
        .consumer
        .details()
        .header(InteractionType::Request, Some(stages::REQUEST_STAGE), 1)
        .with_transaction_id(tid);

    setup
        .consumer_mal
        .dispatcher()
        .on_transmit_error(CONSUMER_URI, Some(&outgoing), MalError::transport("link lost"))
        .await;

    assert_eq!(listener.callbacks(), vec!["request_error_received"]);
    assert_eq!(
        listener.last_error().map(|e| e.error_number),
        Some(standard_errors::DELIVERY_FAILED)
    );
    assert!(!setup.consumer_mal.consumer_table().contains(tid));
}

#[tokio::test]
async fn test_continue_interaction_after_restart() {
    let setup = setup();
    let listener = Arc::new(RecordingListener::new());

    // The ack of transaction 4242 was seen before the restart; only the
    // response is still to come
    setup
        .consumer
        .continue_interaction(InteractionType::Invoke, stages::INVOKE_ACK_STAGE, 4242, listener.clone())
        .unwrap();

    let response_header = setup
        .consumer
        .details()
        .header(InteractionType::Invoke, Some(stages::INVOKE_STAGE), 1)
        .with_transaction_id(4242)
        .reply(stages::INVOKE_RESPONSE_STAGE, false);
    setup
        .consumer_mal
        .dispatcher()
        .on_message(
            setup.consumer.details().endpoint.clone(),
            mal_types::MalMessage::new(response_header, MessageBody::Empty),
        )
        .await;

    assert_eq!(listener.callbacks(), vec!["invoke_response_received"]);
}
