use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;

use flux_common::transport::{
    BusConfig, Correlation, FnHandler, HandlerError, MemoryHub, MessageBus, Payload, PayloadExt, ResponseError,
    fields, types,
};

fn bus_for(hub: &MemoryHub, request_timeout: Duration) -> MessageBus {
    MessageBus::new(
        hub.transport(),
        BusConfig {
            channel: Some("alice".into()),
            join_timeout: Duration::from_secs(2),
            request_timeout,
        },
    )
}

async fn ready(bus: &MessageBus) {
    bus.connect().unwrap();
    bus.wait_ready().await.unwrap();
}

/// Answers getProjectRequest with the callback id it was given.
fn responder(bus: &MessageBus, error: Option<&'static str>) {
    let reply = bus.downgrade();
    bus.add_message_handler(Arc::new(FnHandler::new(
        types::GET_PROJECT_REQUEST,
        move |request| {
            let Some(bus) = reply.upgrade() else {
                return Ok(());
            };
            let mut response = Payload::new()
                .with(fields::USERNAME, "alice")
                .with(fields::PROJECT, "web")
                .with(
                    fields::CALLBACK_ID,
                    request.get_i64(fields::CALLBACK_ID).unwrap_or_default(),
                );
            if let Some(error) = error {
                response = response.with(fields::ERROR, error);
            }
            bus.send(types::GET_PROJECT_RESPONSE, response)
                .map_err(HandlerError::other)
        },
    )));
}

fn project_request(callback_id: i64) -> Payload {
    Payload::new()
        .with(fields::USERNAME, "alice")
        .with(fields::PROJECT, "web")
        .with(fields::CALLBACK_ID, callback_id)
}

#[tokio::test]
async fn test_request_resolves_with_matching_response() {
    let hub = MemoryHub::new();
    let client = bus_for(&hub, Duration::from_secs(5));
    let server = bus_for(&hub, Duration::from_secs(5));
    responder(&server, None);
    ready(&client).await;
    ready(&server).await;

    let response = client
        .request(
            types::GET_PROJECT_REQUEST,
            project_request(17),
            types::GET_PROJECT_RESPONSE,
            Correlation::CallbackId(17),
        )
        .unwrap();
    let payload = response.wait().await.unwrap();

    assert_eq!(payload.get_str(fields::PROJECT), Some("web"));
    assert_eq!(client.handler_count(types::GET_PROJECT_RESPONSE), 0);
}

#[tokio::test]
async fn test_remote_error_is_distinct_from_timeout() {
    let hub = MemoryHub::new();
    let client = bus_for(&hub, Duration::from_secs(5));
    let server = bus_for(&hub, Duration::from_secs(5));
    responder(&server, Some("project not found"));
    ready(&client).await;
    ready(&server).await;

    let err = client
        .request(
            types::GET_PROJECT_REQUEST,
            project_request(3),
            types::GET_PROJECT_RESPONSE,
            Correlation::CallbackId(3),
        )
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    match err {
        ResponseError::Remote { message, .. } => assert_eq!(message, "project not found"),
        other => panic!("expected remote error, got {other:?}"),
    }
    assert_eq!(client.handler_count(types::GET_PROJECT_RESPONSE), 0);
}

#[tokio::test(start_paused = true)]
async fn test_request_times_out_and_deregisters() {
    let hub = MemoryHub::new();
    let client = bus_for(&hub, Duration::from_secs(30));
    ready(&client).await;

    let response = client
        .request(
            types::GET_PROJECT_REQUEST,
            project_request(9),
            types::GET_PROJECT_RESPONSE,
            Correlation::CallbackId(9),
        )
        .unwrap();
    assert_eq!(client.handler_count(types::GET_PROJECT_RESPONSE), 1);

    let err = response.wait().await.unwrap_err();

    assert!(matches!(err, ResponseError::Timeout { .. }));
    assert_eq!(client.handler_count(types::GET_PROJECT_RESPONSE), 0);
}

#[tokio::test]
async fn test_uncorrelated_response_is_ignored() {
    let hub = MemoryHub::new();
    let client = bus_for(&hub, Duration::from_secs(5));
    ready(&client).await;

    let response = client.expect_response(
        types::GET_PROJECT_RESPONSE,
        Correlation::CallbackId(1),
        Duration::from_secs(5),
    );
    hub.publish(
        "alice",
        types::GET_PROJECT_RESPONSE,
        Payload::new().with(fields::CALLBACK_ID, 2).with(fields::PROJECT, "other"),
    );
    hub.publish(
        "alice",
        types::GET_PROJECT_RESPONSE,
        Payload::new().with(fields::CALLBACK_ID, 1).with(fields::PROJECT, "web"),
    );

    let payload = response.wait().await.unwrap();
    assert_eq!(payload.get_str(fields::PROJECT), Some("web"));
}

#[tokio::test]
async fn test_dispose_rejects_pending_responses() {
    let hub = MemoryHub::new();
    let client = bus_for(&hub, Duration::from_secs(30));
    ready(&client).await;

    let response = client.expect_response(
        types::GET_RESOURCE_RESPONSE,
        Correlation::Username("alice".into()),
        Duration::from_secs(30),
    );
    client.dispose();

    let err = response.wait().await.unwrap_err();
    assert!(matches!(err, ResponseError::Disposed));
}

#[tokio::test]
async fn test_request_while_disconnected_fails_fast() {
    let hub = MemoryHub::new();
    let client = bus_for(&hub, Duration::from_secs(30));

    let err = client
        .request(
            types::GET_PROJECT_REQUEST,
            project_request(1),
            types::GET_PROJECT_RESPONSE,
            Correlation::CallbackId(1),
        )
        .err()
        .unwrap();

    assert!(matches!(err, ResponseError::Send(_)));
    assert_eq!(client.handler_count(types::GET_PROJECT_RESPONSE), 0);
    // Send errors report the bus's own diagnostic code.
    assert_eq!(
        err.code().map(|code| code.to_string()).as_deref(),
        Some("flux::transport::bus")
    );
}

#[test]
fn test_response_errors_carry_their_own_codes() {
    let timeout = ResponseError::Timeout {
        message_type: types::GET_PROJECT_RESPONSE.into(),
        timeout: Duration::from_secs(1),
    };

    assert_eq!(
        timeout.code().map(|code| code.to_string()).as_deref(),
        Some("flux::transport::response::timeout")
    );
    assert_eq!(
        ResponseError::Disposed.code().map(|code| code.to_string()).as_deref(),
        Some("flux::transport::response::disposed")
    );
}
