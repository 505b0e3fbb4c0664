//! End-to-end service tests against the simulated broker.
//!
//! Every test runs on tokio's paused clock: reconnect backoff and typing
//! expiry elapse in virtual time, so the schedules are asserted exactly.

use std::time::Duration;

use rxchat_app::{
    ChatConfig, ChatEvent, ChatService, ClientConfig, ConnectionState, Credentials, MessageId,
    MessageStatus, ServiceError, StoreSnapshot,
};
use rxchat_client::{ClientError, DEFAULT_TYPING_EXPIRY};
use rxchat_core::ConnectionError;
use rxchat_harness::{InvariantRegistry, SimBroker, SimEnv, init_test_tracing};
use rxchat_proto::{ClientFrame, Destination, Role, Topic};
use serde_json::json;
use tokio::{sync::broadcast, time::Instant};

const PATIENT: u64 = 11;
const PHARMACIST: u64 = 22;
const ROOM: u64 = 4;

fn patient() -> Credentials {
    Credentials::new("patient-token", PATIENT, Role::Customer)
}

fn pharmacist() -> Credentials {
    Credentials::new("pharmacist-token", PHARMACIST, Role::Pharmacist)
}

fn setup() -> (SimEnv, SimBroker) {
    init_test_tracing();
    let env = SimEnv::new();
    let broker = SimBroker::new(env.clone());
    (env, broker)
}

fn service(env: &SimEnv, broker: &SimBroker) -> ChatService<SimEnv> {
    ChatService::create(env.clone(), broker.clone(), ChatConfig::default())
}

/// Let spawned tasks run until idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn wait_until(service: &ChatService<SimEnv>, condition: impl FnMut(&StoreSnapshot) -> bool) {
    let mut snapshots = service.watch();
    tokio::time::timeout(Duration::from_secs(120), snapshots.wait_for(condition))
        .await
        .expect("condition not reached in time")
        .expect("service stopped");
}

fn drain(events: &mut broadcast::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn check_invariants(service: &ChatService<SimEnv>, context: &str) {
    InvariantRegistry::standard().assert_all(&service.snapshot(), context);
}

#[tokio::test(start_paused = true)]
async fn connect_authenticates() {
    let (env, broker) = setup();
    let service = service(&env, &broker);

    service.connect(patient()).await.unwrap();
    wait_until(&service, |s| s.connection == ConnectionState::Connected).await;

    assert_eq!(broker.session_count(), 1);
    assert!(matches!(
        broker.received().first(),
        Some(ClientFrame::Auth { token, user_id: PATIENT, role: Role::Customer }) if token == "patient-token"
    ));

    service.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn failed_opens_back_off_exponentially() {
    let (env, broker) = setup();
    let service = service(&env, &broker);
    let mut events = service.events();
    broker.fail_next_opens(3);

    let started = Instant::now();
    service.connect(patient()).await.unwrap();

    let delays: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            ChatEvent::RetryScheduled { delay, .. } => Some(delay),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![
        Duration::from_secs(1),
        Duration::from_secs(2),
        Duration::from_secs(4)
    ]);
    assert!(started.elapsed() >= Duration::from_secs(7));
    assert_eq!(broker.open_attempts(), 4);
    wait_until(&service, |s| s.connection == ConnectionState::Connected).await;
    assert_eq!(service.snapshot().reconnect_attempt, 0);

    service.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn initial_connect_gives_up_after_attempt_ceiling() {
    let (env, broker) = setup();
    let service = service(&env, &broker);
    broker.fail_next_opens(100);

    let result = service.connect(patient()).await;

    assert!(matches!(
        result,
        Err(ServiceError::Connection(ConnectionError::RetriesExhausted { attempts: 5, .. }))
    ));
    assert_eq!(broker.open_attempts(), 5);
    wait_until(&service, |s| s.connection == ConnectionState::Disconnected).await;

    service.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_token_fails_without_retrying() {
    let (env, broker) = setup();
    let service = service(&env, &broker);
    broker.reject_token("patient-token");

    let result = service.connect(patient()).await;

    assert!(matches!(
        result,
        Err(ServiceError::Connection(ConnectionError::AuthRejected { .. }))
    ));
    settle().await;
    assert_eq!(broker.open_attempts(), 1);

    service.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_connect() {
    let (env, broker) = setup();
    let service = service(&env, &broker);
    broker.fail_next_opens(100);

    let (connected, disconnected) = tokio::join!(service.connect(patient()), async {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        service.disconnect().await
    });

    assert_eq!(connected, Err(ServiceError::Connection(ConnectionError::Cancelled)));
    assert_eq!(disconnected, Ok(()));
    assert_eq!(service.snapshot().connection, ConnectionState::Disconnected);

    service.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn lost_session_reconnects_and_resubscribes() {
    let (env, broker) = setup();
    let service = service(&env, &broker);
    service.connect(patient()).await.unwrap();
    service.set_active_thread(Some(ROOM)).await.unwrap();
    settle().await;
    assert_eq!(broker.subscribers(Topic::messages(ROOM)), 1);

    let mut events = service.events();
    broker.drop_sessions();
    wait_until(&service, |s| s.connection == ConnectionState::Reconnecting).await;
    wait_until(&service, |s| s.connection == ConnectionState::Connected).await;
    settle().await;

    assert!(drain(&mut events).contains(&ChatEvent::Connected { resumed: true }));
    assert_eq!(broker.subscribers(Topic::messages(ROOM)), 1);
    assert_eq!(broker.subscribers(Topic::typing(ROOM)), 1);
    assert_eq!(service.snapshot().active_thread, Some(ROOM));

    service.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn optimistic_send_is_replaced_by_echo() {
    let (env, broker) = setup();
    let service = service(&env, &broker);
    service.connect(patient()).await.unwrap();
    service.set_active_thread(Some(ROOM)).await.unwrap();
    let mut events = service.events();

    broker.hold();
    let local_id = service.send_message(ROOM, "Do you stock ibuprofen 400?").await.unwrap();
    settle().await;

    let pending = service.snapshot().messages(ROOM).to_vec();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, MessageId::Local(local_id));
    assert_eq!(pending[0].status, MessageStatus::Pending);

    broker.release();
    wait_until(&service, |s| {
        s.messages(ROOM).first().is_some_and(|m| m.status == MessageStatus::Delivered)
    })
    .await;

    let snapshot = service.snapshot();
    let messages = snapshot.messages(ROOM);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, MessageId::Server("srv-1".into()));
    assert_eq!(messages[0].replaced_local, Some(local_id));
    assert!(drain(&mut events).contains(&ChatEvent::MessageConfirmed {
        thread_id: ROOM,
        local_id,
        server_id: "srv-1".into(),
    }));
    check_invariants(&service, "after reconciliation");

    service.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn redelivered_broadcast_is_stored_once() {
    let (env, broker) = setup();
    let service = service(&env, &broker);
    service.connect(patient()).await.unwrap();
    service.set_active_thread(Some(ROOM)).await.unwrap();
    settle().await;

    let body = json!({
        "messageId": 99,
        "chatRoomId": ROOM,
        "fromUserId": PHARMACIST,
        "text": "Yes, we have it in stock.",
        "createdAt": "2025-01-01T00:00:05"
    });
    broker.inject(Topic::messages(ROOM), &body);
    broker.inject(Topic::messages(ROOM), &body);
    settle().await;

    let snapshot = service.snapshot();
    let messages = snapshot.messages(ROOM);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, MessageId::Server("99".into()));
    assert_eq!(messages[0].sender_id, PHARMACIST);
    check_invariants(&service, "after redelivery");

    service.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn switching_threads_moves_the_live_subscription() {
    let (env, broker) = setup();
    let service = service(&env, &broker);
    service.connect(patient()).await.unwrap();

    service.set_active_thread(Some(ROOM)).await.unwrap();
    service.set_active_thread(Some(ROOM + 1)).await.unwrap();
    settle().await;

    assert_eq!(broker.subscribers(Topic::messages(ROOM)), 0);
    assert_eq!(broker.subscribers(Topic::messages(ROOM + 1)), 1);
    assert!(broker.received().iter().any(|frame| matches!(
        frame,
        ClientFrame::Publish { destination: Destination::Leave(ROOM), .. }
    )));

    // Late broadcast for the previous room
    broker.inject(
        Topic::messages(ROOM),
        &json!({"id": "late", "senderId": PHARMACIST, "content": "hi", "timestamp": 1_735_689_600}),
    );
    settle().await;
    assert!(service.snapshot().messages(ROOM).is_empty());

    service.set_active_thread(None).await.unwrap();
    settle().await;
    assert_eq!(broker.subscribers(Topic::messages(ROOM + 1)), 0);

    service.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn remote_typing_indicator_expires() {
    let (env, broker) = setup();
    let service = service(&env, &broker);
    service.connect(patient()).await.unwrap();
    service.set_active_thread(Some(ROOM)).await.unwrap();
    settle().await;

    broker.inject(Topic::typing(ROOM), &json!({"userId": PHARMACIST, "isTyping": true}));
    wait_until(&service, |s| s.typing.get(&ROOM).is_some_and(|users| users.contains(&PHARMACIST)))
        .await;

    let seen = Instant::now();
    wait_until(&service, |s| s.typing.get(&ROOM).is_none_or(Vec::is_empty)).await;
    assert!(seen.elapsed() >= DEFAULT_TYPING_EXPIRY - Duration::from_millis(100));

    service.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn participants_see_each_other() {
    let (env, broker) = setup();
    let patient_service = service(&env, &broker);
    let pharmacist_service = service(&env, &broker);
    patient_service.connect(patient()).await.unwrap();
    pharmacist_service.connect(pharmacist()).await.unwrap();
    patient_service.set_active_thread(Some(ROOM)).await.unwrap();
    pharmacist_service.set_active_thread(Some(ROOM)).await.unwrap();
    settle().await;

    patient_service.set_typing(ROOM, true).await.unwrap();
    wait_until(&pharmacist_service, |s| {
        s.typing.get(&ROOM).is_some_and(|users| users.contains(&PATIENT))
    })
    .await;

    patient_service.send_message(ROOM, "Can I pick up today?").await.unwrap();
    wait_until(&pharmacist_service, |s| s.messages(ROOM).len() == 1).await;
    wait_until(&pharmacist_service, |s| s.typing.get(&ROOM).is_none_or(Vec::is_empty)).await;
    wait_until(&patient_service, |s| {
        s.messages(ROOM).first().is_some_and(|m| m.status == MessageStatus::Delivered)
    })
    .await;

    let seen = pharmacist_service.snapshot();
    assert_eq!(seen.messages(ROOM)[0].sender_id, PATIENT);
    assert_eq!(seen.messages(ROOM)[0].content, "Can I pick up today?");
    assert_eq!(
        patient_service.snapshot().messages(ROOM)[0].id,
        seen.messages(ROOM)[0].id
    );
    check_invariants(&patient_service, "patient");
    check_invariants(&pharmacist_service, "pharmacist");

    patient_service.dispose().await;
    pharmacist_service.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn undelivered_message_times_out_and_retries() {
    let (env, broker) = setup();
    let config = ChatConfig::default()
        .with_client(ClientConfig::default().with_delivery_timeout(Duration::from_secs(5)));
    let service = ChatService::create(env.clone(), broker.clone(), config);
    service.connect(patient()).await.unwrap();
    service.set_active_thread(Some(ROOM)).await.unwrap();
    let mut events = service.events();

    broker.hold();
    let local_id = service.send_message(ROOM, "Is my refill ready?").await.unwrap();
    wait_until(&service, |s| {
        s.messages(ROOM).first().is_some_and(|m| m.status == MessageStatus::Failed)
    })
    .await;
    assert!(drain(&mut events).contains(&ChatEvent::MessageFailed { thread_id: ROOM, local_id }));

    let retried = service.retry_message(ROOM, local_id).await.unwrap();
    assert_ne!(retried, local_id);

    let snapshot = service.snapshot();
    let messages = snapshot.messages(ROOM);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, MessageId::Local(retried));
    assert_eq!(messages[0].status, MessageStatus::Pending);

    service.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn send_requires_sign_in() {
    let (env, broker) = setup();
    let service = service(&env, &broker);

    let result = service.send_message(ROOM, "hello").await;

    assert_eq!(result, Err(ServiceError::Client(ClientError::NotSignedIn)));
    service.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn dispose_leaves_rooms_and_closes_the_session() {
    let (env, broker) = setup();
    let service = service(&env, &broker);
    service.connect(patient()).await.unwrap();
    service.set_active_thread(Some(ROOM)).await.unwrap();
    settle().await;

    service.dispose().await;
    settle().await;

    let received = broker.received();
    assert!(received.iter().any(|frame| matches!(
        frame,
        ClientFrame::Publish { destination: Destination::Leave(ROOM), .. }
    )));
    assert!(received.contains(&ClientFrame::Unsubscribe { topic: Topic::messages(ROOM) }));
    assert_eq!(broker.session_count(), 0);
}
