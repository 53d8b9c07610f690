//! End-to-end pipeline tests: connection or payload source in, events out.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

use gateway_relay::cache::MemberKey;
use gateway_relay::session::{Handshake, SessionUpdate};
use gateway_relay::transport::{memory, PayloadHandler, PayloadSink, PayloadSource, TransportError};
use gateway_relay::{
    ChannelConnection, ClientBuilder, ConnectionHandle, DomainEvent, EventKind, EventSubscription,
    GatewayClient, GatewayStrategy, Opcode, RawPayload, ShardInfo, Snowflake,
};

const GUILD_ID: u64 = 123456789012345678;

fn standalone() -> (GatewayClient, ConnectionHandle) {
    let (connection, handle) = ChannelConnection::new();
    let client = ClientBuilder::new()
        .build(Some(Arc::new(connection)))
        .unwrap();
    (client, handle)
}

fn channel_create(sequence: u64, id: u64) -> RawPayload {
    RawPayload::dispatch(
        "CHANNEL_CREATE",
        sequence,
        json!({"id": id.to_string(), "type": 0, "guild_id": GUILD_ID.to_string(), "name": "general"}),
    )
}

fn member_add(sequence: u64, user_id: u64) -> RawPayload {
    RawPayload::dispatch(
        "GUILD_MEMBER_ADD",
        sequence,
        json!({
            "guild_id": GUILD_ID.to_string(),
            "user": {"id": user_id.to_string(), "username": "someone"},
            "roles": []
        }),
    )
}

async fn next_event(events: &mut EventSubscription) -> DomainEvent {
    timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timeout")
        .expect("bus completed")
}

fn channel_id(event: &DomainEvent) -> Option<u64> {
    match event {
        DomainEvent::ChannelCreate { channel } => Some(channel.id.get()),
        _ => None,
    }
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<RawPayload>>,
}

#[async_trait]
impl PayloadHandler for Recorder {
    async fn handle(&self, payload: RawPayload) -> Result<(), TransportError> {
        self.seen.lock().unwrap().push(payload);
        Ok(())
    }
}

#[tokio::test]
async fn test_sharded_guild_create_is_cached() {
    let (connection, handle) = ChannelConnection::new();
    let client = ClientBuilder::new()
        .shard(ShardInfo::new(0, 2).unwrap())
        .build(Some(Arc::new(connection)))
        .unwrap();
    let mut events = client.bus().subscribe();

    handle.deliver(RawPayload::dispatch(
        "GUILD_CREATE",
        1,
        json!({"id": GUILD_ID.to_string(), "name": "Relay Test", "member_count": 3}),
    ));

    let event = next_event(&mut events).await;
    assert_eq!(event.kind(), EventKind::GuildCreate);
    assert_eq!(event.guild_id(), Some(Snowflake(GUILD_ID)));

    let cached = client.cache().guild(Snowflake(GUILD_ID)).expect("guild cached");
    assert_eq!(cached.name.as_deref(), Some("Relay Test"));
    assert_eq!(cached.member_count, 3);
    assert_eq!(
        client.mediator().translation_scope().shard,
        Some(ShardInfo::new(0, 2).unwrap())
    );

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resume_passes_both_dispatches_through() {
    let (client, handle) = standalone();
    let mut events = client.bus().subscribe();
    let updates = client.session_updates();

    updates.send(SessionUpdate::Identifying).unwrap();
    updates
        .send(SessionUpdate::Ready {
            session_id: "session-1".to_string(),
        })
        .unwrap();

    handle.deliver(channel_create(5, 1));
    updates.send(SessionUpdate::Sequence(5)).unwrap();
    assert_eq!(channel_id(&next_event(&mut events).await), Some(1));

    // Socket drops and the session is resumed underneath the strategy
    updates
        .send(SessionUpdate::Disconnected { resumable: true })
        .unwrap();
    updates.send(SessionUpdate::Resuming).unwrap();
    updates.send(SessionUpdate::Resumed).unwrap();

    handle.deliver(channel_create(6, 2));
    updates.send(SessionUpdate::Sequence(6)).unwrap();
    assert_eq!(channel_id(&next_event(&mut events).await), Some(2));

    let mut handshake = None;
    for _ in 0..100 {
        handshake = Some(client.identify_options().handshake());
        if handshake
            == Some(Handshake::Resume {
                session_id: "session-1".to_string(),
                sequence: 6,
            })
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        handshake,
        Some(Handshake::Resume {
            session_id: "session-1".to_string(),
            sequence: 6,
        })
    );

    let stats = client.shutdown().await.unwrap();
    assert_eq!(stats.dispatches, 2);
    assert_eq!(stats.events, 2);
}

#[tokio::test]
async fn test_forwarding_sends_every_payload_and_no_events() {
    let (sink, source) = memory::channel(16);
    let (connection, handle) = ChannelConnection::new();
    let client = ClientBuilder::new()
        .strategy(GatewayStrategy::forwarding(Arc::new(sink)))
        .build(Some(Arc::new(connection)))
        .unwrap();
    let mut events = client.bus().subscribe();

    let payloads = vec![
        RawPayload::new(Opcode::Hello).with_data(json!({"heartbeat_interval": 41250})),
        RawPayload::dispatch("READY", 1, json!({"session_id": "abc"})),
        RawPayload::new(Opcode::HeartbeatAck),
        channel_create(2, 10),
    ];
    for payload in &payloads {
        handle.deliver(payload.clone());
    }
    drop(handle);

    let stats = timeout(Duration::from_secs(1), client.join())
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(stats.dispatches, 0);
    assert_eq!(stats.events, 0);
    assert_eq!(events.recv().await, None);

    let recorder = Recorder::default();
    timeout(Duration::from_secs(1), source.receive(&recorder))
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(*recorder.seen.lock().unwrap(), payloads);
}

/// Sink that takes a while per payload, recording sequences.
#[derive(Default)]
struct SlowSink {
    sequences: Mutex<Vec<u64>>,
}

#[async_trait]
impl PayloadSink for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    async fn publish(&self, payload: &RawPayload) -> Result<(), TransportError> {
        tokio::time::sleep(Duration::from_micros(200)).await;
        self.sequences.lock().unwrap().extend(payload.s);
        Ok(())
    }
}

#[tokio::test]
async fn test_forwarding_slow_sink_loses_nothing() {
    let sink = Arc::new(SlowSink::default());
    let (connection, handle) = ChannelConnection::new();
    let client = ClientBuilder::new()
        .strategy(GatewayStrategy::forwarding(sink.clone()))
        .build(Some(Arc::new(connection)))
        .unwrap();

    // Delivered in one burst, far ahead of the sink
    for sequence in 1..=1500 {
        assert_eq!(handle.deliver(channel_create(sequence, sequence)), 1);
    }
    drop(handle);

    timeout(Duration::from_secs(30), client.join())
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(
        *sink.sequences.lock().unwrap(),
        (1..=1500).collect::<Vec<u64>>()
    );
}

#[tokio::test]
async fn test_receiving_translates_dispatches_in_order() {
    let (sink, source) = memory::channel(16);
    sink.publish(&RawPayload::new(Opcode::Hello)).await.unwrap();
    sink.publish(&channel_create(1, 21)).await.unwrap();
    sink.publish(&RawPayload::new(Opcode::HeartbeatAck)).await.unwrap();
    sink.publish(&channel_create(2, 22)).await.unwrap();
    sink.publish(&RawPayload::new(Opcode::Reconnect)).await.unwrap();
    sink.publish(&channel_create(3, 23)).await.unwrap();
    drop(sink);

    let client = ClientBuilder::new()
        .strategy(GatewayStrategy::receiving(Arc::new(source)))
        .build(None)
        .unwrap();
    let mut events = client.bus().subscribe();

    let stats = timeout(Duration::from_secs(1), client.join())
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(stats.dispatches, 3);

    let mut ids = Vec::new();
    while let Some(event) = events.recv().await {
        ids.extend(channel_id(&event));
    }
    assert_eq!(ids, vec![21, 22, 23]);
}

#[tokio::test]
async fn test_late_subscriber_sees_only_later_events() {
    let (client, handle) = standalone();
    let mut early = client.bus().subscribe();

    handle.deliver(channel_create(1, 1));
    assert_eq!(channel_id(&next_event(&mut early).await), Some(1));

    let mut late = client.bus().subscribe();
    handle.deliver(channel_create(2, 2));
    handle.deliver(channel_create(3, 3));

    let early_ids = vec![
        channel_id(&next_event(&mut early).await),
        channel_id(&next_event(&mut early).await),
    ];
    let late_ids = vec![
        channel_id(&next_event(&mut late).await),
        channel_id(&next_event(&mut late).await),
    ];
    assert_eq!(early_ids, vec![Some(2), Some(3)]);
    assert_eq!(late_ids, early_ids);

    client.shutdown().await.unwrap();
    assert_eq!(late.recv().await, None);
}

#[tokio::test]
async fn test_unknown_kind_and_duplicate_member_add() {
    let (client, handle) = standalone();
    let mut events = client.bus().subscribe();

    handle.deliver(RawPayload::dispatch(
        "GUILD_CREATE",
        1,
        json!({"id": GUILD_ID.to_string(), "name": "Relay Test", "member_count": 0}),
    ));
    handle.deliver(RawPayload::dispatch("SOME_FUTURE_EVENT", 2, json!({"id": "5"})));
    handle.deliver(member_add(3, 77));
    handle.deliver(member_add(4, 77));
    handle.deliver(channel_create(5, 99));

    let mut kinds = Vec::new();
    loop {
        let event = next_event(&mut events).await;
        kinds.push(event.kind());
        if event.kind() == EventKind::ChannelCreate {
            break;
        }
    }
    assert_eq!(
        kinds,
        vec![
            EventKind::GuildCreate,
            EventKind::MemberJoin,
            EventKind::MemberJoin,
            EventKind::ChannelCreate,
        ]
    );

    let cache = client.cache();
    let guild = cache.guild(Snowflake(GUILD_ID)).unwrap();
    assert_eq!(guild.member_count, 1);
    assert!(cache
        .member(MemberKey::new(Snowflake(GUILD_ID), Snowflake(77)))
        .is_some());

    let stats = client.shutdown().await.unwrap();
    assert_eq!(stats.dispatches, 5);
    assert_eq!(stats.events, 4);
}

#[tokio::test]
async fn test_resumed_with_null_data_emits_no_event() {
    let (client, handle) = standalone();
    let mut events = client.bus().subscribe();

    handle.deliver(
        serde_json::from_str(r#"{"op":0,"s":1,"t":"RESUMED","d":null}"#).unwrap(),
    );
    handle.deliver(RawPayload::dispatch("RESUMED", 2, json!({"_trace": []})));

    assert_eq!(next_event(&mut events).await, DomainEvent::Resumed);

    let stats = client.shutdown().await.unwrap();
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.events, 1);
    assert_eq!(events.recv().await, None);
}
