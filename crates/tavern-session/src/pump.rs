//! The two per-session loops that run once a session is registered.
//!
//! - [`read_loop`] turns inbound frames into hub commands.
//! - [`write_loop`] drains the outbound queue and keeps the socket alive
//!   with pings.
//!
//! They never share state: the read loop talks to the hub, the hub talks to
//! the write loop through the outbound queue. Closing that queue is how the
//! hub stops a write loop; closing the socket is how a read loop stops.

use std::future::Future;
use std::time::Duration;

use tavern_protocol::{ClientId, Codec, Envelope, MessageKind, RoomId};
use tavern_transport::{Connection, Inbound};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::{OutboundReceiver, SessionConfig, SessionError};

/// What a session needs from the hub.
///
/// Implemented by the hub's handle; tests use a recording fake.
pub trait HubLink: Send + Sync + 'static {
    /// Routes an envelope from `sender` to the sender's current room. The
    /// hub stamps `roomId` and `senderId` from its own records.
    fn publish(
        &self,
        sender: &ClientId,
        envelope: Envelope,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Moves `client` into `room`, leaving its current room first.
    fn join_room(
        &self,
        client: &ClientId,
        room: RoomId,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Takes `client` out of its current room.
    fn leave_room(
        &self,
        client: &ClientId,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Forgets `client`. Idempotent, and a no-op once the hub is gone.
    fn unregister(&self, client: &ClientId) -> impl Future<Output = ()> + Send;
}

/// Reads frames until the socket dies, then unregisters the session.
///
/// Any inbound traffic, pongs included, restarts the read deadline.
/// Malformed and protocol frames are dropped; the connection stays open.
pub async fn read_loop<C, H, K>(
    conn: &C,
    hub: &H,
    codec: &K,
    client: &ClientId,
    read_deadline: Duration,
) where
    C: Connection,
    H: HubLink,
    K: Codec,
{
    loop {
        let text = match time::timeout(read_deadline, conn.recv()).await {
            Ok(Ok(Some(Inbound::Text(text)))) => text,
            Ok(Ok(Some(Inbound::Heartbeat))) => continue,
            Ok(Ok(None)) => {
                tracing::debug!(client_id = %client, "peer closed the connection");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(client_id = %client, error = %e, "read failed");
                break;
            }
            Err(_) => {
                tracing::info!(client_id = %client, ?read_deadline, "read deadline expired");
                break;
            }
        };

        let envelope: Envelope = match codec.decode(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(client_id = %client, error = %e, "dropping malformed frame");
                continue;
            }
        };

        if envelope.kind.is_protocol() {
            tracing::debug!(
                client_id = %client,
                kind = %envelope.kind,
                "dropping protocol frame after handshake"
            );
            continue;
        }

        let result = match envelope.kind {
            MessageKind::JoinRoom => match requested_room(&envelope) {
                Some(room) => hub.join_room(client, room).await,
                None => {
                    tracing::debug!(client_id = %client, "join_room without a room");
                    continue;
                }
            },
            MessageKind::LeaveRoom => hub.leave_room(client).await,
            _ => hub.publish(client, envelope).await,
        };

        if let Err(e) = result {
            tracing::debug!(client_id = %client, error = %e, "hub rejected command");
            break;
        }
    }

    hub.unregister(client).await;
}

/// Shortest ping period the write loop accepts.
const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Writes queued frames and pings until the queue closes or a write fails.
///
/// Every socket write is bounded by `write_deadline`; a peer that stops
/// reading counts as a failed write. Always ends by closing the socket. A
/// write failure also unregisters the session, since the hub would
/// otherwise keep enqueueing to a dead peer.
pub async fn write_loop<C, H>(
    conn: &C,
    hub: &H,
    client: &ClientId,
    mut outbound: OutboundReceiver,
    ping_interval: Duration,
    write_deadline: Duration,
) where
    C: Connection,
    H: HubLink,
{
    let ping_interval = ping_interval.max(MIN_PING_INTERVAL);
    let mut ticker = time::interval_at(Instant::now() + ping_interval, ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let (op, result) = tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    tracing::debug!(client_id = %client, "outbound queue closed");
                    break;
                };
                ("send", time::timeout(write_deadline, conn.send(&frame)).await)
            }
            _ = ticker.tick() => ("ping", time::timeout(write_deadline, conn.ping()).await),
        };

        match result {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => {
                tracing::debug!(client_id = %client, op, error = %e, "write failed");
            }
            Err(_) => {
                tracing::info!(client_id = %client, op, ?write_deadline, "write deadline expired");
            }
        }
        hub.unregister(client).await;
        break;
    }

    match time::timeout(write_deadline, conn.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::trace!(client_id = %client, error = %e, "close after write loop");
        }
        Err(_) => tracing::debug!(client_id = %client, "close timed out"),
    }
}

/// Runs both loops for a registered session until it is done.
///
/// Call only after the hub has acknowledged registration. If the read side
/// ends first it unregisters, which closes the queue and lets the write side
/// finish. If the write side ends first the socket is already closed, so the
/// read side is dropped and the session unregistered here.
pub async fn drive<C, H, K>(
    conn: &C,
    hub: &H,
    codec: &K,
    client: &ClientId,
    outbound: OutboundReceiver,
    config: &SessionConfig,
) where
    C: Connection,
    H: HubLink,
    K: Codec,
{
    let read = read_loop(conn, hub, codec, client, config.read_deadline);
    let write = write_loop(
        conn,
        hub,
        client,
        outbound,
        config.ping_interval,
        config.write_deadline,
    );
    tokio::pin!(read, write);

    tokio::select! {
        () = &mut read => write.await,
        () = &mut write => hub.unregister(client).await,
    }
}

/// The room a `join_room` frame asks for: `roomId`, or `data.roomId`.
fn requested_room(envelope: &Envelope) -> Option<RoomId> {
    if let Some(room) = envelope.room_id.clone().non_empty() {
        return Some(room);
    }
    envelope
        .data
        .get("roomId")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(RoomId::from)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tavern_protocol::JsonCodec;

    use super::*;
    use crate::testing::{mock_connection, HubEvent, RecordingHub};
    use crate::{ClientSession, Subject};

    fn client() -> ClientId {
        ClientId::new("c1")
    }

    const DEADLINE: Duration = Duration::from_secs(60);
    const WRITE_DEADLINE: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_read_loop_publishes_application_frames() {
        let (conn, peer) = mock_connection();
        let hub = RecordingHub::default();
        peer.send_text(r#"{"type":"chat","roomId":"other","data":{"text":"hi"}}"#);
        peer.close();

        read_loop(&*conn, &hub, &JsonCodec, &client(), DEADLINE).await;

        let events = hub.events();
        assert_eq!(events.len(), 2);
        match &events[0] {
            HubEvent::Publish(sender, envelope) => {
                assert_eq!(sender, &client());
                assert_eq!(envelope.kind, MessageKind::Chat);
                assert_eq!(envelope.data, json!({"text": "hi"}));
            }
            other => panic!("expected publish, got {other:?}"),
        }
        assert_eq!(events[1], HubEvent::Unregister(client()));
    }

    #[tokio::test]
    async fn test_read_loop_drops_malformed_and_protocol_frames() {
        let (conn, peer) = mock_connection();
        let hub = RecordingHub::default();
        peer.send_text("not json at all");
        peer.send_text(r#"{"type":"auth","token":"again"}"#);
        peer.send_text(r#"{"roomId":"no-type"}"#);
        peer.send_text(r#"{"type":"dice_roll","data":{"sides":20}}"#);
        peer.close();

        read_loop(&*conn, &hub, &JsonCodec, &client(), DEADLINE).await;

        let events = hub.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], HubEvent::Publish(_, e) if e.kind == MessageKind::DiceRoll));
        assert_eq!(events[1], HubEvent::Unregister(client()));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_read_loop_turns_room_frames_into_room_changes() {
        let (conn, peer) = mock_connection();
        let hub = RecordingHub::default();
        peer.send_text(r#"{"type":"join_room","roomId":"table-2"}"#);
        peer.send_text(r#"{"type":"join_room","data":{"roomId":"table-3"}}"#);
        peer.send_text(r#"{"type":"join_room"}"#);
        peer.send_text(r#"{"type":"leave_room"}"#);
        peer.close();

        read_loop(&*conn, &hub, &JsonCodec, &client(), DEADLINE).await;

        assert_eq!(
            hub.events(),
            vec![
                HubEvent::Join(client(), RoomId::from("table-2")),
                HubEvent::Join(client(), RoomId::from("table-3")),
                HubEvent::Leave(client()),
                HubEvent::Unregister(client()),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_loop_hub_gone_stops_and_unregisters() {
        let (conn, peer) = mock_connection();
        let hub = RecordingHub::default();
        hub.shut_down();
        peer.send_text(r#"{"type":"chat","data":{}}"#);

        read_loop(&*conn, &hub, &JsonCodec, &client(), DEADLINE).await;
        assert_eq!(hub.events(), vec![HubEvent::Unregister(client())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_loop_silent_peer_hits_deadline() {
        let (conn, _peer) = mock_connection();
        let hub = RecordingHub::default();

        let started = Instant::now();
        read_loop(&*conn, &hub, &JsonCodec, &client(), Duration::from_secs(5)).await;

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(hub.events(), vec![HubEvent::Unregister(client())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_loop_heartbeat_restarts_deadline() {
        let (conn, peer) = mock_connection();
        let hub = RecordingHub::default();

        let task = {
            let conn = Arc::clone(&conn);
            let hub = hub.clone();
            tokio::spawn(async move {
                read_loop(&*conn, &hub, &JsonCodec, &client(), Duration::from_secs(5)).await;
            })
        };

        time::sleep(Duration::from_secs(3)).await;
        peer.send_pong();
        time::sleep(Duration::from_secs(4)).await;
        assert!(hub.events().is_empty(), "deadline should restart on pong");

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hub.events(), vec![HubEvent::Unregister(client())]);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_loop_drains_queue_then_closes() {
        let (conn, _peer) = mock_connection();
        let hub = RecordingHub::default();
        let (session, rx) = ClientSession::new(Subject::player("u1", "Ana"), None, 8);
        session.outbound().try_enqueue("one".into()).unwrap();
        session.outbound().try_enqueue("two".into()).unwrap();
        drop(session);

        write_loop(&*conn, &hub, &client(), rx, DEADLINE, WRITE_DEADLINE).await;

        assert_eq!(conn.sent(), vec!["one".to_owned(), "two".to_owned()]);
        assert!(conn.is_closed());
        assert!(hub.events().is_empty());
    }

    #[tokio::test]
    async fn test_write_loop_send_failure_unregisters() {
        let (conn, _peer) = mock_connection();
        conn.fail_sends();
        let hub = RecordingHub::default();
        let (session, rx) = ClientSession::new(Subject::player("u1", "Ana"), None, 8);
        session.outbound().try_enqueue("lost".into()).unwrap();

        write_loop(&*conn, &hub, &client(), rx, DEADLINE, WRITE_DEADLINE).await;

        assert_eq!(hub.events(), vec![HubEvent::Unregister(client())]);
        assert!(conn.is_closed());
        drop(session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_loop_pings_on_interval() {
        let (conn, _peer) = mock_connection();
        let hub = RecordingHub::default();
        let (session, rx) = ClientSession::new(Subject::player("u1", "Ana"), None, 8);

        let task = {
            let conn = Arc::clone(&conn);
            let hub = hub.clone();
            tokio::spawn(async move {
                write_loop(
                    &*conn,
                    &hub,
                    &client(),
                    rx,
                    Duration::from_secs(10),
                    WRITE_DEADLINE,
                )
                .await;
            })
        };

        time::sleep(Duration::from_secs(25)).await;
        assert_eq!(conn.pings(), 2);

        drop(session);
        task.await.unwrap();
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_drive_peer_close_unregisters() {
        let (conn, peer) = mock_connection();
        let hub = RecordingHub::default();
        let (session, rx) = ClientSession::new(Subject::player("u1", "Ana"), None, 8);
        let id = session.id().clone();
        peer.close();

        // The hub drops the session once it is unregistered; do it by hand.
        let hub_side = {
            let hub = hub.clone();
            let id = id.clone();
            tokio::spawn(async move {
                while !hub.events().contains(&HubEvent::Unregister(id.clone())) {
                    tokio::task::yield_now().await;
                }
                drop(session);
            })
        };

        drive(&*conn, &hub, &JsonCodec, &id, rx, &SessionConfig::default()).await;
        hub_side.await.unwrap();

        assert!(hub.events().contains(&HubEvent::Unregister(id)));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_drive_queue_closed_stops_both_loops() {
        let (conn, _peer) = mock_connection();
        let hub = RecordingHub::default();
        let (session, rx) = ClientSession::new(Subject::player("u1", "Ana"), None, 8);
        let id = session.id().clone();
        drop(session);

        drive(&*conn, &hub, &JsonCodec, &id, rx, &SessionConfig::default()).await;

        assert!(conn.is_closed());
        assert_eq!(hub.events(), vec![HubEvent::Unregister(id)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_loop_stalled_send_unregisters_after_deadline() {
        let (conn, _peer) = mock_connection();
        conn.stall_writes();
        let hub = RecordingHub::default();
        let (session, rx) = ClientSession::new(Subject::player("u1", "Ana"), None, 8);
        session.outbound().try_enqueue("stuck".into()).unwrap();

        let started = Instant::now();
        write_loop(&*conn, &hub, &client(), rx, DEADLINE, WRITE_DEADLINE).await;

        assert!(started.elapsed() >= WRITE_DEADLINE);
        assert_eq!(hub.events(), vec![HubEvent::Unregister(client())]);
        assert!(conn.sent().is_empty());
        drop(session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_loop_stalled_ping_unregisters_after_deadline() {
        let (conn, _peer) = mock_connection();
        conn.stall_writes();
        let hub = RecordingHub::default();
        let (session, rx) = ClientSession::new(Subject::player("u1", "Ana"), None, 8);

        write_loop(
            &*conn,
            &hub,
            &client(),
            rx,
            Duration::from_secs(5),
            WRITE_DEADLINE,
        )
        .await;

        assert_eq!(hub.events(), vec![HubEvent::Unregister(client())]);
        assert_eq!(conn.pings(), 0);
        drop(session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_loop_zero_ping_interval_does_not_panic() {
        let (conn, _peer) = mock_connection();
        let hub = RecordingHub::default();
        let (session, rx) = ClientSession::new(Subject::player("u1", "Ana"), None, 8);
        drop(session);

        write_loop(&*conn, &hub, &client(), rx, Duration::ZERO, WRITE_DEADLINE).await;

        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_peer_that_stops_reading_is_dropped() {
        let (conn, _peer) = mock_connection();
        conn.stall_writes();
        let hub = RecordingHub::default();
        let (session, rx) = ClientSession::new(Subject::player("u1", "Ana"), None, 8);
        let id = session.id().clone();
        session.outbound().try_enqueue("stuck".into()).unwrap();
        let config = SessionConfig::default();

        let started = Instant::now();
        let finished = time::timeout(
            Duration::from_secs(3600),
            drive(&*conn, &hub, &JsonCodec, &id, rx, &config),
        )
        .await;

        assert!(finished.is_ok(), "drive should end once a write stalls");
        assert!(started.elapsed() < config.read_deadline);
        assert!(hub.events().contains(&HubEvent::Unregister(id)));
        drop(session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_zero_durations_are_clamped() {
        let (conn, peer) = mock_connection();
        let hub = RecordingHub::default();
        let (session, rx) = ClientSession::new(Subject::player("u1", "Ana"), None, 8);
        let id = session.id().clone();
        let config = SessionConfig {
            read_deadline: Duration::ZERO,
            ping_interval: Duration::ZERO,
            write_deadline: Duration::ZERO,
            ..SessionConfig::default()
        }
        .validated();
        peer.send_text(r#"{"type":"chat","data":{}}"#);
        drop(session);

        drive(&*conn, &hub, &JsonCodec, &id, rx, &config).await;

        assert!(conn.is_closed());
        assert!(hub.events().contains(&HubEvent::Unregister(id)));
    }
}
