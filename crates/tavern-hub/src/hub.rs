//! Hub actor: owns the client set and the room map.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tavern_protocol::{ClientId, Codec, Envelope, JsonCodec, MessageKind, RoomId};
use tavern_session::{ClientSession, EnqueueError, OutboundFrame};
use tokio::sync::{mpsc, oneshot};

use crate::{HubConfig, HubHandle};

/// Commands sent to the hub through its queue.
///
/// Variants carrying a `oneshot::Sender` are request/reply; the rest are
/// fire-and-forget. Commands are applied strictly in arrival order.
pub(crate) enum HubCommand {
    /// Track an authenticated session. `ack` fires once it is in the
    /// client set.
    Register {
        session: ClientSession,
        ack: oneshot::Sender<()>,
    },

    /// Forget a session. Unknown ids are ignored.
    Unregister { client: ClientId },

    /// An envelope read from `sender`'s socket. Routed to the sender's
    /// current room, whatever room the envelope claims.
    Publish { sender: ClientId, envelope: Envelope },

    /// A server-originated envelope, routed by its own `roomId`.
    Dispatch { envelope: Envelope },

    /// Move a session into `room`.
    Join { client: ClientId, room: RoomId },

    /// Take a session out of its room.
    Leave { client: ClientId },

    /// Snapshot the membership.
    Stats { reply: oneshot::Sender<HubStats> },

    /// Close every session and stop the hub.
    Shutdown { done: oneshot::Sender<()> },
}

/// One room in a [`HubStats`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub members: usize,
}

/// A point-in-time view of the hub's membership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Registered sessions, in a room or not.
    pub clients: usize,
    /// Non-empty rooms, sorted by id.
    pub rooms: Vec<RoomInfo>,
}

impl HubStats {
    /// Member count of `room`, 0 if the room doesn't exist.
    pub fn members(&self, room: &RoomId) -> usize {
        self.rooms
            .iter()
            .find(|info| &info.room_id == room)
            .map_or(0, |info| info.members)
    }
}

struct HubActor {
    codec: JsonCodec,
    clients: HashMap<ClientId, ClientSession>,
    /// Invariant: `id ∈ rooms[r]` iff `clients[id].room() == Some(r)`.
    /// Empty rooms are removed.
    rooms: HashMap<RoomId, HashSet<ClientId>>,
    receiver: mpsc::Receiver<HubCommand>,
}

impl HubActor {
    async fn run(mut self) {
        tracing::info!("hub started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                HubCommand::Register { session, ack } => {
                    self.register(session);
                    let _ = ack.send(());
                }
                HubCommand::Unregister { client } => {
                    self.unregister(&client, "disconnected");
                }
                HubCommand::Publish { sender, envelope } => {
                    self.publish(&sender, envelope);
                }
                HubCommand::Dispatch { envelope } => {
                    self.dispatch(envelope);
                }
                HubCommand::Join { client, room } => {
                    self.join(&client, room);
                }
                HubCommand::Leave { client } => {
                    self.leave(&client);
                }
                HubCommand::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                HubCommand::Shutdown { done } => {
                    self.close_all();
                    let _ = done.send(());
                    break;
                }
            }
        }

        // Every handle dropped without a shutdown: still release the sockets.
        if !self.clients.is_empty() {
            self.close_all();
        }
        tracing::info!("hub stopped");
    }

    fn register(&mut self, session: ClientSession) {
        let client = session.id().clone();
        let room = session.room().cloned();

        tracing::info!(
            target: "tavern::audit",
            client_id = %client,
            user_id = %session.subject().id,
            username = %session.subject().username,
            room_id = room.as_ref().map_or("", RoomId::as_str),
            "client connected"
        );

        if let Some(old) = self.clients.insert(client.clone(), session) {
            // Ids are random; a clash means a caller registered twice.
            tracing::warn!(client_id = %client, "session registered twice, replacing");
            if let Some(old_room) = old.room() {
                self.remove_member(&client, old_room);
            }
        }

        if let Some(room) = room {
            self.add_member(&client, &room);
            self.announce(MessageKind::JoinRoom, &client, &room);
        }
    }

    fn unregister(&mut self, client: &ClientId, reason: &str) {
        // Second and later calls land here and do nothing.
        let Some(session) = self.clients.remove(client) else {
            return;
        };
        let room = session.room().cloned();
        if let Some(room) = &room {
            self.remove_member(client, room);
        }

        tracing::info!(
            target: "tavern::audit",
            client_id = %client,
            user_id = %session.subject().id,
            room_id = room.as_ref().map_or("", RoomId::as_str),
            reason,
            "client disconnected"
        );

        if let Some(room) = &room {
            let envelope = presence(MessageKind::LeaveRoom, client, &session, room);
            self.fan_out(room, &envelope);
        }
        // Dropping the session drops the only queue sender.
        drop(session);
    }

    fn publish(&mut self, sender: &ClientId, mut envelope: Envelope) {
        let Some(room) = self.clients.get(sender).and_then(|s| s.room()).cloned() else {
            tracing::debug!(
                client_id = %sender,
                kind = %envelope.kind,
                "sender is not in a room, dropping"
            );
            return;
        };
        envelope.room_id = room.clone();
        envelope.sender_id = sender.clone();
        self.fan_out(&room, &envelope);
    }

    fn dispatch(&mut self, envelope: Envelope) {
        if envelope.room_id.is_empty() {
            tracing::debug!(kind = %envelope.kind, "envelope has no room, dropping");
            return;
        }
        let room = envelope.room_id.clone();
        self.fan_out(&room, &envelope);
    }

    fn join(&mut self, client: &ClientId, room: RoomId) {
        let Some(session) = self.clients.get(client) else {
            tracing::debug!(client_id = %client, "join from unknown client");
            return;
        };
        if session.room() == Some(&room) {
            return;
        }
        self.leave(client);

        if let Some(session) = self.clients.get_mut(client) {
            session.set_room(Some(room.clone()));
        }
        self.add_member(client, &room);
        tracing::info!(client_id = %client, room_id = %room, "joined room");
        self.announce(MessageKind::JoinRoom, client, &room);
    }

    fn leave(&mut self, client: &ClientId) {
        let Some(room) = self.clients.get_mut(client).and_then(|session| {
            let room = session.room().cloned();
            session.set_room(None);
            room
        }) else {
            return;
        };
        self.remove_member(client, &room);
        tracing::info!(client_id = %client, room_id = %room, "left room");
        self.announce(MessageKind::LeaveRoom, client, &room);
    }

    fn stats(&self) -> HubStats {
        let mut rooms: Vec<RoomInfo> = self
            .rooms
            .iter()
            .map(|(room_id, members)| RoomInfo {
                room_id: room_id.clone(),
                members: members.len(),
            })
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        HubStats {
            clients: self.clients.len(),
            rooms,
        }
    }

    fn close_all(&mut self) {
        tracing::info!(
            target: "tavern::audit",
            clients = self.clients.len(),
            rooms = self.rooms.len(),
            "hub shutting down"
        );
        self.rooms.clear();
        // Each dropped session closes its queue; its write loop then closes
        // the socket.
        self.clients.clear();
    }

    fn add_member(&mut self, client: &ClientId, room: &RoomId) {
        self.rooms
            .entry(room.clone())
            .or_default()
            .insert(client.clone());
    }

    fn remove_member(&mut self, client: &ClientId, room: &RoomId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(client);
            if members.is_empty() {
                self.rooms.remove(room);
                tracing::debug!(room_id = %room, "room emptied");
            }
        }
    }

    /// Tells `room` that `client` arrived or left.
    fn announce(&mut self, kind: MessageKind, client: &ClientId, room: &RoomId) {
        let Some(session) = self.clients.get(client) else {
            return;
        };
        let envelope = presence(kind, client, session, room);
        self.fan_out(room, &envelope);
    }

    /// Serializes once and enqueues to every member of `room` without
    /// waiting. Members whose queue is full or closed are evicted.
    fn fan_out(&mut self, room: &RoomId, envelope: &Envelope) {
        let Some(members) = self.rooms.get(room) else {
            tracing::trace!(room_id = %room, "no members, dropping");
            return;
        };

        let frame: OutboundFrame = match self.codec.encode(envelope) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                tracing::warn!(room_id = %room, error = %e, "failed to encode envelope");
                return;
            }
        };

        let mut evicted = Vec::new();
        for member in members {
            let Some(session) = self.clients.get(member) else {
                continue;
            };
            match session.outbound().try_enqueue(Arc::clone(&frame)) {
                Ok(()) => {}
                Err(EnqueueError::Full) => {
                    tracing::warn!(
                        client_id = %member,
                        room_id = %room,
                        "outbound queue full, evicting"
                    );
                    evicted.push(member.clone());
                }
                Err(EnqueueError::Closed) => evicted.push(member.clone()),
            }
        }

        for member in evicted {
            self.unregister(&member, "evicted");
        }
    }
}

fn presence(kind: MessageKind, client: &ClientId, session: &ClientSession, room: &RoomId) -> Envelope {
    Envelope::new(
        kind,
        json!({
            "userId": session.subject().id,
            "username": session.subject().username,
        }),
    )
    .in_room(room.clone())
    .from_sender(client.clone())
}

/// Spawns the hub task and returns a handle to it.
///
/// The task runs until [`HubHandle::shutdown`] is called or every handle
/// has been dropped.
pub fn spawn_hub(config: HubConfig) -> HubHandle {
    let (tx, rx) = mpsc::channel(config.command_capacity.max(1));

    let actor = HubActor {
        codec: JsonCodec,
        clients: HashMap::new(),
        rooms: HashMap::new(),
        receiver: rx,
    };

    tokio::spawn(actor.run());

    HubHandle::new(tx)
}
