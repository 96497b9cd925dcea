//! Session types: the record the hub tracks for one authenticated socket.
//!
//! A [`ClientSession`] only exists once the handshake has succeeded. It
//! carries WHO is connected ([`Subject`]), WHERE they sit (their current
//! room), and HOW to reach them (the sending half of a bounded outbound
//! queue). The receiving half goes to the session's write loop.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tavern_protocol::{ClientId, RoomId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::Subject;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Timeouts and limits for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long the server waits for the `auth` frame after sending
    /// `auth_required`.
    pub auth_timeout: Duration,

    /// A registered connection that sends nothing (not even a pong) for
    /// this long is considered dead.
    pub read_deadline: Duration,

    /// How often the write loop pings. Must be shorter than
    /// `read_deadline`, otherwise idle but healthy peers get dropped.
    pub ping_interval: Duration,

    /// Upper bound on a single socket write (frame, ping or close). A peer
    /// that stops reading is dropped once a write exceeds it.
    pub write_deadline: Duration,

    /// Capacity of the outbound queue, in frames. A full queue gets the
    /// session evicted.
    pub outbound_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(30),
            read_deadline: Duration::from_secs(60),
            ping_interval: Duration::from_secs(54),
            write_deadline: Duration::from_secs(10),
            outbound_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Fixes values that would break the keepalive contract.
    ///
    /// - Zero durations replaced by their defaults.
    /// - `ping_interval` forced below `read_deadline` (to 90% of it).
    /// - `outbound_capacity` at least 1.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        for (name, value, default) in [
            ("auth_timeout", &mut self.auth_timeout, defaults.auth_timeout),
            ("read_deadline", &mut self.read_deadline, defaults.read_deadline),
            ("write_deadline", &mut self.write_deadline, defaults.write_deadline),
        ] {
            if value.is_zero() {
                tracing::warn!(
                    setting = name,
                    fixed = ?default,
                    "zero duration is unusable, using default"
                );
                *value = default;
            }
        }
        if self.ping_interval.is_zero() || self.ping_interval >= self.read_deadline {
            let fixed = self.read_deadline.mul_f64(0.9);
            tracing::warn!(
                ping_interval = ?self.ping_interval,
                read_deadline = ?self.read_deadline,
                fixed = ?fixed,
                "ping interval must be non-zero and shorter than the read deadline, clamping"
            );
            self.ping_interval = fixed;
        }
        if self.outbound_capacity == 0 {
            tracing::warn!("outbound capacity of 0 is unusable, using 1");
            self.outbound_capacity = 1;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Outbound queue
// ---------------------------------------------------------------------------

/// A serialized frame waiting to be written. Shared between every member
/// of a room, so a fan-out serializes once and clones a pointer.
pub type OutboundFrame = Arc<str>;

/// Why a frame could not be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The consumer has fallen `capacity` frames behind.
    Full,
    /// The write loop is gone.
    Closed,
}

/// Sending half of a session's outbound queue.
///
/// Deliberately not `Clone`: the hub holds the only sender, so dropping the
/// session record closes the queue exactly once.
#[derive(Debug)]
pub struct OutboundQueue {
    tx: mpsc::Sender<OutboundFrame>,
}

impl OutboundQueue {
    /// Enqueues without waiting.
    pub fn try_enqueue(&self, frame: OutboundFrame) -> Result<(), EnqueueError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Number of frames that can still be enqueued right now.
    pub fn remaining(&self) -> usize {
        self.tx.capacity()
    }

    /// Returns `true` once the write loop has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a session's outbound queue, owned by the write loop.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<OutboundFrame>,
}

impl OutboundReceiver {
    /// Waits for the next frame. `None` means the queue was closed: the
    /// session was unregistered, evicted, or the hub shut down.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.rx.recv().await
    }

    /// Takes a frame if one is ready.
    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        self.rx.try_recv().ok()
    }
}

fn outbound_queue(capacity: usize) -> (OutboundQueue, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (OutboundQueue { tx }, OutboundReceiver { rx })
}

// ---------------------------------------------------------------------------
// ClientSession
// ---------------------------------------------------------------------------

/// A registered (authenticated) session.
#[derive(Debug)]
pub struct ClientSession {
    id: ClientId,
    subject: Subject,
    room: Option<RoomId>,
    outbound: OutboundQueue,
}

impl ClientSession {
    /// Creates a session with a freshly generated id and returns it together
    /// with the receiving half of its outbound queue.
    pub fn new(
        subject: Subject,
        room: Option<RoomId>,
        outbound_capacity: usize,
    ) -> (Self, OutboundReceiver) {
        let (outbound, receiver) = outbound_queue(outbound_capacity);
        let session = Self {
            id: generate_client_id(),
            subject,
            room: room.and_then(RoomId::non_empty),
            outbound,
        };
        (session, receiver)
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// The room this session sits in, if any.
    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    /// Moves the session. Only the hub calls this, while it keeps its room
    /// index in sync.
    pub fn set_room(&mut self, room: Option<RoomId>) {
        self.room = room.and_then(RoomId::non_empty);
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }
}

/// Generates a client id: 128 random bits as 32 lowercase hex characters.
fn generate_client_id() -> ClientId {
    let bits: u128 = rand::rng().random();
    ClientId::new(format!("{bits:032x}"))
}
