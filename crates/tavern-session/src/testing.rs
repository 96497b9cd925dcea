//! In-memory stand-ins for a socket and a hub, shared by this crate's unit
//! tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tavern_protocol::{ClientId, Envelope, RoomId};
use tavern_transport::{Connection, ConnectionId, Inbound, TransportError};
use tokio::sync::{mpsc, Mutex};

use crate::{HubLink, SessionError};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A connection whose peer is driven by a [`MockPeer`].
pub(crate) struct MockConnection {
    id: ConnectionId,
    inbound: Mutex<mpsc::UnboundedReceiver<Option<Inbound>>>,
    sent: StdMutex<Vec<String>>,
    pings: AtomicUsize,
    closed: AtomicBool,
    fail_sends: AtomicBool,
    stall_writes: AtomicBool,
}

/// The remote end of a [`MockConnection`].
pub(crate) struct MockPeer {
    tx: mpsc::UnboundedSender<Option<Inbound>>,
}

impl MockPeer {
    pub(crate) fn send_text(&self, text: &str) {
        let _ = self.tx.send(Some(Inbound::Text(text.to_owned())));
    }

    pub(crate) fn send_pong(&self) {
        let _ = self.tx.send(Some(Inbound::Heartbeat));
    }

    pub(crate) fn close(&self) {
        let _ = self.tx.send(None);
    }
}

pub(crate) fn mock_connection() -> (Arc<MockConnection>, MockPeer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = MockConnection {
        id: ConnectionId::new(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
        inbound: Mutex::new(rx),
        sent: StdMutex::new(Vec::new()),
        pings: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
        fail_sends: AtomicBool::new(false),
        stall_writes: AtomicBool::new(false),
    };
    (Arc::new(conn), MockPeer { tx })
}

impl MockConnection {
    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Makes every later send, ping and close hang, like a peer that has
    /// stopped reading with a full TCP window.
    pub(crate) fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::SeqCst);
    }

    async fn wait_writable(&self) {
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    fn check_writable(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) || self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed("mock closed".into()));
        }
        Ok(())
    }
}

impl Connection for MockConnection {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        self.wait_writable().await;
        self.check_writable()?;
        self.sent.lock().unwrap().push(frame.to_owned());
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Inbound>, TransportError> {
        match self.inbound.lock().await.recv().await {
            Some(Some(inbound)) => Ok(Some(inbound)),
            Some(None) | None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.wait_writable().await;
        self.check_writable()?;
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.wait_writable().await;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// What a session asked of the hub.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HubEvent {
    Publish(ClientId, Envelope),
    Join(ClientId, RoomId),
    Leave(ClientId),
    Unregister(ClientId),
}

/// A [`HubLink`] that records every call.
#[derive(Clone, Default)]
pub(crate) struct RecordingHub {
    events: Arc<StdMutex<Vec<HubEvent>>>,
    gone: Arc<AtomicBool>,
}

impl RecordingHub {
    pub(crate) fn events(&self) -> Vec<HubEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn shut_down(&self) {
        self.gone.store(true, Ordering::SeqCst);
    }

    fn record(&self, event: HubEvent) -> Result<(), SessionError> {
        if self.gone.load(Ordering::SeqCst) {
            return Err(SessionError::HubUnavailable);
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

impl HubLink for RecordingHub {
    async fn publish(
        &self,
        sender: &ClientId,
        envelope: Envelope,
    ) -> Result<(), SessionError> {
        self.record(HubEvent::Publish(sender.clone(), envelope))
    }

    async fn join_room(
        &self,
        client: &ClientId,
        room: RoomId,
    ) -> Result<(), SessionError> {
        self.record(HubEvent::Join(client.clone(), room))
    }

    async fn leave_room(&self, client: &ClientId) -> Result<(), SessionError> {
        self.record(HubEvent::Leave(client.clone()))
    }

    async fn unregister(&self, client: &ClientId) {
        self.events
            .lock()
            .unwrap()
            .push(HubEvent::Unregister(client.clone()));
    }
}
