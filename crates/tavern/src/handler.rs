//! Per-connection handler: upgrade, handshake, registration, session loops.
//!
//! Each accepted socket gets its own Tokio task running this handler.
//! The flow is:
//!   1. Finish the WebSocket upgrade (path and origin checks)
//!   2. Run the auth handshake → `ClientSession`
//!   3. Register the session with the hub
//!   4. Drive the read and write loops until either side ends

use std::sync::Arc;

use tavern_protocol::RoomId;
use tavern_session::{drive, Authenticated, ServerHandshake, TokenValidator};
use tavern_transport::{Connection, PendingConnection};

use crate::server::ServerState;
use crate::TavernError;

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<P, V>(
    pending: P,
    state: Arc<ServerState<V>>,
) -> Result<(), TavernError>
where
    P: PendingConnection,
    V: TokenValidator,
{
    let (conn, request) = pending.upgrade().await?;
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = %request.peer, "connection upgraded");

    // --- Step 1: Handshake ---
    let mut handshake =
        ServerHandshake::new(&conn, &state.validator, &state.codec, &state.session)
            .with_upgrade_room(request.room.map(RoomId::from));
    let Authenticated { session, outbound } = handshake.run().await?;

    let client_id = session.id().clone();
    tracing::info!(
        %conn_id,
        %client_id,
        user_id = %session.subject().id,
        room_id = ?session.room(),
        "client authenticated"
    );

    // --- Step 2: Registration ---
    if let Err(e) = state.hub.register(session).await {
        if let Err(close) = conn.close().await {
            tracing::trace!(%conn_id, error = %close, "close after failed register");
        }
        return Err(e.into());
    }

    // --- Step 3: Session loops ---
    drive(
        &conn,
        &state.hub,
        &state.codec,
        &client_id,
        outbound,
        &state.session,
    )
    .await;

    tracing::info!(%conn_id, %client_id, "client disconnected");
    Ok(())
}
