//! WebSocket endpoint: admits a connection and hands it to the pumps.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt, future};
use log::info;
use roomcast_protocol::{IdentityId, RoomId};
use serde::Deserialize;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::connection::{self, Connection, Frame};

/// Admission parameters. Identity is trusted as given.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: Option<String>,
    pub room_id: Option<String>,
}

/// WebSocket upgrade handler.
///
/// GET /ws?user_id=..&room_id=..
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let Some(user_id) = params.user_id.filter(|id| !id.trim().is_empty()) else {
        return Err(ApiError::bad_request("user_id is required"));
    };
    if state.hub.is_shut_down() {
        return Err(ApiError::service_unavailable("server is shutting down"));
    }

    let identity = IdentityId::new(user_id);
    let room = params.room_id.map(RoomId::new);
    let max_frame = state.hub.config().max_frame_bytes;
    info!(
        "WebSocket upgrade request from {} for room {}",
        identity,
        room.as_ref().map(RoomId::as_str).unwrap_or("-")
    );

    Ok(ws
        .max_message_size(max_frame)
        .max_frame_size(max_frame)
        .on_upgrade(move |socket| handle_socket(socket, state, identity, room)))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    identity: IdentityId,
    room: Option<RoomId>,
) {
    let (conn, outbound) =
        Connection::new(identity, room, state.hub.config().outbound_capacity);
    let (sender, receiver) = socket.split();

    let sink = sender.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_message(frame))));
    let stream = receiver.map(|message| message.map(from_message));

    let reason = connection::serve(
        state.hub.clone(),
        Arc::clone(&state.router),
        Arc::clone(&conn),
        outbound,
        sink,
        stream,
    )
    .await;
    info!(
        "WebSocket connection {} for {} closed: {}",
        conn.id(),
        conn.identity(),
        reason
    );
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Ping(data) => Message::Ping(data.into()),
        Frame::Pong(data) => Message::Pong(data.into()),
        Frame::Close => Message::Close(None),
    }
}

fn from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(data) => Frame::Binary(data.to_vec()),
        Message::Ping(data) => Frame::Ping(data.to_vec()),
        Message::Pong(data) => Frame::Pong(data.to_vec()),
        Message::Close(_) => Frame::Close,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_message_conversion() {
        let frames = [
            Frame::Text("{\"type\":\"pong\"}".to_string()),
            Frame::Binary(vec![1, 2, 3]),
            Frame::Ping(Vec::new()),
            Frame::Close,
        ];
        for frame in frames {
            assert_eq!(from_message(to_message(frame.clone())), frame);
        }
    }
}
