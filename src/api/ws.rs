//! Websocket upgrade and per-socket pump
//!
//! The upgrade request is gated by the rate limiter before the handshake.
//! Once upgraded, the socket is split: a writer task drains the connection's
//! [`ChannelTransport`] into the sink, and the reader loop feeds frames into
//! the registry.

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, warn};

use super::handlers::ApiError;
use crate::context::AppContext;
use crate::hub::{extract_client_ip, ChannelTransport, DisconnectReason, Frame};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    #[serde(default)]
    pub user_id: Option<String>,
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
) -> Response {
    let ip = extract_client_ip(&headers, addr.ip(), &ctx.config.proxy);

    if !ctx.limiter.check_connection_admission(ip) {
        warn!(ip = %ip, "Websocket upgrade rejected by rate limiter");
        return ApiError::RateLimited.into_response();
    }

    let limiter = Arc::clone(&ctx.limiter);
    ws.on_failed_upgrade(move |e| {
        warn!(ip = %ip, error = %e, "Websocket upgrade failed");
        limiter.on_connection_closed(ip);
    })
    .on_upgrade(move |socket| handle_socket(socket, ctx, ip, params.user_id))
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Ping => Message::Ping(Bytes::new()),
        Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })),
    }
}

async fn write_frames(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut frames: UnboundedReceiver<Frame>,
) {
    while let Some(frame) = frames.recv().await {
        let is_close = matches!(frame, Frame::Close { .. });
        if let Err(e) = sink.send(to_message(frame)).await {
            debug!(error = %e, "Websocket sink closed");
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn handle_socket(
    socket: WebSocket,
    ctx: Arc<AppContext>,
    ip: IpAddr,
    user_id: Option<String>,
) {
    let (sink, mut stream) = socket.split();
    let (transport, frames) = ChannelTransport::new();
    let mut writer = tokio::spawn(write_frames(sink, frames));

    let id = match ctx.registry.admit(Arc::new(transport), ip, user_id) {
        Ok(id) => id,
        Err(e) => {
            // The limiter slot was reserved at upgrade time
            ctx.limiter.on_connection_closed(ip);
            debug!(ip = %ip, error = %e, "Socket closed after admission failure");
            let _ = writer.await;
            return;
        }
    };

    let mut writer_done = false;
    let reason = loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    ctx.registry.handle_inbound(&id, text.as_str());
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(connection_id = %id, "Dropping binary frame");
                }
                Some(Ok(Message::Pong(_))) => ctx.registry.handle_pong(&id),
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | None => break DisconnectReason::Closed,
                Some(Err(e)) => {
                    error!(connection_id = %id, error = %e, "Websocket receive error");
                    break DisconnectReason::TransportError;
                }
            },
            _ = &mut writer, if !writer_done => {
                // Closed from our side (eviction, shutdown) or the sink failed
                writer_done = true;
                break DisconnectReason::Closed;
            }
        }
    };

    ctx.registry.remove(&id, reason);
    if !writer_done {
        let _ = writer.await;
    }
}
