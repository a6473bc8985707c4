// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed TCP transport: one JSON document per length-prefixed frame.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::LengthDelimitedCodec;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::SessionManager;
use crate::protocol::ServerFrame;
use crate::transport::{encode_frame, Connection};

/// Accept loop. Runs until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    manager: Arc<SessionManager>,
    ready: ServerFrame,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                if !manager.governor.try_reserve_connection_slot() {
                    warn!(%peer, "connection rejected: connection limit reached");
                    drop(stream);
                    continue;
                }
                debug!(%peer, "socket connected");
                tokio::spawn(handle_connection(
                    stream,
                    Arc::clone(&manager),
                    ready.clone(),
                    shutdown.clone(),
                ));
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    manager: Arc<SessionManager>,
    ready: ServerFrame,
    shutdown: CancellationToken,
) {
    let max_frame = manager.governor.config().max_message_bytes;
    let mut codec = LengthDelimitedCodec::builder();
    codec.max_frame_length(max_frame);
    let framed = codec.new_framed(stream);
    let (mut sink, mut frames) = framed.split();

    let (mut connection, mut out_rx) = Connection::open(manager, "socket", ready);

    loop {
        tokio::select! {
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                if sink.send(Bytes::from(encode_frame(&frame))).await.is_err() {
                    break;
                }
            }
            inbound = frames.next() => {
                match inbound {
                    None => break,
                    Some(Err(e)) => {
                        debug!("socket read error: {e}");
                        break;
                    }
                    Some(Ok(raw)) => connection.accept_frame(&raw),
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    info!("socket disconnected");
    drop(connection);
}
