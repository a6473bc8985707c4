// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Standard-stream transport: one JSON document per line.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::manager::SessionManager;
use crate::protocol::ServerFrame;
use crate::transport::Connection;

/// Serve the line-delimited protocol on stdin/stdout until EOF or shutdown.
///
/// The stdio channel is one connection and counts against the connection
/// cap like any socket client.
pub async fn serve(manager: Arc<SessionManager>, ready: ServerFrame, shutdown: CancellationToken) {
    if !manager.governor.try_reserve_connection_slot() {
        info!("stdio transport rejected: connection limit reached");
        return;
    }

    let max_line = manager.governor.config().max_message_bytes;
    let mut lines = FramedRead::new(
        tokio::io::stdin(),
        LinesCodec::new_with_max_length(max_line),
    );
    let mut sink = FramedWrite::new(tokio::io::stdout(), LinesCodec::new());

    let (mut connection, mut out_rx) = Connection::open(manager, "stdio", ready);

    loop {
        tokio::select! {
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                let encoded = String::from_utf8(crate::transport::encode_frame(&frame))
                    .unwrap_or_default();
                if sink.send(encoded).await.is_err() {
                    break;
                }
            }
            inbound = lines.next() => {
                match inbound {
                    None => break,
                    Some(Err(e)) => {
                        debug!("stdin read error: {e}");
                        break;
                    }
                    Some(Ok(line)) => connection.accept_frame(line.as_bytes()),
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    info!("stdio transport closed");
    drop(connection);
}
