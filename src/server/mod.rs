//! Embedded WebSocket transport adapter.
//!
//! Accepts sockets, translates transport lifecycle into broker events
//! (`$connect` on upgrade, `$default` per text frame, `$disconnect` on
//! close), and feeds outbound frames back through [`LocalSink`]. In split
//! deployments the socket tier runs elsewhere and this module is unused.

mod local_sink;

pub use local_sink::LocalSink;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::dispatch::Broker;
use crate::event::SocketEvent;

/// Accept connections on `addr` until interrupted.
pub async fn run(addr: &str, broker: Arc<Broker>, sink: Arc<LocalSink>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    log::info!("listening on {addr}");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupt received, shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("accept failed")?;
                log::debug!("accepted {peer}");
                let broker = Arc::clone(&broker);
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(broker, sink, stream).await {
                        log::debug!("connection from {peer} ended: {e:#}");
                    }
                });
            }
        }
    }
    Ok(())
}

/// Drive one socket from upgrade to close.
async fn handle_connection(
    broker: Arc<Broker>,
    sink: Arc<LocalSink>,
    stream: TcpStream,
) -> Result<()> {
    let mut query: HashMap<String, String> = HashMap::new();
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        query = parse_query(req.uri().query().unwrap_or(""));
        Ok(resp)
    })
    .await
    .context("websocket upgrade failed")?;

    let connection_id = format!("conn-{}", Uuid::new_v4().simple());
    let (mut write, mut read) = ws.split();

    // Register the writer before the handshake event so the welcome frame
    // has somewhere to go.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    sink.register(&connection_id, tx);
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    let handshake = broker
        .handle(&SocketEvent::connect(&connection_id, query))
        .await;
    if handshake.status != 200 {
        log::info!(
            "{connection_id} rejected at handshake: {} {}",
            handshake.status,
            handshake.body
        );
        sink.unregister(&connection_id);
        writer.abort();
        return Ok(());
    }

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let resp = broker
                    .handle(&SocketEvent::frame(&connection_id, text))
                    .await;
                if resp.status != 200 {
                    log::debug!(
                        "{connection_id} frame answered {} {}",
                        resp.status,
                        resp.body
                    );
                }
            }
            Ok(Message::Close(_)) => break,
            // Transport-level ping/pong is answered by tungstenite itself.
            Ok(_) => {}
            Err(e) => {
                log::debug!("{connection_id} read error: {e}");
                break;
            }
        }
    }

    sink.unregister(&connection_id);
    broker
        .handle(&SocketEvent::disconnect(&connection_id))
        .await;
    writer.abort();
    Ok(())
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
