//! In-process frame sink for the embedded transport.
//!
//! The writer map here is transport state — which half of a socket to write
//! to — not broker state. All coordination (presence, monitors, sessions)
//! stays in the durable store, so additional workers can run beside this one
//! against a remote sink.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;

use crate::sink::{FrameSink, SinkError};

/// Sink that writes frames to sockets owned by this process.
#[derive(Debug, Default)]
pub struct LocalSink {
    peers: Mutex<HashMap<String, UnboundedSender<Message>>>,
}

impl LocalSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a writer for a freshly accepted socket.
    pub fn register(&self, connection_id: &str, tx: UnboundedSender<Message>) {
        self.peers
            .lock()
            .expect("peer map lock poisoned")
            .insert(connection_id.to_string(), tx);
    }

    /// Detach a writer on socket close.
    pub fn unregister(&self, connection_id: &str) {
        self.peers
            .lock()
            .expect("peer map lock poisoned")
            .remove(connection_id);
    }
}

#[async_trait]
impl FrameSink for LocalSink {
    async fn post(&self, connection_id: &str, bytes: &[u8]) -> Result<(), SinkError> {
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|e| SinkError::Transport(format!("non-UTF-8 frame: {e}")))?;
        let sender = {
            let peers = self.peers.lock().expect("peer map lock poisoned");
            peers.get(connection_id).cloned()
        };
        match sender {
            None => Err(SinkError::Gone),
            Some(tx) => tx.send(Message::Text(text)).map_err(|_| SinkError::Gone),
        }
    }
}
