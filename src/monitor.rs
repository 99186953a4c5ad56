//! Monitor fan-out.
//!
//! Monitors are read-only subscribers that receive a copy of every frame
//! exchanged for a robot. Fan-out is a secondary effect: copies are emitted
//! before real delivery is attempted, gone sinks are skipped silently, and
//! nothing here influences the primary response.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::protocol::Target;
use crate::sink::{FrameSink, SinkError};
use crate::store::ConnectionsRepo;

/// Copies frames to subscribed monitors.
#[derive(Clone)]
pub struct MonitorFanout {
    connections: ConnectionsRepo,
    sink: Arc<dyn FrameSink>,
}

impl std::fmt::Debug for MonitorFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorFanout").finish_non_exhaustive()
    }
}

impl MonitorFanout {
    /// Build a fan-out over the given sink.
    pub fn new(connections: ConnectionsRepo, sink: Arc<dyn FrameSink>) -> Self {
        Self { connections, sink }
    }

    /// Emit a copy of `frame` to every monitor subscribed to `robot_id`.
    ///
    /// Copies carry diagnostic fields: `_monitor`, `_source`, `_target?`,
    /// `_direction`.
    pub async fn emit(
        &self,
        robot_id: &str,
        source: &str,
        target: Option<Target>,
        direction: &str,
        frame: &Value,
    ) {
        let monitors = match self.connections.monitors_for(robot_id).await {
            Ok(m) => m,
            Err(e) => {
                log::warn!("monitor query for {robot_id} failed: {e}");
                return;
            }
        };
        if monitors.is_empty() {
            return;
        }

        let mut copy = frame
            .as_object()
            .cloned()
            .unwrap_or_else(|| {
                let mut wrapped = Map::new();
                wrapped.insert("frame".into(), frame.clone());
                wrapped
            });
        copy.insert("_monitor".into(), Value::Bool(true));
        copy.insert("_source".into(), source.into());
        if let Some(target) = target {
            let label = match target {
                Target::Robot => "robot",
                Target::Client => "client",
            };
            copy.insert("_target".into(), label.into());
        }
        copy.insert("_direction".into(), direction.into());
        let bytes =
            serde_json::to_vec(&copy).expect("JSON value serialization cannot fail");

        for monitor in monitors {
            match self.sink.post(&monitor.connection_id, &bytes).await {
                Ok(()) | Err(SinkError::Gone) => {}
                Err(e) => log::warn!(
                    "monitor copy to {} failed: {e}",
                    monitor.connection_id
                ),
            }
        }
    }
}
