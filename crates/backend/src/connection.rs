use tokio::sync::oneshot;

use super::error::{BackendResult, InvariantViolationSnafu};
use super::ids::ConnectionId;

/// Client side of a realtime connection.
///
/// The backend watches the paired liveness channel; once this handle is gone,
/// whether through `close`, a plain drop, or the process dying, every
/// disconnect rule registered for the connection fires exactly once.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    _liveness: oneshot::Sender<()>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Drops the connection without any client-side cleanup.
    pub fn close(self) {
        tracing::debug!(connection_id = %self.id, "closing realtime connection");
    }
}

/// Backend side of a connection: resolves when the client handle is gone.
pub(crate) struct ConnectionWatch {
    pub(crate) id: ConnectionId,
    pub(crate) liveness: oneshot::Receiver<()>,
}

pub(crate) fn open_connection() -> (ConnectionHandle, ConnectionWatch) {
    let id = ConnectionId::new_v7();
    let (liveness_tx, liveness_rx) = oneshot::channel();
    (
        ConnectionHandle {
            id,
            _liveness: liveness_tx,
        },
        ConnectionWatch {
            id,
            liveness: liveness_rx,
        },
    )
}

/// Disconnect watchers are server-side tasks, so they need a live tokio runtime.
pub(crate) fn runtime_handle(stage: &'static str) -> BackendResult<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current().map_err(|error| {
        InvariantViolationSnafu {
            stage,
            details: format!("connections require a tokio runtime: {error}"),
        }
        .build()
    })
}
