use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::{
    connections::{ConnectionId, ConnectionRegistry},
    session::ServerEvent,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("connection {0} is gone or not reading")]
    TargetUnreachable(ConnectionId),
}

/// Session description or ICE candidate on its way between two peers.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEnvelope {
    pub from: ConnectionId,
    pub to: ConnectionId,
    pub payload: Value,
}

/// Point-to-point relay addressed purely by connection id.
///
/// Room membership is not consulted; callers learn peer ids from
/// `user-joined` listings.
#[derive(Clone)]
pub struct SignalRelay {
    connections: Arc<ConnectionRegistry>,
}

impl SignalRelay {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        Self { connections }
    }

    pub fn relay(&self, SignalEnvelope { from, to, payload }: SignalEnvelope) -> Result<(), RelayError> {
        if self.connections.send(to, ServerEvent::Signal { from, payload }) {
            Ok(())
        } else {
            Err(RelayError::TargetUnreachable(to))
        }
    }
}
