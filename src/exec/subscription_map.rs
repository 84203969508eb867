use std::collections::HashMap;

use crate::stream::StopToken;

use super::types::RequestId;

/// The connection-scoped registry of active subscription sessions.
///
/// Keyed by the caller's request id; holds each session's [`StopToken`] so a
/// `stream-stop` frame (or connection teardown) can cancel it cooperatively.
#[derive(Debug, Default)]
pub struct SubscriptionMap {
    map: HashMap<RequestId, StopToken>,
}

impl SubscriptionMap {
    pub fn contains_key(&self, id: &RequestId) -> bool {
        self.map.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Signals the session to stop and deregisters it. Returns `false` if no
    /// session with that id is active.
    pub fn shutdown(&mut self, id: &RequestId) -> bool {
        match self.map.remove(id) {
            Some(token) => {
                token.stop();
                true
            }
            None => false,
        }
    }

    /// Stops every active session. Used on connection loss and before a
    /// `reconnect` notice.
    pub fn shutdown_all(&mut self) {
        for (_, token) in self.map.drain() {
            token.stop();
        }
    }

    pub(crate) fn insert(&mut self, id: RequestId, token: StopToken) {
        self.map.insert(id, token);
    }

    // Deregister without signalling. Used when the session already finished
    // on its own.
    pub(crate) fn remove(&mut self, id: &RequestId) {
        self.map.remove(id);
    }
}
