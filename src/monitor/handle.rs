//! Caller-side access to a running registry.

use super::types::{reply_channel, ClientRef, RegistrySnapshot, Reply, Request};
use super::waker::Waker;
use crate::config::ClientTimeouts;
use crate::types::{ClientId, Value};
use crossbeam_channel::Sender;
use std::sync::Arc;
use tracing::debug;

/// Cloneable, thread-safe handle for sending requests to a registry.
///
/// Every operation enqueues a message and returns immediately. Requests sent
/// through one handle are processed in submission order. After the registry
/// stopped, replies report `ReplyBroken`.
#[derive(Clone, Debug)]
pub struct RegistryHandle {
    sender: Sender<Request>,
    waker: Arc<Waker>,
    timeouts: ClientTimeouts,
}

impl RegistryHandle {
    pub(crate) fn new(sender: Sender<Request>, waker: Arc<Waker>, timeouts: ClientTimeouts) -> Self {
        Self {
            sender,
            waker,
            timeouts,
        }
    }

    /// Wait bounds clients of this registry use.
    pub fn timeouts(&self) -> &ClientTimeouts {
        &self.timeouts
    }

    pub(crate) fn post(&self, request: Request) -> bool {
        let kind = request.kind();
        if self.sender.send(request).is_err() {
            debug!(request = kind, "registry stopped, request dropped");
            return false;
        }
        self.waker.wake();
        true
    }

    /// Attaches `client` to `key` and replies with the current value.
    pub fn subscribe(&self, key: &str, client: &ClientRef) -> Reply<Value> {
        let (reply, rx) = reply_channel();
        self.post(Request::Subscribe {
            key: key.to_string(),
            client: client.clone(),
            reply,
        });
        rx
    }

    /// Detaches `client` from `key`. Replies once detached.
    pub fn unsubscribe(&self, key: &str, client: ClientId) -> Reply<()> {
        let (reply, rx) = reply_channel();
        self.post(Request::Unsubscribe {
            key: key.to_string(),
            client,
            reply,
        });
        rx
    }

    /// Writes `value` to the first writable location of `key`.
    ///
    /// Replies true iff the whole encoded value was written.
    pub fn write(&self, key: &str, value: Value) -> Reply<bool> {
        let (reply, rx) = reply_channel();
        self.post(Request::Write {
            key: key.to_string(),
            value,
            reply,
        });
        rx
    }

    /// Forces a re-read of `key` if anyone is subscribed to it.
    pub fn refresh(&self, key: &str) {
        self.post(Request::Refresh {
            key: key.to_string(),
        });
    }

    pub fn snapshot(&self) -> Reply<RegistrySnapshot> {
        let (reply, rx) = reply_channel();
        self.post(Request::Snapshot { reply });
        rx
    }
}
