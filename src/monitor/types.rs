//! Request protocol between client handles and the registry thread.

use crate::error::{PropertyError, Result};
use crate::types::{ClientId, Location, Value};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Events delivered to a client's own channel.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// The property's value changed.
    Changed(Value),
}

/// Identity of a subscriber as seen by the registry.
///
/// Holds only the sending half of the client's event channel, so the registry
/// never keeps a dropped client alive; delivery to it simply fails.
#[derive(Clone, Debug)]
pub struct ClientRef {
    id: ClientId,
    events: Sender<ClientEvent>,
}

impl ClientRef {
    /// New identity delivering to `events`.
    pub fn new(events: Sender<ClientEvent>) -> Self {
        Self {
            id: ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)),
            events,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Posts an event. Returns false if the client is gone.
    pub(crate) fn notify(&self, event: ClientEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

/// One-shot reply to a registry request.
///
/// If the registry drops the request without answering (it stopped, or the
/// request handler failed) the reply reports `ReplyBroken`.
#[derive(Debug)]
pub struct Reply<T> {
    receiver: Receiver<T>,
}

pub(crate) fn reply_channel<T>() -> (Sender<T>, Reply<T>) {
    let (sender, receiver) = bounded(1);
    (sender, Reply { receiver })
}

impl<T> Reply<T> {
    /// Waits at most `timeout` for the value.
    pub fn wait(&self, timeout: Duration) -> Result<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(PropertyError::ReplyTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(PropertyError::ReplyBroken),
        }
    }

    /// Takes the value if it already arrived.
    pub fn try_take(&self) -> Result<Option<T>> {
        match self.receiver.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(PropertyError::ReplyBroken),
        }
    }
}

/// Messages processed by the registry thread.
#[derive(Debug)]
pub(crate) enum Request {
    Subscribe {
        key: String,
        client: ClientRef,
        reply: Sender<Value>,
    },
    Unsubscribe {
        key: String,
        client: ClientId,
        reply: Sender<()>,
    },
    Write {
        key: String,
        value: Value,
        reply: Sender<bool>,
    },
    Refresh {
        key: String,
    },
    Snapshot {
        reply: Sender<RegistrySnapshot>,
    },
    Shutdown,
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Subscribe { .. } => "subscribe",
            Request::Unsubscribe { .. } => "unsubscribe",
            Request::Write { .. } => "write",
            Request::Refresh { .. } => "refresh",
            Request::Snapshot { .. } => "snapshot",
            Request::Shutdown => "shutdown",
        }
    }
}

/// Lifecycle of a property handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerState {
    Unsubscribed,
    /// Open failed; a retry is scheduled.
    AwaitingReopen,
    Subscribed,
}

/// Point-in-time view of one handler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandlerSnapshot {
    /// Creation order within the registry; a recreated handler gets a new one.
    pub serial: u64,
    pub state: HandlerState,
    pub subscribers: usize,
    pub value: Value,
    pub location: Location,
    /// Consecutive failed opens.
    pub open_failures: u32,
    /// Delay the next reopen attempt would use.
    pub reopen_delay_ms: u64,
    /// Readiness events tolerated per second.
    pub max_rate: u32,
    /// Notification permanently disabled for this source.
    pub unpollable: bool,
}

/// Point-in-time view of the registry.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub handlers: BTreeMap<String, HandlerSnapshot>,
}

impl RegistrySnapshot {
    pub fn get(&self, key: &str) -> Option<&HandlerSnapshot> {
        self.handlers.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }
}
