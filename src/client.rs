//! Per-observer proxy for one property.

use crate::error::{PropertyError, Result};
use crate::monitor::{self, ClientEvent, ClientRef, RegistryHandle, Reply};
use crate::types::Value;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often waiting loops re-check a pending subscribe reply.
const PUMP_INTERVAL: Duration = Duration::from_millis(10);

/// Subscription state of a client handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Initial,
    Subscribing,
    Subscribed,
    Unsubscribing,
}

type Observer = Box<dyn FnMut(&Value) + Send>;

/// One observer's view of a property.
///
/// Requests go to the registry asynchronously; values arrive as events on
/// this handle's own channel and are applied to the cached value only when
/// the owner pumps them ([`process_events`](Self::process_events) or one of
/// the waiting methods). Dropping the handle unsubscribes it.
pub struct ClientHandle {
    key: String,
    registry: RegistryHandle,
    identity: ClientRef,
    events: Receiver<ClientEvent>,
    state: SubscriptionState,
    cache: Option<Value>,
    on_subscribed: Option<Reply<Value>>,
    on_unsubscribed: Option<Reply<()>>,
    observer: Option<Observer>,
}

impl ClientHandle {
    /// New handle for `key` on the process-wide registry.
    ///
    /// Fails if the registry cannot be started or was already shut down.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let registry = monitor::global()?;
        if !registry.is_running() {
            return Err(PropertyError::RegistryStopped);
        }
        Ok(Self::with_registry(key, &registry.handle()))
    }

    /// New handle for `key` on a specific registry. Not yet subscribed.
    pub fn with_registry(key: impl Into<String>, registry: &RegistryHandle) -> Self {
        let (sender, events) = unbounded();
        Self {
            key: key.into(),
            registry: registry.clone(),
            identity: ClientRef::new(sender),
            events,
            state: SubscriptionState::Initial,
            cache: None,
            on_subscribed: None,
            on_unsubscribed: None,
            observer: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn identity(&self) -> &ClientRef {
        &self.identity
    }

    /// Cached value, or `default` if nothing was received yet.
    pub fn get_value(&self, default: Value) -> Value {
        self.cache.clone().unwrap_or(default)
    }

    /// Cached value, if any.
    pub fn value(&self) -> Option<&Value> {
        self.cache.as_ref()
    }

    /// Callback run for every accepted value change.
    pub fn set_observer<F>(&mut self, observer: F)
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    /// Requests a subscription. Returns without waiting for the registry.
    pub fn subscribe(&mut self) {
        match self.state {
            SubscriptionState::Subscribing | SubscriptionState::Subscribed => return,
            SubscriptionState::Unsubscribing => self.finish_unsubscribe(),
            SubscriptionState::Initial => {}
        }
        self.state = SubscriptionState::Subscribing;
        self.on_subscribed = Some(self.registry.subscribe(&self.key, &self.identity));
    }

    /// Detaches from the registry, waiting (bounded) for confirmation.
    pub fn unsubscribe(&mut self) {
        match self.state {
            SubscriptionState::Initial => return,
            SubscriptionState::Unsubscribing => {
                self.finish_unsubscribe();
                return;
            }
            SubscriptionState::Subscribing | SubscriptionState::Subscribed => {}
        }

        self.on_subscribed = None;
        self.state = SubscriptionState::Unsubscribing;
        let reply = self.registry.unsubscribe(&self.key, self.identity.id());
        match reply.wait(self.registry.timeouts().unsubscribe()) {
            Ok(()) => self.detached(),
            Err(PropertyError::ReplyTimeout(waited)) => {
                warn!(key = %self.key, ?waited, "unsubscribe not confirmed yet");
                self.on_unsubscribed = Some(reply);
            }
            Err(err) => {
                warn!(key = %self.key, %err, "unsubscribe reply lost");
                self.detached();
            }
        }
    }

    /// Waits once more for an unconfirmed unsubscribe before moving on.
    fn finish_unsubscribe(&mut self) {
        if let Some(reply) = self.on_unsubscribed.take() {
            if let Err(err) = reply.wait(self.registry.timeouts().unsubscribe()) {
                warn!(key = %self.key, %err, "previous unsubscribe never confirmed");
            }
        }
        self.detached();
    }

    /// Back to `Initial`. Events still queued belong to the old subscription
    /// and must not reach the cache after a newer one.
    fn detached(&mut self) {
        self.state = SubscriptionState::Initial;
        let stale = self.events.try_iter().count();
        if stale > 0 {
            debug!(key = %self.key, stale, "dropped events of previous subscription");
        }
    }

    /// Waits until the first value of a pending subscription is known.
    ///
    /// Blocking: waits on the registry reply for at most the configured
    /// subscribe timeout, then continues with whatever is cached.
    /// Non-blocking: pumps this handle's events until subscribed.
    pub fn wait_for_subscription(&mut self, block: bool) {
        if block {
            self.wait_blocking();
        } else {
            self.pump_until_subscribed();
        }
    }

    fn wait_blocking(&mut self) {
        if self.state == SubscriptionState::Subscribed {
            return;
        }
        let Some(reply) = self.on_subscribed.take() else {
            debug!(key = %self.key, state = ?self.state, "no subscription in flight");
            return;
        };

        let timeout = self.registry.timeouts().subscribe();
        match reply.wait(timeout) {
            Ok(value) => {
                self.accept(value);
            }
            Err(PropertyError::ReplyTimeout(waited)) => {
                warn!(key = %self.key, ?waited, "no subscription reply, using cached value");
                // A late reply is still picked up by process_events
                self.on_subscribed = Some(reply);
            }
            Err(err) => warn!(key = %self.key, %err, "subscription reply lost"),
        }
        if self.state == SubscriptionState::Subscribing {
            self.state = SubscriptionState::Subscribed;
        }
    }

    fn pump_until_subscribed(&mut self) {
        while self.state == SubscriptionState::Subscribing {
            self.process_events();
            if self.state != SubscriptionState::Subscribing {
                break;
            }
            if let Ok(event) = self.events.recv_timeout(PUMP_INTERVAL) {
                self.apply(event);
            }
        }
    }

    /// Applies everything that arrived for this handle.
    ///
    /// Returns the number of accepted value changes.
    pub fn process_events(&mut self) -> usize {
        let mut changes = 0;

        if let Some(reply) = &self.on_subscribed {
            match reply.try_take() {
                Ok(Some(value)) => {
                    self.on_subscribed = None;
                    if self.state == SubscriptionState::Subscribing {
                        self.state = SubscriptionState::Subscribed;
                    }
                    if self.accept(value) {
                        changes += 1;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(key = %self.key, %err, "subscription reply lost");
                    self.on_subscribed = None;
                    if self.state == SubscriptionState::Subscribing {
                        self.state = SubscriptionState::Subscribed;
                    }
                }
            }
        }

        while let Ok(event) = self.events.try_recv() {
            if self.apply(event) {
                changes += 1;
            }
        }
        changes
    }

    /// Pumps events until a value change is accepted or `timeout` passes.
    pub fn wait_for_change(&mut self, timeout: Duration) -> Option<Value> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.process_events() > 0 {
                return self.cache.clone();
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            match self.events.recv_timeout((deadline - now).min(PUMP_INTERVAL)) {
                Ok(event) => {
                    if self.apply(event) {
                        return self.cache.clone();
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn apply(&mut self, event: ClientEvent) -> bool {
        match event {
            ClientEvent::Changed(value) => {
                if self.state == SubscriptionState::Subscribing {
                    self.state = SubscriptionState::Subscribed;
                }
                self.accept(value)
            }
        }
    }

    /// Caches `value` if it is set and new. Returns whether it was accepted.
    fn accept(&mut self, value: Value) -> bool {
        if value.is_unset() || self.cache.as_ref() == Some(&value) {
            return false;
        }
        if let Some(observer) = self.observer.as_mut() {
            observer(&value);
        }
        self.cache = Some(value);
        true
    }

    /// Writes a new value for this handle's key.
    pub fn write(&self, value: Value) -> Reply<bool> {
        self.registry.write(&self.key, value)
    }

    /// Asks the registry to re-read this key now.
    pub fn refresh(&self) {
        self.registry.refresh(&self.key);
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("key", &self.key)
            .field("id", &self.identity.id())
            .field("state", &self.state)
            .field("cache", &self.cache)
            .finish()
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
