//! Live value of one property key.

use super::backoff::Backoff;
use super::rate::{wall_clock_second, RateLimiter, Tolerance};
use super::resource::ReadableResource;
use crate::codec::ValueCodec;
use crate::config::{MonitorConfig, ReadConfig};
use crate::monitor::{ClientEvent, ClientRef, HandlerSnapshot, HandlerState};
use crate::poll;
use crate::types::{ClientId, Locations, Value};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Readiness notification state while subscribed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Notify {
    Off,
    Armed,
    /// Re-armed once the instant passes.
    Paused(Instant),
    /// Source reports errors instead of data; never re-armed.
    Unpollable,
}

/// Owns the file, cache and subscribers of one key.
///
/// Lives only on the registry thread.
pub(crate) struct PropertyHandler {
    key: String,
    serial: u64,
    resource: ReadableResource,
    buffer: Vec<u8>,
    cache: Value,
    subscribers: Vec<ClientRef>,
    state: HandlerState,
    reopen_at: Option<Instant>,
    notify: Notify,
    backoff: Backoff,
    rate: RateLimiter,
    codec: Arc<dyn ValueCodec>,
    read: ReadConfig,
    rearm_delay: Duration,
    probe_timeout: Duration,
}

impl PropertyHandler {
    pub fn new(
        key: &str,
        locations: Locations,
        serial: u64,
        codec: Arc<dyn ValueCodec>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            key: key.to_string(),
            serial,
            resource: ReadableResource::new(key, locations),
            buffer: Vec::new(),
            cache: Value::Unset,
            subscribers: Vec::new(),
            state: HandlerState::Unsubscribed,
            reopen_at: None,
            notify: Notify::Off,
            backoff: Backoff::new(config.backoff.clone()),
            rate: RateLimiter::new(config.rate.clone()),
            codec,
            read: config.read.clone(),
            rearm_delay: config.rearm_delay(),
            probe_timeout: config.probe_timeout(),
        }
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    #[cfg(test)]
    pub fn value(&self) -> &Value {
        &self.cache
    }

    // --- Subscribers ---

    /// Adds a subscriber. Returns false if it was already attached.
    pub fn attach(&mut self, client: ClientRef) -> bool {
        if self.subscribers.iter().any(|s| s.id() == client.id()) {
            return false;
        }
        self.subscribers.push(client);
        true
    }

    /// Removes a subscriber. Returns false if it was not attached.
    pub fn detach(&mut self, id: ClientId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id() != id);
        self.subscribers.len() != before
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    /// Sends the cached value to every subscriber, dropping the ones whose
    /// channel is closed.
    fn fan_out(&mut self) {
        let value = &self.cache;
        let key = &self.key;
        self.subscribers.retain(|sub| {
            let delivered = sub.notify(ClientEvent::Changed(value.clone()));
            if !delivered {
                debug!(%key, client = %sub.id(), "subscriber gone, detaching");
            }
            delivered
        });
    }

    // --- Lifecycle ---

    /// Starts watching the file.
    ///
    /// Returns the freshly read value, or `Unset` if the file cannot be opened
    /// yet (a retry is then scheduled). Already subscribed handlers return
    /// their cache.
    pub fn subscribe(&mut self) -> Value {
        if self.state != HandlerState::Unsubscribed {
            return self.cache.clone();
        }
        if !self.resource.open() {
            self.schedule_reopen();
            return Value::Unset;
        }
        self.activate();
        self.cache.clone()
    }

    /// Stops watching and closes the file. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.state == HandlerState::Unsubscribed {
            return;
        }
        self.state = HandlerState::Unsubscribed;
        self.reopen_at = None;
        if self.notify != Notify::Unpollable {
            self.notify = Notify::Off;
        }
        self.resource.close();
    }

    /// Post-open path shared by subscribe and reopen.
    fn activate(&mut self) {
        self.state = HandlerState::Subscribed;
        self.reopen_at = None;
        self.backoff.reset();
        if self.update() {
            self.fan_out();
        }
        if self.state == HandlerState::Subscribed && self.notify != Notify::Unpollable {
            self.notify = Notify::Armed;
        }
    }

    fn schedule_reopen(&mut self) {
        let delay = self.backoff.next_delay();
        self.state = HandlerState::AwaitingReopen;
        self.reopen_at = Some(Instant::now() + delay);
        debug!(key = %self.key, ?delay, "reopen scheduled");
    }

    /// Read failure path: close, and retry later if we were subscribed.
    fn resubscribe(&mut self) {
        let was_subscribed = self.state == HandlerState::Subscribed;
        self.unsubscribe();
        if was_subscribed {
            self.schedule_reopen();
        }
    }

    fn try_reopen(&mut self) {
        if self.resource.open() {
            info!(key = %self.key, location = %self.resource.location(), "property file opened");
            self.activate();
        } else {
            self.schedule_reopen();
        }
    }

    // --- Reading ---

    fn set_cache(&mut self, value: Value) -> bool {
        if value == self.cache {
            return false;
        }
        self.cache = value;
        true
    }

    /// Re-reads the file into the cache. Returns whether the cache changed.
    pub fn update(&mut self) -> bool {
        if !self.resource.open() {
            let fallback = self.codec.default_for(&self.cache);
            let changed = self.set_cache(fallback);
            self.resubscribe();
            return changed;
        }

        match self.resource.read_into(&mut self.buffer, &self.read) {
            Ok(len) => {
                let decoded = {
                    let text = String::from_utf8_lossy(&self.buffer[..len]);
                    if text.is_empty() {
                        Value::Unset
                    } else {
                        self.codec.decode(&text)
                    }
                };
                let next = match decoded {
                    Value::Unset if self.cache.is_unset() => Value::String(String::new()),
                    Value::Unset => self.codec.default_for(&self.cache),
                    value => value,
                };
                self.set_cache(next)
            }
            Err(err) => {
                warn!(
                    key = %self.key,
                    path = ?self.resource.path(),
                    %err,
                    "property read failed"
                );
                let fallback = self.codec.default_for(&self.cache);
                let changed = self.set_cache(fallback);
                self.resubscribe();
                changed
            }
        }
    }

    /// Forced re-read outside readiness notification.
    ///
    /// Only a subscribed handler reads; backoff and rate state are untouched.
    pub fn refresh(&mut self) -> bool {
        if self.state != HandlerState::Subscribed {
            debug!(key = %self.key, state = ?self.state, "refresh skipped, property not open");
            return false;
        }
        let changed = self.update();
        if changed {
            self.fan_out();
        }
        changed
    }

    // --- Event loop integration ---

    /// Descriptor to watch for readiness, if notification is armed.
    pub fn poll_fd(&self) -> Option<RawFd> {
        if self.state == HandlerState::Subscribed && self.notify == Notify::Armed {
            self.resource.raw_fd()
        } else {
            None
        }
    }

    /// Earliest instant at which `on_timer` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.state, self.notify) {
            (HandlerState::AwaitingReopen, _) => self.reopen_at,
            (HandlerState::Subscribed, Notify::Paused(until)) => Some(until),
            _ => None,
        }
    }

    pub fn on_timer(&mut self, now: Instant) {
        if let Notify::Paused(until) = self.notify {
            if until <= now {
                self.notify = Notify::Armed;
            }
        }
        if self.state == HandlerState::AwaitingReopen
            && self.reopen_at.map_or(false, |at| at <= now)
        {
            self.try_reopen();
        }
    }

    /// The watched descriptor reported readiness.
    pub fn on_ready(&mut self) {
        if self.state != HandlerState::Subscribed || self.notify != Notify::Armed {
            return;
        }
        self.notify = Notify::Off;

        if self.rate.record(wall_clock_second()) {
            if let Some(fd) = self.resource.raw_fd() {
                if poll::has_error_condition(fd, self.probe_timeout) {
                    warn!(
                        key = %self.key,
                        path = ?self.resource.path(),
                        "unpollable property file is polled, disabling notification"
                    );
                    self.notify = Notify::Unpollable;
                    return;
                }
            }
            match self.rate.tolerate() {
                Tolerance::Raised(max_rate) => {
                    debug!(key = %self.key, max_rate, "raising readiness rate limit")
                }
                Tolerance::Reset => debug!(key = %self.key, "readiness rate very high, resetting"),
            }
        }

        if self.update() {
            self.fan_out();
        }

        if self.state == HandlerState::Subscribed {
            self.notify = if self.rearm_delay.is_zero() {
                Notify::Armed
            } else {
                Notify::Paused(Instant::now() + self.rearm_delay)
            };
        }
    }

    pub fn snapshot(&self) -> HandlerSnapshot {
        HandlerSnapshot {
            serial: self.serial,
            state: self.state,
            subscribers: self.subscribers.len(),
            value: self.cache.clone(),
            location: self.resource.location(),
            open_failures: self.resource.failures(),
            reopen_delay_ms: self.backoff.current().as_millis() as u64,
            max_rate: self.rate.max_rate(),
            unpollable: self.notify == Notify::Unpollable,
        }
    }
}

impl Drop for PropertyHandler {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
