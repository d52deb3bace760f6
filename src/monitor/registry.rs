//! The registry thread: owns every property handler.

use super::handle::RegistryHandle;
use super::types::{ClientRef, RegistrySnapshot, Request};
use super::waker::{wake_pair, WakeReceiver};
use crate::client::ClientHandle;
use crate::codec::{TextCodec, ValueCodec};
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::poll::{self, poll_fd, PollFd, READ_EVENTS};
use crate::property::PropertyHandler;
use crate::resolver::{LocationResolver, StateDirResolver};
use crate::types::{ClientId, Value};
use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Pause after a failed `poll` so a persistent error does not spin.
const POLL_ERROR_PAUSE: Duration = Duration::from_millis(10);

/// A running property registry.
///
/// Owns the registry thread. Dropping it (or calling [`Registry::shutdown`])
/// drains queued requests and joins the thread.
pub struct Registry {
    handle: RegistryHandle,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Registry {
    /// Starts a registry using the state-directory layout and text codec.
    pub fn start(config: MonitorConfig) -> Result<Self> {
        let resolver = Arc::new(StateDirResolver::from_config(&config));
        Self::start_with(config, resolver, Arc::new(TextCodec))
    }

    /// Starts a registry with custom key resolution and value codec.
    pub fn start_with(
        config: MonitorConfig,
        resolver: Arc<dyn LocationResolver>,
        codec: Arc<dyn ValueCodec>,
    ) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let (waker, wake) = wake_pair()?;
        let handle = RegistryHandle::new(sender, Arc::new(waker), config.client.clone());

        let actor = RegistryActor {
            handlers: HashMap::new(),
            retired: Vec::new(),
            requests: receiver,
            wake,
            resolver,
            codec,
            config,
            next_serial: 0,
        };
        let thread = thread::Builder::new()
            .name("property-registry".to_string())
            .spawn(move || actor.run())?;

        Ok(Self {
            handle,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn handle(&self) -> RegistryHandle {
        self.handle.clone()
    }

    /// New unsubscribed client for `key` on this registry.
    pub fn client(&self, key: impl Into<String>) -> ClientHandle {
        ClientHandle::with_registry(key, &self.handle)
    }

    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }

    /// Stops the registry thread after it processed everything queued so far.
    ///
    /// Idempotent. Requests sent afterwards get broken replies.
    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        self.handle.post(Request::Shutdown);
        if thread.join().is_err() {
            error!("property registry thread panicked");
        }
    }
}

impl std::ops::Deref for Registry {
    type Target = RegistryHandle;

    fn deref(&self) -> &RegistryHandle {
        &self.handle
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the registry thread.
struct RegistryActor {
    handlers: HashMap<String, PropertyHandler>,
    /// Handlers removed during this loop iteration; dropped at its end so
    /// descriptors polled in the same iteration stay valid.
    retired: Vec<PropertyHandler>,
    requests: Receiver<Request>,
    wake: WakeReceiver,
    resolver: Arc<dyn LocationResolver>,
    codec: Arc<dyn ValueCodec>,
    config: MonitorConfig,
    next_serial: u64,
}

impl RegistryActor {
    fn run(mut self) {
        info!("property registry started");
        loop {
            let (mut fds, ready_keys) = self.poll_set();
            let timeout = self.next_timeout(Instant::now());
            if let Err(err) = poll::wait(&mut fds, timeout) {
                error!(%err, "poll failed");
                thread::sleep(POLL_ERROR_PAUSE);
            }

            if fds[0].revents != 0 {
                self.wake.drain();
            }
            if !self.process_requests() {
                break;
            }

            for (pfd, key) in fds[1..].iter().zip(&ready_keys) {
                if pfd.revents != 0 {
                    self.guarded("readiness", |actor| actor.on_ready(key));
                }
            }
            self.guarded("timers", |actor| actor.fire_timers(Instant::now()));
            self.sweep();
        }
        self.teardown();
        info!("property registry stopped");
    }

    /// Wake socket first, then every armed property descriptor.
    fn poll_set(&self) -> (Vec<PollFd>, Vec<String>) {
        let mut fds = vec![poll_fd(self.wake.as_raw_fd(), READ_EVENTS)];
        let mut keys = Vec::new();
        for (key, handler) in &self.handlers {
            if let Some(fd) = handler.poll_fd() {
                fds.push(poll_fd(fd, READ_EVENTS));
                keys.push(key.clone());
            }
        }
        (fds, keys)
    }

    fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.handlers
            .values()
            .filter_map(|h| h.next_deadline())
            .min()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Handles every queued request. Returns false once shutdown was requested.
    fn process_requests(&mut self) -> bool {
        loop {
            match self.requests.try_recv() {
                Ok(Request::Shutdown) => {
                    self.drain_after_shutdown();
                    return false;
                }
                Ok(request) => self.dispatch(request),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Answers requests that were queued behind the shutdown request.
    fn drain_after_shutdown(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            if !matches!(request, Request::Shutdown) {
                self.dispatch(request);
            }
        }
    }

    /// Runs `f`, containing any panic to this one unit of work.
    fn guarded<F>(&mut self, what: &'static str, f: F)
    where
        F: FnOnce(&mut Self),
    {
        if panic::catch_unwind(AssertUnwindSafe(|| f(self))).is_err() {
            error!(what, "registry task panicked, continuing");
        }
    }

    fn dispatch(&mut self, request: Request) {
        let kind = request.kind();
        self.guarded(kind, move |actor| actor.handle(request));
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Subscribe { key, client, reply } => {
                let value = self.subscribe(&key, client);
                let _ = reply.send(value);
            }
            Request::Unsubscribe { key, client, reply } => {
                self.unsubscribe(&key, client);
                let _ = reply.send(());
            }
            Request::Write { key, value, reply } => {
                let _ = reply.send(self.write(&key, &value));
            }
            Request::Refresh { key } => self.refresh(&key),
            Request::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            // Only meaningful to the loop
            Request::Shutdown => {}
        }
    }

    // --- Requests ---

    fn subscribe(&mut self, key: &str, client: ClientRef) -> Value {
        if key.is_empty() {
            warn!(client = %client.id(), "subscribe with empty key rejected");
            return Value::Unset;
        }

        let handler = match self.handlers.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let locations = self.resolver.locations(key);
                if locations.is_empty() {
                    warn!(key, client = %client.id(), "unknown property, subscribe rejected");
                    return Value::Unset;
                }
                self.next_serial += 1;
                debug!(key, serial = self.next_serial, "creating property handler");
                entry.insert(PropertyHandler::new(
                    key,
                    locations,
                    self.next_serial,
                    Arc::clone(&self.codec),
                    &self.config,
                ))
            }
        };

        let id = client.id();
        if !handler.attach(client) {
            debug!(key, client = %id, "client already subscribed");
        }
        handler.subscribe()
    }

    fn unsubscribe(&mut self, key: &str, client: ClientId) {
        let Some(handler) = self.handlers.get_mut(key) else {
            debug!(key, client = %client, "unsubscribe for unknown property ignored");
            return;
        };
        if !handler.detach(client) {
            debug!(key, client = %client, "unsubscribe for detached client ignored");
            return;
        }
        if !handler.has_subscribers() {
            self.retire(key);
        }
    }

    fn write(&self, key: &str, value: &Value) -> bool {
        let locations = self.resolver.locations(key);
        if locations.is_empty() {
            warn!(key, "unknown property, write rejected");
            return false;
        }

        let payload = self.codec.encode(value);
        for (location, path) in locations.iter() {
            let mut file = match OpenOptions::new().write(true).truncate(true).open(path) {
                Ok(file) => file,
                Err(err) => {
                    debug!(key, %location, path = %path.display(), %err, "location not writable");
                    continue;
                }
            };
            return match file.write(&payload) {
                Ok(written) if written == payload.len() => {
                    debug!(key, %location, %value, "property written");
                    true
                }
                Ok(written) => {
                    warn!(key, written, expected = payload.len(), "short property write");
                    false
                }
                Err(err) => {
                    warn!(key, path = %path.display(), %err, "property write failed");
                    false
                }
            };
        }

        warn!(key, "no writable location for property");
        false
    }

    fn refresh(&mut self, key: &str) {
        match self.handlers.get_mut(key) {
            Some(handler) => {
                handler.refresh();
                // Fan-out may have found every subscriber gone
                if !handler.has_subscribers() {
                    self.retire(key);
                }
            }
            None => debug!(key, "refresh for unsubscribed property ignored"),
        }
    }

    fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            handlers: self
                .handlers
                .iter()
                .map(|(key, handler)| (key.clone(), handler.snapshot()))
                .collect(),
        }
    }

    // --- Loop work ---

    fn on_ready(&mut self, key: &str) {
        match self.handlers.get_mut(key) {
            Some(handler) => handler.on_ready(),
            None => debug!(key, "readiness for retired property ignored"),
        }
    }

    fn fire_timers(&mut self, now: Instant) {
        for handler in self.handlers.values_mut() {
            handler.on_timer(now);
        }
    }

    fn retire(&mut self, key: &str) {
        if let Some(mut handler) = self.handlers.remove(key) {
            debug!(key, "last subscriber left, retiring handler");
            handler.unsubscribe();
            self.retired.push(handler);
        }
    }

    /// Retires handlers whose subscribers all went away, then frees retired
    /// handlers.
    fn sweep(&mut self) {
        let idle: Vec<String> = self
            .handlers
            .iter()
            .filter(|(_, h)| !h.has_subscribers())
            .map(|(key, _)| key.clone())
            .collect();
        for key in idle {
            self.retire(&key);
        }
        self.retired.clear();
    }

    fn teardown(&mut self) {
        let count = self.handlers.len();
        for (_, mut handler) in self.handlers.drain() {
            handler.unsubscribe();
        }
        self.retired.clear();
        debug!(handlers = count, "registry handlers closed");
    }
}
