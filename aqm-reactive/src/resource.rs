//! Reloadable, observable holder of one upstream fetch.
//!
//! Lifecycle: a resource starts loading as soon as it is created. Each load
//! settles into `Ready` or `Error`; subscribers are notified synchronously,
//! in registration order, after the new state is committed. While a reload
//! is in flight the previous settled state stays visible.
//!
//! A reload requested while a load is already in flight does not start a
//! second fetch: it joins the in-flight one. At most one load is in flight,
//! so every settled load commits.

use crate::error::ResourceError;
use crate::Subscription;
use aqm_utils::dates::round_tenths;
use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use log::{debug, error, info};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

type Loader<T> = Rc<dyn Fn() -> LocalBoxFuture<'static, anyhow::Result<T>>>;
type Callback<T> = Rc<dyn Fn(&LoadState<T>)>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceOptions {
    pub reloadable: bool,
    /// Upper bound for one load; exceeding it settles the load as an error.
    pub timeout: Option<Duration>,
}

impl ResourceOptions {
    pub fn reloadable() -> Self {
        ResourceOptions {
            reloadable: true,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A successfully loaded value with its timing.
pub struct Loaded<T> {
    pub value: Rc<T>,
    pub loaded_at: DateTime<Utc>,
    /// Load duration rounded to one decimal second.
    pub elapsed_seconds: f64,
}

impl<T> Clone for Loaded<T> {
    fn clone(&self) -> Self {
        Loaded {
            value: Rc::clone(&self.value),
            loaded_at: self.loaded_at,
            elapsed_seconds: self.elapsed_seconds,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Loaded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loaded")
            .field("value", &self.value)
            .field("loaded_at", &self.loaded_at)
            .field("elapsed_seconds", &self.elapsed_seconds)
            .finish()
    }
}

pub enum LoadState<T> {
    Idle,
    Loading,
    Ready(Loaded<T>),
    Error(String),
}

impl<T> Clone for LoadState<T> {
    fn clone(&self) -> Self {
        match self {
            LoadState::Idle => LoadState::Idle,
            LoadState::Loading => LoadState::Loading,
            LoadState::Ready(loaded) => LoadState::Ready(loaded.clone()),
            LoadState::Error(message) => LoadState::Error(message.clone()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for LoadState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Idle => write!(f, "Idle"),
            LoadState::Loading => write!(f, "Loading"),
            LoadState::Ready(loaded) => f.debug_tuple("Ready").field(loaded).finish(),
            LoadState::Error(message) => f.debug_tuple("Error").field(message).finish(),
        }
    }
}

impl<T> LoadState<T> {
    /// The loaded value, only in `Ready`.
    pub fn value(&self) -> Option<Rc<T>> {
        match self {
            LoadState::Ready(loaded) => Some(Rc::clone(&loaded.value)),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            LoadState::Error(message) => Some(message.as_str()),
            _ => None,
        }
    }

    pub fn elapsed_seconds(&self) -> Option<f64> {
        match self {
            LoadState::Ready(loaded) => Some(loaded.elapsed_seconds),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LoadState::Ready(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LoadState::Error(_))
    }
}

struct Slot<T> {
    /// Last completed state: `Idle` until the first load settles.
    settled: LoadState<T>,
    initial: Option<Rc<T>>,
    in_flight: bool,
}

struct Inner<T> {
    name: String,
    loader: Loader<T>,
    options: ResourceOptions,
    slot: RefCell<Slot<T>>,
    subscribers: RefCell<Vec<(u64, Callback<T>)>>,
    next_subscriber: Cell<u64>,
    loads_started: Cell<u64>,
    settled_notify: Notify,
}

/// Observable holder of one externally fetched value.
pub struct AsyncResource<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for AsyncResource<T> {
    fn clone(&self) -> Self {
        AsyncResource {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> AsyncResource<T> {
    /// Create a resource and start its first load immediately.
    ///
    /// `initial` is what [`AsyncResource::current`] reports before the
    /// first load settles.
    ///
    /// # Panics
    ///
    /// Panics when called outside a `tokio::task::LocalSet`.
    pub fn new<F, Fut>(name: &str, initial: Option<T>, options: ResourceOptions, loader: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        let loader: Loader<T> = Rc::new(move || loader().boxed_local());
        let resource = AsyncResource {
            inner: Rc::new(Inner {
                name: name.to_string(),
                loader,
                options,
                slot: RefCell::new(Slot {
                    settled: LoadState::Idle,
                    initial: initial.map(Rc::new),
                    in_flight: false,
                }),
                subscribers: RefCell::new(Vec::new()),
                next_subscriber: Cell::new(0),
                loads_started: Cell::new(0),
                settled_notify: Notify::new(),
            }),
        };
        resource.start();
        resource
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_reloadable(&self) -> bool {
        self.inner.options.reloadable
    }

    /// `Loading` while a load is in flight, otherwise the settled state.
    pub fn state(&self) -> LoadState<T> {
        let slot = self.inner.slot.borrow();
        if slot.in_flight {
            LoadState::Loading
        } else {
            slot.settled.clone()
        }
    }

    /// Last settled state, still visible while a reload is in flight.
    pub fn settled(&self) -> LoadState<T> {
        self.inner.slot.borrow().settled.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.slot.borrow().in_flight
    }

    /// The value consumers should use: the initial value before the first
    /// load settles, the last ready value afterwards, nothing after an
    /// error.
    pub fn current(&self) -> Option<Rc<T>> {
        let slot = self.inner.slot.borrow();
        match &slot.settled {
            LoadState::Idle | LoadState::Loading => slot.initial.clone(),
            LoadState::Ready(loaded) => Some(Rc::clone(&loaded.value)),
            LoadState::Error(_) => None,
        }
    }

    /// Number of loader invocations so far.
    pub fn loads_started(&self) -> u64 {
        self.inner.loads_started.get()
    }

    /// Reload the resource, joining the in-flight load if there is one.
    pub fn reload(&self) -> Result<(), ResourceError> {
        if !self.inner.options.reloadable {
            return Err(ResourceError::NotReloadable(self.inner.name.clone()));
        }
        if self.is_loading() {
            debug!("{}: reload joined the in-flight load", self.inner.name);
            return Ok(());
        }
        self.start();
        Ok(())
    }

    /// Wait until no load is in flight.
    pub async fn wait_settled(&self) {
        loop {
            let notified = self.inner.settled_notify.notified();
            if !self.is_loading() {
                return;
            }
            notified.await;
        }
    }

    /// Register a callback run after every settled state is committed.
    pub fn subscribe(&self, callback: impl Fn(&LoadState<T>) + 'static) -> Subscription {
        let id = self.inner.next_subscriber.get();
        self.inner.next_subscriber.set(id + 1);
        self.inner
            .subscribers
            .borrow_mut()
            .push((id, Rc::new(callback)));
        let weak: Weak<Inner<T>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.borrow_mut().retain(|(i, _)| *i != id);
            }
        })
    }

    /// Callers check `in_flight` first; a second concurrent load is never
    /// started.
    fn start(&self) {
        self.inner.slot.borrow_mut().in_flight = true;
        self.inner.loads_started.set(self.inner.loads_started.get() + 1);
        let fetch = (self.inner.loader)();
        let timeout = self.inner.options.timeout;
        let this = self.clone();
        tokio::task::spawn_local(async move {
            let started = Instant::now();
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, fetch).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("timed out after {} seconds", limit.as_secs_f64())),
                },
                None => fetch.await,
            };
            let elapsed_seconds = round_tenths(started.elapsed().as_secs_f64());
            this.commit(result, elapsed_seconds);
        });
    }

    fn commit(&self, result: anyhow::Result<T>, elapsed_seconds: f64) {
        let state = {
            let mut slot = self.inner.slot.borrow_mut();
            slot.settled = match result {
                Ok(value) => {
                    info!("Loaded {} in {} seconds", self.inner.name, elapsed_seconds);
                    LoadState::Ready(Loaded {
                        value: Rc::new(value),
                        loaded_at: Utc::now(),
                        elapsed_seconds,
                    })
                }
                Err(e) => {
                    error!("Failed to load {}: {:#}", self.inner.name, e);
                    LoadState::Error(format!("{:#}", e))
                }
            };
            slot.in_flight = false;
            slot.settled.clone()
        };

        let subscribers: Vec<Callback<T>> = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for callback in subscribers {
            callback(&state);
        }
        self.inner.settled_notify.notify_waiters();
    }
}
