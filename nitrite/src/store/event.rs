use crate::errors::NitriteResult;
use anyhow::Error;
use basu::error::BasuError;
use basu::event::Event;
use basu::Handle;
use std::fmt::Debug;
use std::sync::Arc;

/// Lifecycle events published by a store.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StoreEvents {
    Opened,
    Commit,
    Closing,
    Closed,
}

/// Payload delivered to a [StoreEventListener].
#[derive(Debug, Clone)]
pub struct StoreEventInfo {
    event: StoreEvents,
    store_path: String,
}

impl StoreEventInfo {
    pub fn new(event: StoreEvents, store_path: &str) -> Self {
        StoreEventInfo {
            event,
            store_path: store_path.to_string(),
        }
    }

    pub fn event(&self) -> StoreEvents {
        self.event
    }

    /// File path of the store, empty for in-memory stores.
    pub fn store_path(&self) -> &str {
        &self.store_path
    }
}

pub trait StoreEventCallback: Send + Sync + Fn(StoreEventInfo) -> NitriteResult<()> {}

impl<F> StoreEventCallback for F where F: Send + Sync + Fn(StoreEventInfo) -> NitriteResult<()> {}

/// Listener notified of [StoreEvents].
#[derive(Clone)]
pub struct StoreEventListener {
    on_event: Arc<dyn StoreEventCallback>,
}

impl StoreEventListener {
    pub fn new(on_event: impl StoreEventCallback + 'static) -> Self {
        StoreEventListener {
            on_event: Arc::new(on_event),
        }
    }
}

impl Handle<StoreEventInfo> for StoreEventListener {
    fn handle(&self, event: &Event<StoreEventInfo>) -> Result<(), BasuError> {
        match (self.on_event)(event.data.clone()) {
            Ok(_) => Ok(()),
            Err(e) => Err(BasuError::HandlerError(Error::from(e))),
        }
    }
}

impl Debug for StoreEventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEventListener").finish()
    }
}
