use crate::common::NITRITE_EVENT;
use crate::errors::{ErrorKind, NitriteError, NitriteResult};
use basu::error::BasuError;
use basu::event::Event;
use basu::{EventBus, Handle, HandlerId};
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed event bus over [basu::EventBus].
///
/// All events of one bus share a single topic; the listener type `L`
/// pins which handlers may subscribe. Cloning yields another handle to
/// the same bus.
#[derive(Clone)]
pub struct NitriteEventBus<E, L> {
    inner: Arc<NitriteEventBusInner<E, L>>,
}

impl<E, L> Default for NitriteEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, L> NitriteEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    pub fn new() -> Self {
        NitriteEventBus {
            inner: Arc::new(NitriteEventBusInner {
                event_bus: EventBus::new(),
                phantom_data: PhantomData,
            }),
        }
    }

    /// Subscribes a listener and returns a handle for later removal.
    pub fn register(&self, listener: L) -> NitriteResult<Option<SubscriberRef>> {
        self.inner
            .event_bus
            .subscribe(NITRITE_EVENT, Box::new(listener))
            .map(|id| Some(SubscriberRef::new(id)))
            .map_err(nitrite_error)
    }

    pub fn deregister(&self, subscriber: SubscriberRef) -> NitriteResult<()> {
        self.inner
            .event_bus
            .unsubscribe(NITRITE_EVENT, &subscriber.inner)
            .map_err(nitrite_error)
    }

    /// Delivers an event to every listener. A bus without listeners
    /// accepts the event silently.
    pub fn publish(&self, event: E) -> NitriteResult<()> {
        if !self.has_listeners() {
            return Ok(());
        }

        let basu_event = Event::new(event);
        self.inner
            .event_bus
            .publish(NITRITE_EVENT, &basu_event)
            .map_err(nitrite_error)
    }

    /// Removes every listener.
    pub fn close(&self) -> NitriteResult<()> {
        self.inner.event_bus.clear().map_err(nitrite_error)
    }

    pub fn has_listeners(&self) -> bool {
        match self.inner.event_bus.get_handler_count(NITRITE_EVENT) {
            Ok(count) => count > 0,
            Err(BasuError::EventTypeNotFOUND) => false,
            Err(e) => {
                log::warn!("Failed to count event listeners: {}", e);
                false
            }
        }
    }
}

/// Handle returned by [NitriteEventBus::register].
pub struct SubscriberRef {
    pub(crate) inner: HandlerId,
}

impl SubscriberRef {
    pub fn new(inner: HandlerId) -> Self {
        SubscriberRef { inner }
    }
}

struct NitriteEventBusInner<E, L> {
    event_bus: EventBus<E>,
    phantom_data: PhantomData<L>,
}

fn nitrite_error(e: BasuError) -> NitriteError {
    let message = match e {
        BasuError::EventTypeNotFOUND => "Event bus has no listener registered".to_string(),
        BasuError::MutexPoisoned => "Event bus lock poisoned".to_string(),
        BasuError::HandlerError(cause) => format!("Event listener failed: {}", cause),
    };
    log::error!("{}", message);
    NitriteError::new(&message, ErrorKind::EventError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct CountingListener {
        count: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Handle<u32> for CountingListener {
        fn handle(&self, event: &Event<u32>) -> Result<(), BasuError> {
            if self.fail {
                return Err(BasuError::HandlerError(anyhow::anyhow!("listener failed")));
            }
            self.count.fetch_add(event.data as usize, Ordering::SeqCst);
            Ok(())
        }
    }

    fn listener(count: &Arc<AtomicUsize>, fail: bool) -> CountingListener {
        CountingListener {
            count: count.clone(),
            fail,
        }
    }

    #[test]
    fn publish_without_listeners_is_noop() {
        let bus: NitriteEventBus<u32, CountingListener> = NitriteEventBus::new();
        assert!(!bus.has_listeners());
        assert!(bus.publish(1).is_ok());
    }

    #[test]
    fn publish_reaches_listener() {
        let count = Arc::new(AtomicUsize::new(0));
        let bus: NitriteEventBus<u32, CountingListener> = NitriteEventBus::new();
        bus.register(listener(&count, false)).unwrap();
        assert!(bus.has_listeners());

        bus.publish(3).unwrap();
        bus.publish(4).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn deregister_stops_delivery() {
        let count = Arc::new(AtomicUsize::new(0));
        let bus: NitriteEventBus<u32, CountingListener> = NitriteEventBus::new();
        let subscriber = bus.register(listener(&count, false)).unwrap().unwrap();
        bus.deregister(subscriber).unwrap();

        bus.publish(5).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_error_maps_to_event_error() {
        let err = nitrite_error(BasuError::HandlerError(anyhow::anyhow!("listener failed")));
        assert_eq!(err.kind(), &ErrorKind::EventError);
        assert!(err.message().contains("listener failed"));
    }

    #[test]
    fn close_removes_listeners() {
        let count = Arc::new(AtomicUsize::new(0));
        let bus: NitriteEventBus<u32, CountingListener> = NitriteEventBus::new();
        bus.register(listener(&count, false)).unwrap();
        bus.close().unwrap();
        assert!(!bus.has_listeners());
    }
}
