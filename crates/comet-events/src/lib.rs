//! Core event bus for the Comet addon framework.
//!
//! The loader, the settings store and embedding hosts all publish through a
//! shared [`EventBus`]. Subscribers receive events over a crossbeam channel
//! and read them at their own pace; a dropped receiver is pruned on the next
//! emit.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::cell::RefCell;
use std::rc::Rc;

/// Events published by the framework core.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// An addon finished activating (including any deferred userscripts).
    AddonActivated { id: String },
    /// An addon was deactivated and its side effects reversed.
    AddonDeactivated { id: String },
    /// A settings key changed. Keys use the flat `@<addon-id>/<setting-id>`
    /// form; framework keys such as `locale` carry no prefix.
    SettingChanged {
        key: String,
        value: serde_json::Value,
    },
    /// The addon registry was replaced wholesale.
    AddonListReloaded,
}

/// Clonable handle to the event bus. All clones share one subscriber list.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Rc<RefCell<Vec<Sender<CoreEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Events emitted after this call are
    /// buffered in the returned receiver until read.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    /// Fan an event out to every live subscriber. Subscribers whose
    /// receiver has been dropped are removed.
    pub fn emit(&self, event: CoreEvent) {
        tracing::trace!(?event, "core event");
        self.subscribers
            .borrow_mut()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_all_subscribers() {
        let bus = EventBus::new();
        let rx_a = bus.subscribe();
        let rx_b = bus.subscribe();

        bus.emit(CoreEvent::AddonActivated { id: "pause".into() });

        for rx in [&rx_a, &rx_b] {
            assert_eq!(
                rx.try_recv().expect("event delivered"),
                CoreEvent::AddonActivated { id: "pause".into() }
            );
        }
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(CoreEvent::AddonListReloaded);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(rx.try_recv().expect("live subscriber"), CoreEvent::AddonListReloaded);
    }

    #[test]
    fn test_clones_share_subscribers() {
        let bus = EventBus::new();
        let rx = bus.subscribe();

        let clone = bus.clone();
        clone.emit(CoreEvent::AddonDeactivated { id: "x".into() });
        assert_eq!(
            rx.try_recv().expect("clone emits to shared list"),
            CoreEvent::AddonDeactivated { id: "x".into() }
        );
    }

    #[test]
    fn test_events_buffer_until_read() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        bus.emit(CoreEvent::AddonActivated { id: "a".into() });
        bus.emit(CoreEvent::AddonActivated { id: "b".into() });

        let ids: Vec<_> = rx
            .try_iter()
            .map(|e| match e {
                CoreEvent::AddonActivated { id } => id,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
