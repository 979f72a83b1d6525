//! Change notifications for the file list.
//!
//! Observers are called synchronously. Every insertion or removal is
//! bracketed: the "about to" event fires before the list changes and the
//! matching completion event fires after. Ranges are inclusive file indices.

/// A change to a card's file list or block accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardEvent {
    FilesAboutToBeInserted { start: usize, end: usize },
    FilesInserted,
    FilesAboutToBeRemoved { start: usize, end: usize },
    FilesRemoved,
    BlockCountChanged { size_no_sys: u16, free: u16 },
}

pub trait CardObserver: Send {
    fn on_event(&mut self, event: &CardEvent);
}

impl<F> CardObserver for F
where
    F: FnMut(&CardEvent) + Send,
{
    fn on_event(&mut self, event: &CardEvent) {
        self(event)
    }
}

/// Registered observers of one card.
#[derive(Default)]
pub struct EventBus {
    observers: Vec<Box<dyn CardObserver>>,
}

impl EventBus {
    pub fn subscribe(&mut self, observer: Box<dyn CardObserver>) {
        self.observers.push(observer);
    }

    pub fn emit(&mut self, event: CardEvent) {
        for observer in self.observers.iter_mut() {
            observer.on_event(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observers.len())
            .finish()
    }
}
