//! Named publish/subscribe channels.
//!
//! An [`EventEmitter`] maps event names to ordered listener lists. Listeners
//! registered with [`on`](EventEmitter::on) stay until removed; listeners
//! registered with [`once`](EventEmitter::once) are detached by the first
//! [`emit`](EventEmitter::emit) that reaches them, before any listener of that
//! emit runs. A listener that emits the same name re-entrantly therefore never
//! re-triggers a `once` listener.
//!
//! The emitter is a shared handle: clones refer to the same registry, so a
//! listener can capture the emitter it is registered on.
//!
//! Listener panics are not caught here.
//!
//! # Example
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tickloop::EventEmitter;
//!
//! let events: EventEmitter<u32> = EventEmitter::new();
//! let total = Rc::new(Cell::new(0));
//!
//! let t = total.clone();
//! events.once("close", move |code| t.set(t.get() + code));
//!
//! assert_eq!(events.emit("close", &7), 1);
//! assert_eq!(events.emit("close", &7), 0);
//! assert_eq!(total.get(), 7);
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

type Listener<A> = Rc<dyn Fn(&A)>;

/// Identifies one registration for [`EventEmitter::off`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry<A> {
    id: ListenerId,
    listener: Listener<A>,
    once: bool,
}

struct Registry<A> {
    channels: HashMap<String, Vec<Entry<A>>>,
    next_id: u64,
}

impl<A> Registry<A> {
    fn add(&mut self, name: &str, listener: Listener<A>, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;

        self.channels
            .entry(name.to_owned())
            .or_default()
            .push(Entry { id, listener, once });

        id
    }

    // Snapshot of the listeners to invoke, with `once` entries already gone
    // from the stored list.
    fn detach_for_emit(&mut self, name: &str) -> Vec<Listener<A>> {
        let Some(entries) = self.channels.get_mut(name) else {
            return Vec::new();
        };

        let snapshot = entries.iter().map(|e| e.listener.clone()).collect();
        entries.retain(|e| !e.once);

        if entries.is_empty() {
            self.channels.remove(name);
        }

        snapshot
    }
}

/// Per-instance registry of named listeners.
pub struct EventEmitter<A> {
    registry: Rc<RefCell<Registry<A>>>,
}

impl<A: 'static> EventEmitter<A> {
    /// Creates an emitter with no listeners.
    pub fn new() -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry {
                channels: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Appends a persistent listener for `name`.
    pub fn on<F>(&self, name: &str, listener: F) -> ListenerId
    where
        F: Fn(&A) + 'static,
    {
        self.registry
            .borrow_mut()
            .add(name, Rc::new(listener), false)
    }

    /// Appends a listener for `name` that runs for the next emit only.
    pub fn once<F>(&self, name: &str, listener: F) -> ListenerId
    where
        F: Fn(&A) + 'static,
    {
        self.registry.borrow_mut().add(name, Rc::new(listener), true)
    }

    /// Removes a listener. Returns `false` if it was already removed or, for a
    /// `once` listener, already fired.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.borrow_mut();
        let mut emptied = None;
        let mut removed = false;

        for (name, entries) in registry.channels.iter_mut() {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                entries.remove(pos);
                removed = true;
                if entries.is_empty() {
                    emptied = Some(name.clone());
                }
                break;
            }
        }

        if let Some(name) = emptied {
            registry.channels.remove(&name);
        }

        removed
    }

    /// Removes every listener registered for `name`.
    pub fn clear(&self, name: &str) {
        self.registry.borrow_mut().channels.remove(name);
    }

    /// Number of listeners currently registered for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.registry
            .borrow()
            .channels
            .get(name)
            .map_or(0, Vec::len)
    }

    /// Invokes every listener registered for `name`, in registration order.
    ///
    /// `once` listeners are detached before the first listener runs. Listeners
    /// added during this emit are not invoked by it. Emitting a name with no
    /// listeners is a no-op.
    ///
    /// Returns the number of listeners invoked.
    pub fn emit(&self, name: &str, args: &A) -> usize {
        let listeners = self.registry.borrow_mut().detach_for_emit(name);

        for listener in &listeners {
            listener(args);
        }

        listeners.len()
    }
}

impl<A: 'static> Default for EventEmitter<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for EventEmitter<A> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<A> fmt::Debug for EventEmitter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.borrow();
        let mut names: Vec<_> = registry.channels.keys().collect();
        names.sort();

        f.debug_struct("EventEmitter")
            .field("channels", &names)
            .finish()
    }
}
