//! One-shot asynchronous results with chainable reactions.
//!
//! A [`Promise`] starts `Pending` and settles exactly once, to `Fulfilled` or
//! `Rejected`. The first call to [`Resolver::resolve`] or [`Rejecter::reject`]
//! wins; every later call is discarded.
//!
//! Reactions are stored separately from the state: attaching one to a pending
//! promise appends it to the reaction list, attaching one to a settled promise
//! runs it right away with the cached outcome. Settling stores the state
//! first and then runs the queued reactions in attachment order, outside any
//! borrow, so a reaction may freely attach further reactions or settle other
//! promises. A reaction attached to the same promise while that dispatch is
//! still running is queued behind the remaining ones rather than run inline.
//!
//! Chaining methods return a new promise whose outcome depends on the parent
//! and on what the reaction returns. Methods ending in a promise-returning
//! closure ([`and_then`](Promise::and_then), [`or_else`](Promise::or_else))
//! flatten: the chained promise follows the inner one.
//!
//! # Example
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use std::time::Duration;
//! use tickloop::{Promise, Runtime};
//!
//! let mut rt = Runtime::new();
//! let handle = rt.handle();
//! let seen = Rc::new(Cell::new(0));
//!
//! let s = seen.clone();
//! Promise::<i32, String>::new(move |resolve, _reject| {
//!     handle.schedule(Duration::from_millis(10), move || {
//!         resolve.resolve(10);
//!     });
//! })
//! .then(move |v| s.set(v))
//! .fail(|err| eprintln!(":> {err}"));
//!
//! rt.run();
//! assert_eq!(seen.get(), 10);
//! ```

use crate::config::RejectionPolicy;
use crate::runtime::{Handle, try_current};

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::warn;

/// Settlement state of a promise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromiseState<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> PromiseState<T, E> {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

type Reaction<T, E> = Box<dyn FnOnce(Result<T, E>)>;
type Reporter<E> = Box<dyn FnOnce(&E)>;

struct Shared<T, E> {
    state: PromiseState<T, E>,
    reactions: Vec<Reaction<T, E>>,
    // Set while `settle` runs the reaction list.
    dispatching: bool,
    observed: bool,
    report: Option<Reporter<E>>,
}

impl<T, E> Drop for Shared<T, E> {
    fn drop(&mut self) {
        if self.observed {
            return;
        }
        if let (PromiseState::Rejected(error), Some(report)) = (&self.state, self.report.take()) {
            report(error);
        }
    }
}

// What a chained reaction produced.
enum Next<U, E> {
    Settle(Result<U, E>),
    Follow(Promise<U, E>),
}

/// Handle to a one-shot asynchronous result.
///
/// Clones refer to the same promise.
pub struct Promise<T, E> {
    shared: Rc<RefCell<Shared<T, E>>>,
}

/// Fulfils the promise it was created with. Clonable; the first settlement
/// through any resolver or rejecter wins.
pub struct Resolver<T, E> {
    shared: Rc<RefCell<Shared<T, E>>>,
}

/// Rejects the promise it was created with. Clonable; the first settlement
/// through any resolver or rejecter wins.
pub struct Rejecter<T, E> {
    shared: Rc<RefCell<Shared<T, E>>>,
}

fn settle<T: Clone, E: Clone>(shared: &Rc<RefCell<Shared<T, E>>>, outcome: Result<T, E>) -> bool {
    {
        let mut inner = shared.borrow_mut();
        if inner.state.is_settled() {
            return false;
        }
        inner.state = match &outcome {
            Ok(value) => PromiseState::Fulfilled(value.clone()),
            Err(error) => PromiseState::Rejected(error.clone()),
        };
        inner.dispatching = true;
    }

    // Reactions attached while this loop runs are appended to the list and
    // picked up by a later round, behind the ones attached before them.
    loop {
        let reactions = {
            let mut inner = shared.borrow_mut();
            if inner.reactions.is_empty() {
                inner.dispatching = false;
                break;
            }
            std::mem::take(&mut inner.reactions)
        };

        for reaction in reactions {
            reaction(outcome.clone());
        }
    }

    true
}

fn reporter<E: fmt::Debug + 'static>() -> Option<Reporter<E>> {
    let log: Reporter<E> = Box::new(|error| warn!(?error, "unhandled promise rejection"));

    let Some(handle) = try_current() else {
        return Some(log);
    };

    match handle.config().rejection_policy {
        RejectionPolicy::Ignore => None,
        RejectionPolicy::Log => Some(log),
        RejectionPolicy::Collect => {
            let sink = handle.rejection_sink();
            Some(Box::new(move |error| sink.borrow_mut().push(format!("{error:?}"))))
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    /// Creates a pending promise and returns it with its settling halves.
    pub fn pending() -> (Self, Resolver<T, E>, Rejecter<T, E>) {
        let shared = Rc::new(RefCell::new(Shared {
            state: PromiseState::Pending,
            reactions: Vec::new(),
            dispatching: false,
            observed: false,
            report: reporter::<E>(),
        }));

        (
            Self {
                shared: shared.clone(),
            },
            Resolver {
                shared: shared.clone(),
            },
            Rejecter { shared },
        )
    }

    /// Creates a promise and runs `executor` synchronously with its resolver
    /// and rejecter.
    ///
    /// The executor typically hands them to a timer, coroutine or process
    /// callback that settles the promise later.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>),
    {
        let (promise, resolve, reject) = Self::pending();
        executor(resolve, reject);
        promise
    }

    /// A promise already fulfilled with `value`.
    pub fn resolved(value: T) -> Self {
        let (promise, resolve, _) = Self::pending();
        resolve.resolve(value);
        promise
    }

    /// A promise already rejected with `error`.
    pub fn rejected(error: E) -> Self {
        let (promise, _, reject) = Self::pending();
        reject.reject(error);
        promise
    }

    /// A promise fulfilled with `value` by a timer on `handle` after `delay`.
    pub fn delay(handle: &Handle, delay: Duration, value: T) -> Self {
        Self::new(|resolve, _| {
            handle.schedule(delay, move || {
                resolve.resolve(value);
            });
        })
    }

    /// Fulfils with every value, in input order, once all inputs fulfil.
    /// Rejects with the first rejection.
    pub fn all(promises: Vec<Promise<T, E>>) -> Promise<Vec<T>, E> {
        let (all, resolve, reject) = Promise::<Vec<T>, E>::pending();

        if promises.is_empty() {
            resolve.resolve(Vec::new());
            return all;
        }

        let slots: Rc<RefCell<(Vec<Option<T>>, usize)>> =
            Rc::new(RefCell::new((vec![None; promises.len()], promises.len())));

        for (index, promise) in promises.into_iter().enumerate() {
            let slots = slots.clone();
            let resolve = resolve.clone();
            let reject = reject.clone();

            promise.subscribe(Box::new(move |outcome| match outcome {
                Ok(value) => {
                    let finished: Option<Vec<T>> = {
                        let mut slots = slots.borrow_mut();
                        let (values, remaining) = &mut *slots;
                        values[index] = Some(value);
                        *remaining -= 1;
                        (*remaining == 0).then(|| values.iter_mut().filter_map(Option::take).collect())
                    };
                    if let Some(values) = finished {
                        resolve.resolve(values);
                    }
                }
                Err(error) => {
                    reject.reject(error);
                }
            }));
        }

        all
    }

    /// Current state, cloned.
    pub fn state(&self) -> PromiseState<T, E> {
        self.shared.borrow().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        !self.shared.borrow().state.is_settled()
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.shared.borrow().state, PromiseState::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.shared.borrow().state, PromiseState::Rejected(_))
    }

    // Runs `reaction` with the outcome: now if settled, at settlement otherwise.
    // During a settlement's dispatch it queues behind the pending reactions.
    fn subscribe(&self, reaction: Reaction<T, E>) {
        let settled = {
            let mut inner = self.shared.borrow_mut();
            inner.observed = true;
            if inner.dispatching {
                None
            } else {
                match &inner.state {
                    PromiseState::Pending => None,
                    PromiseState::Fulfilled(value) => Some(Ok(value.clone())),
                    PromiseState::Rejected(error) => Some(Err(error.clone())),
                }
            }
        };

        match settled {
            Some(outcome) => reaction(outcome),
            None => self.shared.borrow_mut().reactions.push(reaction),
        }
    }

    fn chain<U, F>(&self, react: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(Result<T, E>) -> Next<U, E> + 'static,
    {
        let (chained, resolve, reject) = Promise::<U, E>::pending();

        self.subscribe(Box::new(move |outcome| match react(outcome) {
            Next::Settle(Ok(value)) => {
                resolve.resolve(value);
            }
            Next::Settle(Err(error)) => {
                reject.reject(error);
            }
            Next::Follow(inner) => inner.subscribe(Box::new(move |outcome| match outcome {
                Ok(value) => {
                    resolve.resolve(value);
                }
                Err(error) => {
                    reject.reject(error);
                }
            })),
        }));

        chained
    }

    /// Maps the fulfillment value. Rejections pass through unchanged.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.chain(move |outcome| Next::Settle(outcome.map(on_fulfilled)))
    }

    /// Like [`then`](Self::then), but the reaction may fail, rejecting the
    /// chained promise.
    pub fn try_then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U, E> + 'static,
    {
        self.chain(move |outcome| Next::Settle(outcome.and_then(on_fulfilled)))
    }

    /// Continues with the promise returned by the reaction; the chained
    /// promise settles when that inner promise does.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Promise<U, E> + 'static,
    {
        self.chain(move |outcome| match outcome {
            Ok(value) => Next::Follow(on_fulfilled(value)),
            Err(error) => Next::Settle(Err(error)),
        })
    }

    /// Recovers from a rejection. The chained promise fulfils with either the
    /// parent's value or the handler's return value.
    pub fn fail<F>(&self, on_rejected: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> T + 'static,
    {
        self.chain(move |outcome| Next::Settle(Ok(outcome.unwrap_or_else(on_rejected))))
    }

    /// Like [`fail`](Self::fail), but the handler may signal failure again.
    pub fn try_fail<F>(&self, on_rejected: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> Result<T, E> + 'static,
    {
        self.chain(move |outcome| Next::Settle(outcome.or_else(on_rejected)))
    }

    /// Recovers from a rejection with another promise.
    pub fn or_else<F>(&self, on_rejected: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> Promise<T, E> + 'static,
    {
        self.chain(move |outcome| match outcome {
            Ok(value) => Next::Settle(Ok(value)),
            Err(error) => Next::Follow(on_rejected(error)),
        })
    }

    /// Runs `on_settled` on either outcome and passes the outcome through.
    pub fn finally<F>(&self, on_settled: F) -> Promise<T, E>
    where
        F: FnOnce() + 'static,
    {
        self.chain(move |outcome| {
            on_settled();
            Next::Settle(outcome)
        })
    }
}

impl<T: Clone, E: Clone> Resolver<T, E> {
    /// Fulfils the promise. Returns `false` if it had already settled.
    pub fn resolve(&self, value: T) -> bool {
        settle(&self.shared, Ok(value))
    }
}

impl<T: Clone, E: Clone> Rejecter<T, E> {
    /// Rejects the promise. Returns `false` if it had already settled.
    pub fn reject(&self, error: E) -> bool {
        settle(&self.shared, Err(error))
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> Clone for Rejecter<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.borrow();
        f.debug_struct("Promise")
            .field("state", &inner.state)
            .field("reactions", &inner.reactions.len())
            .finish()
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

impl<T, E> fmt::Debug for Rejecter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejecter").finish_non_exhaustive()
    }
}
