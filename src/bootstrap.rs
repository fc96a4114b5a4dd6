//! One-shot asynchronous initialization
//!
//! [`Bootstrap`] runs an initializer at most once at a time. Callers that
//! arrive while an attempt is in flight wait on that same attempt and all
//! receive its outcome, including the same error. A success is cached for
//! the lifetime of the value; a failure clears the slot so a later call can
//! try again.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

type Attempt<T, E> = Shared<BoxFuture<'static, Result<Arc<T>, E>>>;

enum State<T: ?Sized, E> {
    Empty,
    Pending(Attempt<T, E>),
    Ready(Arc<T>),
}

pub struct Bootstrap<T: ?Sized, E> {
    state: Mutex<State<T, E>>,
}

impl<T, E> Bootstrap<T, E>
where
    T: ?Sized + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Empty),
        }
    }

    /// Already initialized value
    #[cfg(test)]
    pub fn ready(value: Arc<T>) -> Self {
        Self {
            state: Mutex::new(State::Ready(value)),
        }
    }

    /// The cached value, if initialization has succeeded
    pub fn get(&self) -> Option<Arc<T>> {
        match &*self.state.lock() {
            State::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Return the cached value or run `init` to produce it.
    ///
    /// `init` is only called when no value is cached and no attempt is in
    /// flight.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>, E>> + Send + 'static,
    {
        let attempt = {
            let mut state = self.state.lock();
            match &*state {
                State::Ready(value) => return Ok(value.clone()),
                State::Pending(attempt) => attempt.clone(),
                State::Empty => {
                    let attempt = init().boxed().shared();
                    *state = State::Pending(attempt.clone());
                    attempt
                }
            }
        };

        let result = attempt.clone().await;

        let mut state = self.state.lock();
        // Only the attempt we waited on may settle the slot
        let settles = matches!(&*state, State::Pending(current) if current.ptr_eq(&attempt));
        if settles {
            *state = match &result {
                Ok(value) => State::Ready(value.clone()),
                Err(_) => State::Empty,
            };
        }

        result
    }
}

impl<T, E> Default for Bootstrap<T, E>
where
    T: ?Sized + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
