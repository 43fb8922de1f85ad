/// Hand-off of a single reply from the dispatcher thread to a waiting caller.
///
/// `channel` creates a connected `Promise`/`Future` pair. The dispatcher side
/// fulfils the promise once, with a message or an error, and the caller side
/// blocks on the future until then or until its timeout.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, trace};

use crate::dispatcher::{lock, Dispatch, Dispatcher, Listener, ListenerId};
use crate::error::AntError;
use crate::message::{AntMessage, Value};
use crate::Result;

pub fn channel(timeout: Duration) -> (Promise, Future) {
    let (tx, rx) = bounded(1);
    (
        Promise { tx },
        Future {
            rx,
            timeout,
            outcome: Mutex::new(None),
            listener: Mutex::new(None),
        },
    )
}

/// Write side of a `Future`. Only the first fulfilment is kept.
#[derive(Clone)]
pub struct Promise {
    tx: Sender<Result<AntMessage>>,
}

impl Promise {
    /// Returns false if the future already had an outcome or was dropped.
    pub fn fulfil(&self, outcome: Result<AntMessage>) -> bool {
        self.tx.try_send(outcome).is_ok()
    }

    pub fn set(&self, message: AntMessage) -> bool {
        self.fulfil(Ok(message))
    }

    pub fn fail(&self, error: AntError) -> bool {
        self.fulfil(Err(error))
    }
}

pub struct Future {
    rx: Receiver<Result<AntMessage>>,
    timeout: Duration,
    outcome: Mutex<Option<Result<AntMessage>>>,
    listener: Mutex<Option<(Dispatcher, ListenerId)>>,
}

impl Future {
    /// Ties the future to the listener that will fulfil it. A wait that times
    /// out removes that listener from the dispatcher.
    pub fn bind(self, dispatcher: &Dispatcher, id: ListenerId) -> Self {
        *lock(&self.listener) = Some((dispatcher.clone(), id));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits with the timeout the future was created with.
    pub fn wait(&self) -> Result<AntMessage> {
        self.wait_timeout(self.timeout)
    }

    /// Blocks until fulfilled or `timeout` elapses. The outcome is kept, so
    /// later waits return the same message or error immediately.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<AntMessage> {
        let mut outcome = lock(&self.outcome);
        if let Some(outcome) = outcome.as_ref() {
            return outcome.clone();
        }
        let received = match self.rx.recv_timeout(timeout) {
            Ok(received) => received,
            Err(RecvTimeoutError::Timeout) => {
                self.cancel();
                // The reply may have raced the removal.
                match self.rx.try_recv() {
                    Ok(received) => received,
                    Err(_) => {
                        debug!("Future timed out after {:?}", timeout);
                        Err(AntError::Timeout)
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(AntError::Disconnected),
        };
        *outcome = Some(received.clone());
        received
    }

    /// `wait` then the fulfilled message.
    pub fn result(&self) -> Result<AntMessage> {
        self.wait()
    }

    /// Unregisters the bound listener, if any. Used when the request the
    /// future waits on could not be written.
    pub fn cancel(&self) {
        if let Some((dispatcher, id)) = lock(&self.listener).take() {
            dispatcher.remove_listener(id);
        }
    }
}

/// Predicate over a decoded message: the message id must match and every
/// listed argument must be present with one of its accepted values.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageMatcher {
    msg_id: u8,
    args: Vec<(&'static str, Vec<Value>)>,
}

impl MessageMatcher {
    pub fn new(msg_id: u8) -> Self {
        MessageMatcher {
            msg_id,
            args: Vec::new(),
        }
    }

    pub fn with<V: Into<Value>>(mut self, name: &'static str, value: V) -> Self {
        self.args.push((name, vec![value.into()]));
        self
    }

    /// Accepts any of `values` for `name`.
    pub fn with_any<V: Into<Value> + Clone>(mut self, name: &'static str, values: &[V]) -> Self {
        self.args
            .push((name, values.iter().cloned().map(Into::into).collect()));
        self
    }

    pub fn msg_id(&self) -> u8 {
        self.msg_id
    }

    pub fn matches(&self, message: &AntMessage) -> bool {
        message.msg_id == self.msg_id
            && self.args.iter().all(|(name, accepted)| match message.args.get(name) {
                Some(actual) => accepted.iter().any(|expected| same_value(actual, expected)),
                None => false,
            })
    }
}

// Integers compare by value whatever their width.
fn same_value(actual: &Value, expected: &Value) -> bool {
    match (actual.as_u64(), expected.as_u64()) {
        (Some(actual), Some(expected)) => actual == expected,
        _ => actual == expected,
    }
}

pub type Validator = Box<dyn Fn(&AntMessage) -> Result<()> + Send + Sync>;

/// Listener that fulfils a promise with the first message its matcher
/// accepts, then unregisters itself.
pub struct MatchingListener {
    matcher: MessageMatcher,
    validator: Option<Validator>,
    promise: Promise,
}

impl MatchingListener {
    pub fn new(matcher: MessageMatcher, promise: Promise) -> Self {
        MatchingListener {
            matcher,
            validator: None,
            promise,
        }
    }

    /// A validator error fulfils the promise with that error instead of the
    /// message.
    pub fn validate<F>(mut self, validator: F) -> Self
    where
        F: Fn(&AntMessage) -> Result<()> + Send + Sync + 'static,
    {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Registers a listener on `dispatcher` and returns the future it will
    /// fulfil, bound so a timed out wait unregisters it.
    pub fn register(
        dispatcher: &Dispatcher,
        matcher: MessageMatcher,
        validator: Option<Validator>,
    ) -> Future {
        let (promise, future) = channel(dispatcher.config().get_reply_timeout());
        let listener = MatchingListener {
            matcher,
            validator,
            promise,
        };
        let id = dispatcher.add_listener(Arc::new(listener));
        future.bind(dispatcher, id)
    }
}

impl Listener for MatchingListener {
    fn on_message(&self, _dispatcher: &Dispatcher, message: &AntMessage) -> Dispatch {
        if !self.matcher.matches(message) {
            return Dispatch::Ignored;
        }
        trace!("Matched {}", message);
        let outcome = match &self.validator {
            Some(validator) => validator(message).map(|_| message.clone()),
            None => Ok(message.clone()),
        };
        self.promise.fulfil(outcome);
        Dispatch::Finished
    }
}
