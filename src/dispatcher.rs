/// The dispatcher owns the transport. A background thread reads frames off
/// it, decodes them, and offers each message to the registered listeners in
/// registration order until one of them handles it. Commands can be written
/// from any thread; writes are serialized.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, trace, warn};

use crate::dialect::SerialDialect;
use crate::error::AntError;
use crate::message::{AntMessage, ReadBuffer, Value};
use crate::transport::Transport;
use crate::Result;

/// Dispatcher timing and buffer settings.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    poll_timeout: Duration,
    write_timeout: Duration,
    reply_timeout: Duration,
    read_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Config {
            poll_timeout: Duration::from_millis(10),
            write_timeout: Duration::from_secs(1),
            reply_timeout: Duration::from_secs(2),
            read_size: 64,
        }
    }

    /// How long one read may block. Bounds how long `stop` waits.
    pub fn poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Default time a Future or a workflow step waits for its reply.
    pub fn reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size.max(1);
        self
    }

    pub fn get_poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn get_write_timeout(&self) -> Duration {
        self.write_timeout
    }

    pub fn get_reply_timeout(&self) -> Duration {
        self.reply_timeout
    }
}

/// What a listener did with a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Not for this listener, offer it to the next one.
    Ignored,
    /// Handled. No later listener sees the message.
    Consumed,
    /// Handled, and the listener is done: it is removed from the dispatcher.
    Finished,
}

pub trait Listener: Send + Sync {
    fn on_message(&self, dispatcher: &Dispatcher, message: &AntMessage) -> Dispatch;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listeners = Vec<(ListenerId, Arc<dyn Listener>)>;

struct Inner {
    transport: Box<dyn Transport>,
    dialect: SerialDialect,
    config: Config,
    listeners: Mutex<Listeners>,
    next_id: AtomicU64,
    writer: Mutex<()>,
    worker: Mutex<Option<Worker>>,
}

/// One run of the reader thread, with its own stop flag.
struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn on_current_thread(&self) -> bool {
        self.handle.thread().id() == thread::current().id()
    }

    fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| AntError::ApiUsage("dispatcher thread panicked".into()))
    }
}

/// Handle to a dispatcher. Clones share the same transport and listeners.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Dispatcher {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Dispatcher::with_config(transport, SerialDialect::new(), Config::new())
    }

    pub fn with_config<T: Transport + 'static>(
        transport: T,
        dialect: SerialDialect,
        config: Config,
    ) -> Self {
        Dispatcher {
            inner: Arc::new(Inner {
                transport: Box::new(transport),
                dialect,
                config,
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                writer: Mutex::new(()),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn dialect(&self) -> &SerialDialect {
        &self.inner.dialect
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.inner.listeners).push((id, listener));
        trace!("Added listener {:?}", id);
        id
    }

    /// Returns false if the listener was already gone.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|(l, _)| *l != id);
        let removed = listeners.len() != before;
        if removed {
            trace!("Removed listener {:?}", id);
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.worker)
            .as_ref()
            .map_or(false, |worker| worker.running.load(Ordering::SeqCst))
    }

    /// Starts the reader thread. A reader that stopped itself or failed on a
    /// read is joined first, so at most one reader exists at a time.
    pub fn start(&self) -> Result<()> {
        let previous = {
            let mut worker = lock(&self.inner.worker);
            match worker.as_ref() {
                Some(w) if w.running.load(Ordering::SeqCst) => {
                    return Err(AntError::AlreadyRunning)
                }
                Some(w) if w.on_current_thread() => {
                    return Err(AntError::ApiUsage(
                        "cannot restart the dispatcher from its reader thread".into(),
                    ))
                }
                _ => worker.take(),
            }
        };
        if let Some(previous) = previous {
            previous.join()?;
        }
        let mut worker = lock(&self.inner.worker);
        if worker.is_some() {
            return Err(AntError::AlreadyRunning);
        }
        let running = Arc::new(AtomicBool::new(true));
        let dispatcher = self.clone();
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("ant-dispatcher".into())
            .spawn(move || dispatcher.run(flag))
            .map_err(|e| AntError::ApiUsage(format!("cannot spawn dispatcher thread: {}", e)))?;
        *worker = Some(Worker { running, handle });
        debug!("Dispatcher started");
        Ok(())
    }

    /// Stops the reader thread and waits for it to exit. The thread notices
    /// within one poll timeout, and no message is dispatched after that. Called
    /// from the reader thread itself (by a listener) it only requests the stop;
    /// the next `start` or `stop` from another thread joins the reader.
    pub fn stop(&self) -> Result<()> {
        let worker = {
            let mut slot = lock(&self.inner.worker);
            match slot.as_ref() {
                None => return Ok(()),
                Some(w) => {
                    w.running.store(false, Ordering::SeqCst);
                    if w.on_current_thread() {
                        return Ok(());
                    }
                }
            }
            slot.take()
        };
        if let Some(worker) = worker {
            worker.join()?;
            debug!("Dispatcher stopped");
        }
        Ok(())
    }

    /// Stops the reader and closes the transport.
    pub fn close(&self) -> Result<()> {
        self.stop()?;
        self.inner.transport.close()
    }

    /// Encodes and writes a command by message id.
    pub fn send(&self, msg_id: u8, args: &[Value]) -> Result<()> {
        let frame = self.inner.dialect.encode(msg_id, args)?;
        self.write(&frame)
    }

    /// Encodes and writes a command by catalog name.
    pub fn send_named(&self, name: &str, args: &[Value]) -> Result<()> {
        let frame = self.inner.dialect.encode_named(name, args)?;
        self.write(&frame)
    }

    /// Writes an already encoded frame. One write at a time.
    pub fn write(&self, frame: &[u8]) -> Result<()> {
        let _guard = lock(&self.inner.writer);
        trace!("Writing {:02x?}", frame);
        let written = self
            .inner
            .transport
            .write(frame, self.inner.config.write_timeout)?;
        if written != frame.len() {
            return Err(AntError::UsbDeviceError(rusb::Error::Io));
        }
        Ok(())
    }

    /// Offers one message to the listeners, in registration order, until one
    /// handles it. Listeners are snapshotted first so they may add or remove
    /// listeners while being called.
    pub fn dispatch(&self, message: &AntMessage) {
        let listeners: Listeners = lock(&self.inner.listeners).clone();
        for (id, listener) in listeners {
            match listener.on_message(self, message) {
                Dispatch::Ignored => continue,
                Dispatch::Consumed => break,
                Dispatch::Finished => {
                    self.remove_listener(id);
                    break;
                }
            }
        }
    }

    fn run(self, running: Arc<AtomicBool>) {
        let mut frames = ReadBuffer::new();
        let mut buf = vec![0; self.inner.config.read_size];
        while running.load(Ordering::SeqCst) {
            match self
                .inner
                .transport
                .read(&mut buf, self.inner.config.poll_timeout)
            {
                Ok(0) => continue,
                Ok(len) => frames.extend(&buf[..len]),
                Err(e) => {
                    error!("Transport read failed, stopping dispatcher: {}", e);
                    running.store(false, Ordering::SeqCst);
                    break;
                }
            }
            for frame in &mut frames {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let message = frame.and_then(|frame| self.inner.dialect.decode(&frame));
                match message {
                    Ok(message) => {
                        trace!("Dispatching {}", message);
                        self.dispatch(&message);
                    }
                    Err(e) => warn!("Discarding frame: {}", e),
                }
            }
        }
        if frames.pending() > 0 {
            debug!("Reader exiting with {} unread bytes", frames.pending());
        }
    }
}
