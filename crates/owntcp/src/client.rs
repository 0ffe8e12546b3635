//! # Client Communicator
//!
//! One session with a server: connect, pull the snapshot, then keep local
//! state in step with everybody else.
//!
//! ## Architecture
//!
//! `open` connects and spawns four tasks sharing one [`Session`]:
//!
//! - **send**: drains the coalescing queue onto the socket.
//! - **receive**: routes answers to waiting requests and domain messages to
//!   the process task. Applies the snapshot.
//! - **process**: applies domain messages one at a time under the topic lock.
//! - **ping**: keep-alive; a missed answer is a fault.
//!
//! Any of them can end the session, but only the first request to close wins
//! and runs the close path in its own task. The close path never runs on a
//! task it aborts.
//!
//! ## States
//!
//! `Closed → Opening → Syncing → Synced → Closing → Closed`. Local changes are
//! only forwarded while `Synced`. Domain messages received before the snapshot
//! has been applied are held back and applied after it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use ownrpc::Answer;
use ownrpc::Message;
use ownrpc::Reserved;
use ownrpc::Topic;

use crate::base::Base;
use crate::config::Config;
use crate::connection::Connection;
use crate::connection::FrameReader;
use crate::connection::FrameWriter;
use crate::error::Error;
use crate::error::Result;
use crate::events::Subscribers;
use crate::events::Subscription;
use crate::pending::PendingAnswers;
use crate::send_queue::MessageIds;
use crate::send_queue::SendQueue;
use crate::service::ChangeSource;
use crate::service::Dispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    Opening,
    Syncing,
    Synced,
    Closing,
}

/// Raised once per session, after it has been torn down.
#[derive(Debug, Clone)]
pub struct Disconnected {
    /// False if the session ended because of a fault.
    pub expected: bool,
    /// The fault, if any.
    pub error: Option<Error>,
}

enum CloseReason {
    Local,
    Remote,
    Fault(Error),
}

impl CloseReason {
    fn into_error(self) -> Option<Error> {
        match self {
            Self::Fault(e) => Some(e),
            Self::Local | Self::Remote => None,
        }
    }
}

enum Flow {
    Continue,
    RemoteClosed,
}

#[derive(Default)]
struct Tasks {
    send: Option<JoinHandle<()>>,
    others: Vec<JoinHandle<()>>,
}

/// Everything owned by one TCP session. Dropped with it.
struct Session {
    peer: SocketAddr,
    runtime: Handle,
    queue: SendQueue,
    pending: PendingAnswers,
    ids: MessageIds,
    ping_cancel: Semaphore,
    closing: AtomicBool,
    synced: Mutex<Option<oneshot::Sender<Result<()>>>>,
    tasks: Mutex<Tasks>,
}

impl Session {
    fn new(peer: SocketAddr, runtime: Handle, synced: oneshot::Sender<Result<()>>) -> Self {
        Self {
            peer,
            runtime,
            queue: SendQueue::new(),
            pending: PendingAnswers::new(),
            ids: MessageIds::new(),
            ping_cancel: Semaphore::new(0),
            closing: AtomicBool::new(false),
            synced: Mutex::new(Some(synced)),
            tasks: Mutex::new(Tasks::default()),
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wakes `open`. Only the first call has an effect.
    fn signal_synced(&self, outcome: Result<()>) {
        let tx = self.synced.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(tx) = tx {
            let _ = tx.send(outcome);
        }
    }

    fn answer_ok(&self, id: u32) -> Result<()> {
        drop(self.queue.enqueue(Message::answer(id, &Answer::ok())?));
        Ok(())
    }
}

struct Inner {
    config: Config,
    base: Base,
    state: watch::Sender<State>,
    session: Mutex<Option<Arc<Session>>>,
    disconnected: Subscribers<Disconnected>,
}

impl Inner {
    fn session(&self) -> std::sync::MutexGuard<'_, Option<Arc<Session>>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.session().clone()
    }

    fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Moves `from → to`. False if the state was not `from`.
    fn transition(&self, from: State, to: State) -> bool {
        self.state.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            *state = to;
            true
        })
    }

    async fn wait_closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == State::Closed).await;
    }
}

/// A client connection to a [`crate::server::ServerCommunicator`].
pub struct ClientCommunicator {
    inner: Arc<Inner>,
}

impl ClientCommunicator {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, config: Config) -> Self {
        let (state, _) = watch::channel(State::Closed);
        Self {
            inner: Arc::new(Inner {
                config,
                base: Base::new(dispatcher),
                state,
                session: Mutex::new(None),
                disconnected: Subscribers::new(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    /// Receives every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<State> {
        self.inner.state.subscribe()
    }

    pub fn subscribe_disconnected(
        &self,
        callback: impl Fn(&Disconnected) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.disconnected.subscribe(callback)
    }

    /// Like [`Self::subscribe_disconnected`], as a channel.
    pub fn disconnected_events(&self) -> (Subscription, mpsc::UnboundedReceiver<Disconnected>) {
        self.inner.disconnected.channel()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.current().map(|session| session.peer)
    }

    /// Connects to `addr` and waits for the server's snapshot to be applied.
    ///
    /// On failure the communicator is back in `Closed` and may be opened again.
    pub async fn open(&self, addr: &str) -> Result<()> {
        let inner = &self.inner;
        if !inner.transition(State::Closed, State::Opening) {
            return Err(Error::InvalidState(format!("cannot open while {:?}", inner.state())));
        }

        let connection = match Connection::connect(addr, &inner.config).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(addr, error = %e, "connect failed");
                inner.state.send_replace(State::Closed);
                return Err(e);
            }
        };

        let peer = connection.peer_addr();
        let (reader, writer) = connection.into_split();
        let (synced_tx, synced_rx) = oneshot::channel();
        let session = Arc::new(Session::new(peer, Handle::current(), synced_tx));
        *inner.session() = Some(session.clone());
        inner.state.send_replace(State::Syncing);
        tracing::info!(%peer, "connected, requesting snapshot");

        start(inner, &session, reader, writer);
        drop(session.queue.enqueue(Message::sync(None)));

        let outcome = match tokio::time::timeout(inner.config.sync_timeout, synced_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                tracing::warn!(%peer, "no snapshot before the sync deadline");
                Err(Error::Timeout)
            }
        };

        if let Err(e) = outcome {
            match begin_close(inner, &session, CloseReason::Fault(e.clone())) {
                Some(close) => {
                    let _ = close.await;
                }
                None => inner.wait_closed().await,
            }
            return Err(e);
        }
        Ok(())
    }

    /// Sends a request and waits for its answer.
    ///
    /// A negative answer is [`Error::Remote`].
    pub async fn send(&self, topic: &Topic, payload: Option<Bytes>) -> Result<Answer> {
        let session = self.open_session()?;
        let outcome = session.queue.enqueue(Message::for_topic(topic, payload, false)).wait().await?;
        Ok(outcome.unwrap_or_else(Answer::ok))
    }

    /// Sends a notification. Resolves once it has been written.
    pub async fn send_fire_and_forget(&self, topic: &Topic, payload: Option<Bytes>) -> Result<()> {
        let session = self.open_session()?;
        session.queue.enqueue(Message::for_topic(topic, payload, true)).wait().await?;
        Ok(())
    }

    /// [`Self::send`] with a deadline. Running out of time is [`Error::Timeout`],
    /// distinct from a negative answer.
    pub async fn send_command(&self, topic: &Topic, payload: Option<Bytes>, timeout: Duration) -> Result<Answer> {
        tokio::time::timeout(timeout, self.send(topic, payload)).await?
    }

    /// Forwards local changes from `source` to the server while synced.
    ///
    /// Forwarded changes are requests; a failed one is logged.
    pub fn attach(&self, source: &dyn ChangeSource) -> Subscription {
        let weak = Arc::downgrade(&self.inner);
        self.inner.base.hook(source, move |change| {
            let Some(inner) = weak.upgrade() else { return };
            if inner.state() != State::Synced {
                tracing::trace!(topic = %change.topic, "not synced, change stays local");
                return;
            }
            let Some(session) = inner.current() else { return };

            let waiter = session.queue.enqueue(Message::for_topic(&change.topic, change.payload.clone(), false));
            let topic = change.topic.to_wire();
            session.runtime.spawn(async move {
                if let Err(e) = waiter.wait().await {
                    tracing::warn!(topic, error = %e, "forwarded change failed");
                }
            });
        })
    }

    /// Closes the session with a close notice and waits for teardown.
    /// Does nothing if already closed.
    pub async fn close(&self) {
        let Some(session) = self.inner.current() else { return };
        match begin_close(&self.inner, &session, CloseReason::Local) {
            Some(close) => {
                let _ = close.await;
            }
            None => self.inner.wait_closed().await,
        }
    }

    fn open_session(&self) -> Result<Arc<Session>> {
        match self.inner.state() {
            State::Syncing | State::Synced => self.inner.current().ok_or(Error::Closed),
            _ => Err(Error::Closed),
        }
    }
}

impl Drop for ClientCommunicator {
    fn drop(&mut self) {
        if let Some(session) = self.inner.current() {
            begin_close(&self.inner, &session, CloseReason::Local);
        }
    }
}

fn start(inner: &Arc<Inner>, session: &Arc<Session>, reader: FrameReader<OwnedReadHalf>, writer: FrameWriter<OwnedWriteHalf>) {
    let (process_tx, process_rx) = mpsc::unbounded_channel();
    // Every handle is stored before any loop can reach the close path.
    let mut tasks = session.tasks();
    tasks.send = Some(session.runtime.spawn(send_loop(inner.clone(), session.clone(), writer)));
    tasks.others = vec![
        session.runtime.spawn(receive_loop(inner.clone(), session.clone(), reader, process_tx)),
        session.runtime.spawn(process_loop(inner.clone(), session.clone(), process_rx)),
        session.runtime.spawn(ping_loop(inner.clone(), session.clone())),
    ];
}

async fn send_loop(inner: Arc<Inner>, session: Arc<Session>, mut writer: FrameWriter<OwnedWriteHalf>) {
    let result = session.queue.pump(&mut writer, &session.ids, Some(&session.pending)).await;
    writer.shutdown().await;
    match result {
        Ok(()) => tracing::debug!(peer = %session.peer, "send loop finished"),
        Err(e) => {
            tracing::warn!(peer = %session.peer, error = %e, "send loop failed");
            begin_close(&inner, &session, CloseReason::Fault(e));
        }
    }
}

async fn receive_loop(
    inner: Arc<Inner>,
    session: Arc<Session>,
    mut reader: FrameReader<OwnedReadHalf>,
    process: mpsc::UnboundedSender<Message>,
) {
    let mut held = Vec::new();
    let reason = loop {
        let message = match reader.read_message().await {
            Ok(Some(message)) => message,
            Ok(None) => break CloseReason::Fault(Error::ConnectionLost),
            Err(e) => break CloseReason::Fault(e),
        };
        tracing::trace!(peer = %session.peer, id = message.id, topic = %message.topic, "received");

        match receive(&inner, &session, message, &process, &mut held).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::RemoteClosed) => break CloseReason::Remote,
            Err(e) => break CloseReason::Fault(e),
        }
    };
    begin_close(&inner, &session, reason);
}

async fn receive(
    inner: &Inner,
    session: &Session,
    message: Message,
    process: &mpsc::UnboundedSender<Message>,
    held: &mut Vec<Message>,
) -> Result<Flow> {
    match message.reserved() {
        Some(Reserved::Answer) => {
            let answer = Answer::from_payload(message.payload_bytes())?;
            if !session.pending.resolve(message.id, answer) {
                tracing::debug!(id = message.id, "answer for nothing pending");
            }
        }
        Some(Reserved::Close) => return Ok(Flow::RemoteClosed),
        Some(Reserved::Ping) => {
            if !message.fire_and_forget {
                session.answer_ok(message.id)?;
            }
        }
        Some(Reserved::Sync) => apply_snapshot(inner, session, &message, process, held).await?,
        None => {
            if !message.fire_and_forget {
                session.answer_ok(message.id)?;
            }
            if inner.state() == State::Synced {
                process.send(message).map_err(|_| Error::Closed)?;
            } else {
                held.push(message);
            }
        }
    }
    Ok(Flow::Continue)
}

async fn apply_snapshot(
    inner: &Inner,
    session: &Session,
    message: &Message,
    process: &mpsc::UnboundedSender<Message>,
    held: &mut Vec<Message>,
) -> Result<()> {
    if inner.state() != State::Syncing {
        tracing::warn!(peer = %session.peer, "ignoring unexpected snapshot");
        return Ok(());
    }

    let snapshot = message.payload_bytes().unwrap_or_default();
    inner
        .base
        .dispatcher()
        .apply_snapshot(snapshot)
        .await
        .map_err(|e| Error::Handler { topic: Reserved::SYNC.into(), message: format!("{:#}", e) })?;

    if !inner.transition(State::Syncing, State::Synced) {
        return Ok(());
    }
    for message in held.drain(..) {
        process.send(message).map_err(|_| Error::Closed)?;
    }
    tracing::info!(peer = %session.peer, bytes = snapshot.len(), "synced");
    session.signal_synced(Ok(()));
    Ok(())
}

async fn process_loop(inner: Arc<Inner>, session: Arc<Session>, mut messages: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = messages.recv().await {
        if let Err(e) = inner.base.process(&message).await {
            tracing::error!(peer = %session.peer, topic = %message.topic, error = %e, "processing failed");
            begin_close(&inner, &session, CloseReason::Fault(e));
            return;
        }
    }
}

async fn ping_loop(inner: Arc<Inner>, session: Arc<Session>) {
    loop {
        // A permit (or a closed semaphore) means the session is closing.
        if tokio::time::timeout(inner.config.ping_interval, session.ping_cancel.acquire()).await.is_ok() {
            return;
        }

        let answer = session.queue.enqueue(Message::ping());
        match tokio::time::timeout(inner.config.ping_timeout, answer.wait()).await {
            Ok(Ok(_)) => tracing::trace!(peer = %session.peer, "pong"),
            Ok(Err(e)) => {
                begin_close(&inner, &session, CloseReason::Fault(e));
                return;
            }
            Err(_) => {
                tracing::warn!(peer = %session.peer, "keep-alive timed out");
                begin_close(&inner, &session, CloseReason::Fault(Error::Timeout));
                return;
            }
        }
    }
}

/// Starts the close path unless it is already running.
fn begin_close(inner: &Arc<Inner>, session: &Arc<Session>, reason: CloseReason) -> Option<JoinHandle<()>> {
    if session.closing.swap(true, Ordering::AcqRel) {
        return None;
    }
    match &reason {
        CloseReason::Local => tracing::debug!(peer = %session.peer, "closing"),
        CloseReason::Remote => tracing::info!(peer = %session.peer, "server closed the session"),
        CloseReason::Fault(e) => tracing::warn!(peer = %session.peer, error = %e, "closing after fault"),
    }
    Some(session.runtime.spawn(close(inner.clone(), session.clone(), reason)))
}

async fn close(inner: Arc<Inner>, session: Arc<Session>, reason: CloseReason) {
    inner.state.send_replace(State::Closing);

    if !matches!(reason, CloseReason::Remote) {
        drop(session.queue.enqueue(Message::close()));
    }
    session.queue.end();
    session.ping_cancel.add_permits(1);

    let send = session.tasks().send.take();
    if let Some(mut send) = send {
        if tokio::time::timeout(inner.config.close_timeout, &mut send).await.is_err() {
            tracing::debug!(peer = %session.peer, "close notice not flushed in time");
            send.abort();
        }
    }
    let others = std::mem::take(&mut session.tasks().others);
    for task in others {
        task.abort();
    }

    session.queue.fail_remaining(Error::Closed);
    session.pending.fail_all(Error::Closed);

    let error = reason.into_error();
    session.signal_synced(Err(error.clone().unwrap_or(Error::Closed)));

    {
        let mut current = inner.session();
        if current.as_ref().is_some_and(|s| Arc::ptr_eq(s, &session)) {
            *current = None;
        }
    }
    inner.state.send_replace(State::Closed);
    tracing::info!(peer = %session.peer, expected = error.is_none(), "disconnected");
    inner.disconnected.emit(&Disconnected { expected: error.is_none(), error });
}
