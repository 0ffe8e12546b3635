//! # Server Communicator
//!
//! Accepts clients and keeps them in step with the server's state and with
//! each other.
//!
//! ## Architecture
//!
//! - **accept**: one task; registers each new connection and spawns its send
//!   and receive tasks.
//! - **send** (per connection): drains that connection's coalescing queue.
//! - **receive** (per connection): answers pings inline, queues domain
//!   messages on the shared process queue, answers the sender and fans the
//!   message out to every other connection.
//! - **process**: one task for the whole server, so domain mutations from all
//!   clients are applied in a single global order.
//!
//! ## Invariants
//! - A fault on one connection closes that connection only.
//! - A message is never fanned out to the connection it came from.
//! - Broadcast iterates a snapshot of the connection set.
//! - Shutdown closes every connection before the listener stops.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ownrpc::Answer;
use ownrpc::AnswerCode;
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
use crate::send_queue::MessageIds;
use crate::send_queue::SendQueue;
use crate::service::ChangeSource;
use crate::service::Dispatcher;

pub type ConnectionId = u64;

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected { id: ConnectionId, peer: SocketAddr },
    /// `error` is `None` for an orderly close from either side.
    Disconnected { id: ConnectionId, peer: SocketAddr, error: Option<Error> },
}

enum CloseReason {
    Local,
    Remote,
    Fault(Error),
}

enum Job {
    Apply { conn: Arc<ServerConnection>, message: Message },
    Sync { conn: Arc<ServerConnection> },
}

#[derive(Default)]
struct Tasks {
    send: Option<JoinHandle<()>>,
    receive: Option<JoinHandle<()>>,
}

/// One accepted client.
struct ServerConnection {
    id: ConnectionId,
    peer: SocketAddr,
    queue: SendQueue,
    ids: MessageIds,
    closing: AtomicBool,
    tasks: Mutex<Tasks>,
}

impl ServerConnection {
    fn tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn answer(&self, id: u32, answer: &Answer) -> Result<()> {
        drop(self.queue.enqueue(Message::answer(id, answer)?));
        Ok(())
    }
}

struct Inner {
    config: Config,
    base: Base,
    local_addr: SocketAddr,
    runtime: Handle,
    connections: DashMap<ConnectionId, Arc<ServerConnection>>,
    next_connection: AtomicU64,
    jobs: mpsc::UnboundedSender<Job>,
    events: Subscribers<ConnectionEvent>,
    shutting_down: AtomicBool,
    accept: Mutex<Option<JoinHandle<()>>>,
    process: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn snapshot(&self) -> Vec<Arc<ServerConnection>> {
        self.connections.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Queues `message` on every connection except `exclude`. Returns how many
    /// connections it was queued on.
    fn broadcast(&self, message: &Message, exclude: Option<ConnectionId>) -> usize {
        let mut sent = 0;
        for conn in self.snapshot() {
            if Some(conn.id) == exclude || conn.closing.load(Ordering::Acquire) {
                continue;
            }
            drop(conn.queue.enqueue(message.clone()));
            sent += 1;
        }
        sent
    }
}

/// The listening side of a player network.
pub struct ServerCommunicator {
    inner: Arc<Inner>,
}

impl ServerCommunicator {
    /// Binds `addr` and starts accepting clients.
    pub async fn bind(addr: &str, dispatcher: Arc<dyn Dispatcher>, config: Config) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (jobs, jobs_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            config,
            base: Base::new(dispatcher),
            local_addr,
            runtime: Handle::current(),
            connections: DashMap::new(),
            next_connection: AtomicU64::new(1),
            jobs,
            events: Subscribers::new(),
            shutting_down: AtomicBool::new(false),
            accept: Mutex::new(None),
            process: Mutex::new(None),
        });

        *lock(&inner.process) = Some(tokio::spawn(process_loop(inner.clone(), jobs_rx)));
        *lock(&inner.accept) = Some(tokio::spawn(accept_loop(inner.clone(), listener)));
        tracing::info!(%local_addr, "listening");

        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn subscribe_connections(
        &self,
        callback: impl Fn(&ConnectionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.events.subscribe(callback)
    }

    /// Like [`Self::subscribe_connections`], as a channel.
    pub fn connection_events(&self) -> (Subscription, mpsc::UnboundedReceiver<ConnectionEvent>) {
        self.inner.events.channel()
    }

    /// Notifies every connection except `exclude`. Returns how many were notified.
    pub fn broadcast(&self, topic: &Topic, payload: Option<Bytes>, exclude: Option<ConnectionId>) -> usize {
        self.inner.broadcast(&Message::for_topic(topic, payload, true), exclude)
    }

    /// Notifies every connection.
    pub fn send_to_all(&self, topic: &Topic, payload: Option<Bytes>) -> usize {
        self.broadcast(topic, payload, None)
    }

    /// Broadcasts local changes from `source` to every client, except echoes of
    /// the message being applied (those were fanned out on receipt).
    pub fn attach(&self, source: &dyn ChangeSource) -> Subscription {
        let weak = Arc::downgrade(&self.inner);
        self.inner.base.hook(source, move |change| {
            let Some(inner) = weak.upgrade() else { return };
            let message = Message::for_topic(&change.topic, change.payload.clone(), true);
            let sent = inner.broadcast(&message, None);
            tracing::trace!(topic = %change.topic, sent, "broadcast local change");
        })
    }

    /// Closes one connection with a close notice and waits for its teardown.
    /// Returns false if no such connection is open.
    pub async fn close_connection(&self, id: ConnectionId) -> bool {
        let Some(conn) = self.inner.connections.get(&id).map(|entry| entry.value().clone()) else {
            return false;
        };
        if let Some(close) = begin_close(&self.inner, &conn, CloseReason::Local) {
            let _ = close.await;
        }
        true
    }

    /// Closes every connection, then stops listening and processing.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(local_addr = %inner.local_addr, connections = inner.connections.len(), "shutting down");

        let closes: Vec<JoinHandle<()>> = inner
            .snapshot()
            .iter()
            .filter_map(|conn| begin_close(inner, conn, CloseReason::Local))
            .collect();
        for close in closes {
            let _ = close.await;
        }

        for task in [lock(&inner.accept).take(), lock(&inner.process).take()].into_iter().flatten() {
            task.abort();
        }
        tracing::info!(local_addr = %inner.local_addr, "stopped");
    }
}

impl Drop for ServerCommunicator {
    fn drop(&mut self) {
        let inner = &self.inner;
        inner.shutting_down.store(true, Ordering::Release);
        for task in [lock(&inner.accept).take(), lock(&inner.process).take()].into_iter().flatten() {
            task.abort();
        }
        for conn in inner.snapshot() {
            begin_close(inner, &conn, CloseReason::Local);
        }
    }
}

fn lock<T>(slot: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if inner.shutting_down.load(Ordering::Acquire) {
                    tracing::debug!(%peer, "refusing connection during shutdown");
                    continue;
                }
                if let Err(e) = start(&inner, stream) {
                    tracing::warn!(%peer, error = %e, "could not set up connection");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

fn start(inner: &Arc<Inner>, stream: TcpStream) -> Result<()> {
    let connection = Connection::from_stream(stream, &inner.config)?;
    let peer = connection.peer_addr();
    let (reader, writer) = connection.into_split();

    let conn = Arc::new(ServerConnection {
        id: inner.next_connection.fetch_add(1, Ordering::Relaxed),
        peer,
        queue: SendQueue::new(),
        ids: MessageIds::new(),
        closing: AtomicBool::new(false),
        tasks: Mutex::new(Tasks::default()),
    });
    inner.connections.insert(conn.id, conn.clone());

    {
        let mut tasks = conn.tasks();
        tasks.send = Some(tokio::spawn(send_loop(inner.clone(), conn.clone(), writer)));
        tasks.receive = Some(tokio::spawn(receive_loop(inner.clone(), conn.clone(), reader)));
    }

    tracing::info!(id = conn.id, %peer, "client connected");
    inner.events.emit(&ConnectionEvent::Connected { id: conn.id, peer });
    Ok(())
}

async fn send_loop(inner: Arc<Inner>, conn: Arc<ServerConnection>, mut writer: FrameWriter<OwnedWriteHalf>) {
    let result = conn.queue.pump(&mut writer, &conn.ids, None).await;
    writer.shutdown().await;
    if let Err(e) = result {
        begin_close(&inner, &conn, CloseReason::Fault(e));
    }
}

async fn receive_loop(inner: Arc<Inner>, conn: Arc<ServerConnection>, mut reader: FrameReader<OwnedReadHalf>) {
    let reason = loop {
        let message = match reader.read_message().await {
            Ok(Some(message)) => message,
            Ok(None) => break CloseReason::Fault(Error::ConnectionLost),
            Err(e) => break CloseReason::Fault(e),
        };
        tracing::trace!(id = conn.id, msg = message.id, topic = %message.topic, "received");

        match receive(&inner, &conn, message) {
            Ok(true) => {}
            Ok(false) => break CloseReason::Remote,
            Err(e) => break CloseReason::Fault(e),
        }
    };
    begin_close(&inner, &conn, reason);
}

/// Handles one frame. Returns false once the client has said goodbye.
fn receive(inner: &Inner, conn: &Arc<ServerConnection>, message: Message) -> Result<bool> {
    match message.reserved() {
        Some(Reserved::Close) => return Ok(false),
        Some(Reserved::Ping) => {
            if !message.fire_and_forget {
                conn.answer(message.id, &Answer::ok())?;
            }
        }
        Some(Reserved::Sync) => {
            inner.jobs.send(Job::Sync { conn: conn.clone() }).map_err(|_| Error::Closed)?;
        }
        Some(Reserved::Answer) => {
            tracing::debug!(id = conn.id, msg = message.id, "ignoring unsolicited answer");
        }
        None => {
            let accepted = message.structured_topic().is_ok_and(|topic| inner.base.dispatcher().accepts(&topic));
            if !accepted {
                tracing::debug!(id = conn.id, topic = %message.topic, "unsupported topic");
                if !message.fire_and_forget {
                    conn.answer(message.id, &Answer::failed(AnswerCode::Unsupported))?;
                }
                return Ok(true);
            }

            let fanout = Message::notify(message.topic.clone(), message.payload.clone());
            let (id, fire_and_forget) = (message.id, message.fire_and_forget);
            inner.jobs.send(Job::Apply { conn: conn.clone(), message }).map_err(|_| Error::Closed)?;
            if !fire_and_forget {
                conn.answer(id, &Answer::ok())?;
            }
            inner.broadcast(&fanout, Some(conn.id));
        }
    }
    Ok(true)
}

async fn process_loop(inner: Arc<Inner>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Apply { conn, message } => {
                if let Err(e) = inner.base.process(&message).await {
                    tracing::error!(id = conn.id, topic = %message.topic, error = %e, "processing failed");
                    begin_close(&inner, &conn, CloseReason::Fault(e));
                }
            }
            Job::Sync { conn } => match inner.base.dispatcher().snapshot().await {
                Ok(snapshot) => {
                    tracing::debug!(id = conn.id, bytes = snapshot.len(), "sending snapshot");
                    drop(conn.queue.enqueue(Message::sync(Some(snapshot))));
                }
                Err(e) => {
                    let e = Error::Handler { topic: Reserved::SYNC.into(), message: format!("{:#}", e) };
                    tracing::error!(id = conn.id, error = %e, "snapshot failed");
                    begin_close(&inner, &conn, CloseReason::Fault(e));
                }
            },
        }
    }
}

/// Starts closing `conn` unless it is already closing.
fn begin_close(inner: &Arc<Inner>, conn: &Arc<ServerConnection>, reason: CloseReason) -> Option<JoinHandle<()>> {
    if conn.closing.swap(true, Ordering::AcqRel) {
        return None;
    }
    Some(inner.runtime.spawn(close(inner.clone(), conn.clone(), reason)))
}

async fn close(inner: Arc<Inner>, conn: Arc<ServerConnection>, reason: CloseReason) {
    inner.connections.remove(&conn.id);

    if !matches!(reason, CloseReason::Remote) {
        drop(conn.queue.enqueue(Message::close()));
    }
    conn.queue.end();

    let send = conn.tasks().send.take();
    if let Some(mut send) = send {
        if tokio::time::timeout(inner.config.close_timeout, &mut send).await.is_err() {
            tracing::debug!(id = conn.id, "close notice not flushed in time");
            send.abort();
        }
    }
    let receive = conn.tasks().receive.take();
    if let Some(receive) = receive {
        receive.abort();
    }
    conn.queue.fail_remaining(Error::Closed);

    let error = match reason {
        CloseReason::Fault(Error::ConnectionLost) => {
            tracing::info!(id = conn.id, peer = %conn.peer, "client went away");
            Some(Error::ConnectionLost)
        }
        CloseReason::Fault(e) => {
            tracing::warn!(id = conn.id, peer = %conn.peer, error = %e, "connection closed after fault");
            Some(e)
        }
        CloseReason::Local | CloseReason::Remote => {
            tracing::info!(id = conn.id, peer = %conn.peer, "client disconnected");
            None
        }
    };
    inner.events.emit(&ConnectionEvent::Disconnected { id: conn.id, peer: conn.peer, error });
}
