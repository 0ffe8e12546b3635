//! A player instance: a library repository, optionally linked to others.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use owntcp::ClientCommunicator;
use owntcp::Config;
use owntcp::Disconnected;
use owntcp::ServerCommunicator;
use owntcp::Subscription;

use crate::library::LibraryRepo;
use crate::library::LibraryService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// No transport; the library is local only.
    Standalone,
    /// Serve the library to clients connecting to `addr`.
    Server { addr: String },
    /// Follow the server at `addr`.
    Client { addr: String },
}

enum Link {
    Standalone,
    Server(ServerCommunicator),
    Client {
        communicator: ClientCommunicator,
        disconnects: mpsc::UnboundedReceiver<Disconnected>,
        _subscription: Subscription,
    },
}

pub struct Player {
    repo: Arc<LibraryRepo>,
    link: Link,
    _changes: Option<Subscription>,
}

impl Player {
    /// Starts a player around `repo`. A client returns once it has synced.
    pub async fn start(mode: Mode, repo: Arc<LibraryRepo>, config: Config) -> owntcp::Result<Self> {
        let service = Arc::new(LibraryService::new(repo.clone()));

        let (link, changes) = match mode {
            Mode::Standalone => (Link::Standalone, None),
            Mode::Server { addr } => {
                let server = ServerCommunicator::bind(&addr, service, config).await?;
                let changes = server.attach(repo.as_ref());
                (Link::Server(server), Some(changes))
            }
            Mode::Client { addr } => {
                let communicator = ClientCommunicator::new(service, config);
                let changes = communicator.attach(repo.as_ref());
                let (subscription, disconnects) = communicator.disconnected_events();
                communicator.open(&addr).await?;
                let link = Link::Client { communicator, disconnects, _subscription: subscription };
                (link, Some(changes))
            }
        };

        tracing::info!(mode = %describe(&link), "player started");
        Ok(Self { repo, link, _changes: changes })
    }

    pub fn repo(&self) -> &Arc<LibraryRepo> {
        &self.repo
    }

    pub fn client(&self) -> Option<&ClientCommunicator> {
        match &self.link {
            Link::Client { communicator, .. } => Some(communicator),
            _ => None,
        }
    }

    pub fn server(&self) -> Option<&ServerCommunicator> {
        match &self.link {
            Link::Server(server) => Some(server),
            _ => None,
        }
    }

    /// The address a server is listening on.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server().map(ServerCommunicator::local_addr)
    }

    /// Resolves when a client loses its server. Never resolves otherwise.
    pub async fn disconnected(&mut self) -> Disconnected {
        match &mut self.link {
            Link::Client { disconnects, .. } => match disconnects.recv().await {
                Some(event) => event,
                None => std::future::pending().await,
            },
            _ => std::future::pending().await,
        }
    }

    /// Closes the link, if any.
    pub async fn stop(self) {
        match &self.link {
            Link::Standalone => {}
            Link::Server(server) => server.shutdown().await,
            Link::Client { communicator, .. } => communicator.close().await,
        }
        tracing::info!("player stopped");
    }
}

fn describe(link: &Link) -> String {
    match link {
        Link::Standalone => "standalone".into(),
        Link::Server(server) => format!("server on {}", server.local_addr()),
        Link::Client { communicator, .. } => match communicator.peer_addr() {
            Some(peer) => format!("client of {}", peer),
            None => "client".into(),
        },
    }
}
