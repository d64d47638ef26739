use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{FutureExt, Stream, StreamExt};
use socket2::{Domain, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::TcpListenerStream;
use tracing_futures::Instrument;

use crate::config::Config;
use crate::error::{ControlError, Error, PeerError, RibError};
use crate::event::RibEvent;
use crate::path::{RouteEntry, SessionId};
use crate::peer::peer::{Peer, PeerConfig, SessionInfo};
use crate::rib::{AdjRibIn, LocRib, RibManager, RouteUpdate};

/// Receives best path changes in the order they were decided.
///
/// Called from a dedicated task. A listener that blocks for long fills the
/// queues behind it and sessions that cannot enqueue routes are closed.
pub trait RouteListener: Send + Sync {
    fn update(&self, updates: Vec<RouteUpdate>);
}

#[derive(Debug)]
struct SessionHandle {
    info: Arc<Mutex<SessionInfo>>,
    adj_rib_in: Arc<Mutex<AdjRibIn>>,
    close_signal: Arc<Notify>,
    task: JoinHandle<()>,
}

type Sessions = Arc<Mutex<HashMap<SessionId, SessionHandle>>>;

#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    accept_stop: Arc<Notify>,
    accept_task: JoinHandle<()>,
    rib_tx: Sender<RibEvent>,
    rib_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
}

/// Passive BGP speaker: accepts sessions and merges their routes into one table.
pub struct SessionManager {
    config: Arc<Config>,
    listener: Arc<dyn RouteListener>,
    sessions: Sessions,
    loc_rib: Arc<Mutex<LocRib>>,
    running: Option<Running>,
}

impl SessionManager {
    pub fn new(config: Config, listener: Arc<dyn RouteListener>) -> Self {
        Self {
            config: Arc::new(config),
            listener,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            loc_rib: Arc::new(Mutex::new(LocRib::new())),
            running: None,
        }
    }

    /// Bind `port` on all IPv4 addresses and start accepting peers.
    /// Port 0 binds an ephemeral port; the bound address is returned.
    #[tracing::instrument(skip(self))]
    pub async fn start(&mut self, port: u16) -> Result<SocketAddr, Error> {
        if self.running.is_some() {
            return Err(Error::Control(ControlError::AlreadyRunning));
        }
        self.config.validate()?;
        let listener = create_tcp_listener(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)?;
        let listener = TcpListener::from_std(listener)?;
        let local_addr = listener.local_addr()?;

        let (rib_tx, rib_rx) = channel::<RibEvent>(self.config.rib_channel_size);
        let (listener_tx, listener_rx) =
            channel::<Vec<RouteUpdate>>(self.config.listener_queue_size);

        let dispatch_task = tokio::spawn(
            dispatch(self.listener.clone(), listener_rx).instrument(tracing::info_span!("listener")),
        );
        let rib_task = tokio::spawn(
            RibManager::new(self.loc_rib.clone(), listener_tx)
                .run(rib_rx)
                .instrument(tracing::info_span!("rib")),
        );

        let accept_stop = Arc::new(Notify::new());
        let acceptor = Acceptor {
            config: self.config.clone(),
            sessions: self.sessions.clone(),
            rib_tx: rib_tx.clone(),
            next_id: 1,
        };
        let accept_task = tokio::spawn(
            acceptor
                .run(TcpListenerStream::new(listener), accept_stop.clone())
                .instrument(tracing::info_span!("server", local.addr = %local_addr)),
        );

        tracing::info!(
            local.asn = self.config.asn,
            local.id = %self.config.router_id,
            local.addr = %local_addr,
            "bgp speaker is running"
        );
        self.running = Some(Running {
            local_addr,
            accept_stop,
            accept_task,
            rib_tx,
            rib_task,
            dispatch_task,
        });
        Ok(local_addr)
    }

    /// Stop accepting, close every session with a CEASE and withdraw all best
    /// routes. The listener has seen every withdrawal when this returns.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<(), Error> {
        let running = self
            .running
            .take()
            .ok_or(Error::Control(ControlError::NotRunning))?;

        running.accept_stop.notify_one();
        if let Err(e) = running.accept_task.await {
            tracing::error!(error = %e, "accept loop failed");
        }

        let sessions: Vec<(SessionId, SessionHandle)> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, session) in sessions.iter() {
            session.close_signal.notify_one();
        }
        let deadline = Instant::now() + self.config.shutdown_timeout();
        for (id, session) in sessions.into_iter() {
            let mut task = session.task;
            if timeout_at(deadline, &mut task).await.is_err() {
                tracing::warn!(session = %id, "session did not close in time, abort it");
                task.abort();
            }
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        running
            .rib_tx
            .send(RibEvent::Shutdown(ack_tx))
            .await
            .map_err(|_| Error::Rib(RibError::ManagerStopped))?;
        ack_rx
            .await
            .map_err(|_| Error::Rib(RibError::ManagerStopped))?;
        drop(running.rib_tx);
        if let Err(e) = running.rib_task.await {
            tracing::error!(error = %e, "rib manager failed");
        }
        if let Err(e) = running.dispatch_task.await {
            tracing::error!(error = %e, "listener dispatcher failed");
        }
        tracing::info!(local.addr = %running.local_addr, "bgp speaker is stopped");
        Ok(())
    }

    /// Sessions that have not closed yet, ordered by id.
    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut infos: Vec<SessionInfo> = sessions
            .values()
            .map(|s| s.info.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect();
        infos.sort_by_key(|i| i.id);
        infos
    }

    /// Routes currently held by a session, or None if the session is gone.
    pub fn rib_in(&self, id: SessionId) -> Option<Vec<RouteEntry>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.get(&id).map(|s| {
            s.adj_rib_in
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .routes()
        })
    }

    pub fn best_routes(&self) -> Vec<RouteEntry> {
        self.loc_rib
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .best_routes()
    }

    pub fn my_bgp_id(&self) -> Ipv4Addr {
        self.config.router_id
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.accept_task.abort();
            let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            for session in sessions.values() {
                session.close_signal.notify_one();
            }
        }
    }
}

struct Acceptor {
    config: Arc<Config>,
    sessions: Sessions,
    rib_tx: Sender<RibEvent>,
    next_id: u64,
}

impl Acceptor {
    // delay after a failed accept, e.g. EMFILE
    const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

    async fn run<S>(mut self, mut incoming: S, stop: Arc<Notify>)
    where
        S: Stream<Item = io::Result<TcpStream>> + Unpin,
    {
        loop {
            futures::select_biased! {
                _ = stop.notified().fuse() => {
                    tracing::info!("stop accepting connections");
                    return;
                }
                stream = incoming.next().fuse() => match stream {
                    Some(Ok(stream)) => {
                        if let Err(e) = self.accept(stream) {
                            tracing::warn!(error = %e, "refuse connection");
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "failed to accept connection");
                        tokio::time::sleep(Self::ACCEPT_BACKOFF).await;
                    }
                    None => return,
                },
            }
        }
    }

    fn accept(&mut self, stream: TcpStream) -> Result<(), Error> {
        let remote_addr = stream.peer_addr()?;
        let neighbor_asn = if self.config.neighbors.is_empty() {
            None
        } else {
            match self.config.neighbor(&remote_addr.ip()) {
                Some(neighbor) => Some(neighbor.asn),
                None => {
                    return Err(Error::Peer(PeerError::UnknownNeighbor(remote_addr.ip())))
                }
            }
        };

        let id = SessionId::new(self.next_id);
        self.next_id += 1;
        let info = Arc::new(Mutex::new(SessionInfo::new(
            id,
            remote_addr,
            self.config.asn,
            self.config.router_id,
        )));
        let adj_rib_in = Arc::new(Mutex::new(AdjRibIn::new()));
        let close_signal = Arc::new(Notify::new());
        let mut peer = Peer::new(
            info.clone(),
            PeerConfig {
                asn: self.config.asn,
                router_id: self.config.router_id,
                hold_time: self.config.hold_time,
                neighbor_asn,
                default_local_pref: self.config.default_local_pref,
            },
            adj_rib_in.clone(),
            self.rib_tx.clone(),
            close_signal.clone(),
        );
        tracing::info!(session = %id, peer.addr = %remote_addr, "accept connection");

        // Registering under the lock keeps a fast-closing session from
        // removing itself before it is inserted.
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let registry = self.sessions.clone();
        let task = tokio::spawn(
            async move {
                peer.handle(stream).await;
                registry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
            }
            .instrument(tracing::info_span!("peer", session = %id, peer.addr = %remote_addr)),
        );
        sessions.insert(
            id,
            SessionHandle {
                info,
                adj_rib_in,
                close_signal,
                task,
            },
        );
        Ok(())
    }
}

#[tracing::instrument(skip_all)]
async fn dispatch(listener: Arc<dyn RouteListener>, mut rx: Receiver<Vec<RouteUpdate>>) {
    while let Some(updates) = rx.recv().await {
        tracing::debug!(count = updates.len(), "dispatch route updates");
        listener.update(updates);
    }
}

pub(crate) fn create_tcp_listener(addr: IpAddr, port: u16) -> io::Result<std::net::TcpListener> {
    let sock_addr = SocketAddr::new(addr, port);
    let sock = Socket::new(
        match addr {
            IpAddr::V4(_) => Domain::IPV4,
            IpAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        None,
    )?;

    if sock_addr.is_ipv6() {
        sock.set_only_v6(true)?;
    }

    sock.set_reuse_address(true)?;
    // ephemeral binds must not share a port with another listener
    #[cfg(unix)]
    if port != 0 {
        sock.set_reuse_port(true)?;
    }
    sock.set_nonblocking(true)?;

    let tcp_keepalive = TcpKeepalive::new().with_time(Duration::from_secs(30));
    sock.set_tcp_keepalive(&tcp_keepalive)?;

    sock.bind(&sock_addr.into())?;
    sock.listen(4096)?;
    Ok(sock.into())
}
