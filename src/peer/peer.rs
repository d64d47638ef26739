use std::collections::{HashSet, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{FutureExt, SinkExt, StreamExt};
use ipnet::Ipv4Net;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::sync::Notify;
use tokio::time::{sleep, Instant, Sleep};
use tokio_util::codec::Framed;

use crate::error::{Error, OpenMessageError, PeerError};
use crate::event::{
    AdministrativeEvent, BgpMessageEvent, Event, RibEvent, TcpConnectionEvent, TimerEvent,
};
use crate::packet::attribute::Attribute;
use crate::packet::capability::Cap;
use crate::packet::codec::Codec;
use crate::packet::message::{
    Message, MessageBuilder, MessageType, NotificationCode, NotificationSubCode,
};
use crate::packet::prefix::Prefix;
use crate::path::{RouteEntry, RouteEntryBuilder, SessionId};
use crate::rib::AdjRibIn;

use super::fsm::{FiniteStateMachine, State};

/// Snapshot of a session as reported by the session manager.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub remote_addr: SocketAddr,
    pub local_asn: u32,
    pub local_id: Ipv4Addr,
    pub peer_asn: u32,
    pub peer_id: Ipv4Addr,
    /// Negotiated hold time in seconds. Zero until the peer's OPEN is accepted.
    pub hold_time: u16,
    pub keepalive_time: u16,
    pub state: State,
    pub sent: MessageCounter,
    pub received: MessageCounter,
}

impl SessionInfo {
    pub(crate) fn new(
        id: SessionId,
        remote_addr: SocketAddr,
        local_asn: u32,
        local_id: Ipv4Addr,
    ) -> Self {
        Self {
            id,
            remote_addr,
            local_asn,
            local_id,
            peer_asn: 0,
            peer_id: Ipv4Addr::UNSPECIFIED,
            hold_time: 0,
            keepalive_time: 0,
            state: State::Idle,
            sent: MessageCounter::default(),
            received: MessageCounter::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounter {
    pub open: usize,
    pub update: usize,
    pub keepalive: usize,
    pub notification: usize,
}

impl MessageCounter {
    fn count(&mut self, msg_type: MessageType) {
        match msg_type {
            MessageType::Open => self.open += 1,
            MessageType::Update => self.update += 1,
            MessageType::Keepalive => self.keepalive += 1,
            MessageType::Notification => self.notification += 1,
        }
    }
}

/// Local parameters a session negotiates with.
#[derive(Debug, Clone)]
pub(crate) struct PeerConfig {
    pub asn: u32,
    pub router_id: Ipv4Addr,
    pub hold_time: u16,
    /// AS the remote is configured with, if it is a known neighbor.
    pub neighbor_asn: Option<u32>,
    pub default_local_pref: u32,
}

/// One BGP session over an accepted connection.
#[derive(Debug)]
pub(crate) struct Peer {
    id: SessionId,
    info: Arc<Mutex<SessionInfo>>,
    config: PeerConfig,
    fsm: FiniteStateMachine,
    hold_timer: Timer,
    keepalive_timer: Timer,
    adj_rib_in: Arc<Mutex<AdjRibIn>>,
    rib_tx: Sender<RibEvent>,
    close_signal: Arc<Notify>,
    outgoing: VecDeque<Message>,
    released: bool,
}

impl Peer {
    // https://www.rfc-editor.org/rfc/rfc4271#section-8
    pub const LARGE_HOLD_TIME: u64 = 240;
    pub const MIN_HOLD_TIME: u16 = 3;

    pub fn new(
        info: Arc<Mutex<SessionInfo>>,
        config: PeerConfig,
        adj_rib_in: Arc<Mutex<AdjRibIn>>,
        rib_tx: Sender<RibEvent>,
        close_signal: Arc<Notify>,
    ) -> Self {
        let id = info.lock().unwrap_or_else(PoisonError::into_inner).id;
        Self {
            id,
            info,
            config,
            fsm: FiniteStateMachine::new(),
            hold_timer: Timer::new(),
            keepalive_timer: Timer::new(),
            adj_rib_in,
            rib_tx,
            close_signal,
            outgoing: VecDeque::new(),
            released: false,
        }
    }

    fn info(&self) -> MutexGuard<'_, SessionInfo> {
        self.info.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> State {
        self.fsm.get_state()
    }

    fn move_state(&mut self, event: Event) {
        let old = self.fsm.get_state();
        self.fsm.mv(event);
        let state = self.fsm.get_state();
        if old != state {
            tracing::info!(from = %old, to = %state, event = ?event, "move state");
        }
        self.info().state = state;
    }

    /// Drive the session until it returns to Idle. Routes learned over the
    /// connection are retracted before this returns.
    #[tracing::instrument(skip_all, fields(session = %self.id))]
    pub async fn handle<T>(&mut self, stream: T)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut framed = Framed::new(stream, Codec::new());

        if let Err(e) = self.tcp_connection_confirmed() {
            self.terminate(e);
        }

        loop {
            if let Err(e) = self.flush(&mut framed).await {
                tracing::warn!(error = %e, "failed to send message");
                self.outgoing.clear();
                self.move_state(Event::Connection(TcpConnectionEvent::TcpConnectionFail));
            }
            if self.state() == State::Idle {
                break;
            }

            let res = futures::select_biased! {
                _ = self.close_signal.notified().fuse() => {
                    self.manual_stop()
                }
                _ = self.hold_timer.expired().fuse() => {
                    tracing::warn!(state = %self.state(), event = ?TimerEvent::HoldTimerExpire);
                    Err(Error::HoldTimerExpired)
                }
                _ = self.keepalive_timer.expired().fuse() => {
                    self.keepalive_timer_expire()
                }
                item = framed.next().fuse() => match item {
                    Some(Ok(msg)) => self.handle_message(msg),
                    Some(Err(e)) => Err(e),
                    None => Err(Error::Peer(PeerError::ConnectionClosed)),
                },
            };
            if let Err(e) = res {
                self.terminate(e);
            }
        }

        let _ = framed.close().await;
        if let Err(e) = self.release().await {
            tracing::error!(error = %e, "failed to release session");
        }
    }

    #[tracing::instrument(skip_all)]
    async fn flush<T>(&mut self, framed: &mut Framed<T, Codec>) -> Result<(), Error>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if self.outgoing.is_empty() {
            return Ok(());
        }
        while let Some(msg) = self.outgoing.pop_front() {
            self.info().sent.count(msg.msg_type());
            tracing::debug!(msg_type = ?msg.msg_type(), "send message");
            framed.feed(msg).await?;
        }
        framed.flush().await
    }

    fn send(&mut self, msg: Message) {
        self.outgoing.push_back(msg);
    }

    fn handle_message(&mut self, msg: Message) -> Result<(), Error> {
        let msg_type = msg.msg_type();
        tracing::debug!(state = %self.state(), ?msg_type, "receive message");
        self.info().received.count(msg_type);
        self.hold_timer.restart();
        match msg {
            Message::Open {
                as_num,
                hold_time,
                identifier,
                capabilities,
                ..
            } => self.bgp_open(as_num, hold_time, identifier, capabilities),
            Message::Keepalive => self.keepalive_msg(),
            Message::Update {
                withdrawn_routes,
                attributes,
                nlri,
            } => self.update_msg(withdrawn_routes, attributes, nlri),
            Message::Notification {
                code,
                subcode,
                data,
            } => self.notification_msg(code, subcode, data),
        }
    }

    /// Report `err` to the peer if it is a protocol error and move to Idle.
    #[tracing::instrument(skip(self))]
    fn terminate(&mut self, err: Error) {
        let event = match &err {
            Error::MessageHeader(_) => Event::Message(BgpMessageEvent::BgpHeaderError),
            Error::OpenMessage(_) => Event::Message(BgpMessageEvent::BgpOpenMsgErr),
            Error::UpdateMessage(_) => Event::Message(BgpMessageEvent::UpdateMsgErr),
            Error::HoldTimerExpired => Event::Timer(TimerEvent::HoldTimerExpire),
            Error::Peer(PeerError::NotificationReceived { .. }) => {
                Event::Message(BgpMessageEvent::NotifMsg)
            }
            _ => Event::Connection(TcpConnectionEvent::TcpConnectionFail),
        };
        match Message::notification_from(&err) {
            Some(msg) => {
                tracing::error!(state = %self.state(), error = %err, "send notification");
                self.send(msg);
            }
            None => tracing::warn!(state = %self.state(), error = %err, "close session"),
        }
        self.hold_timer.stop();
        self.keepalive_timer.stop();
        self.move_state(event);
    }

    // Event 17
    fn tcp_connection_confirmed(&mut self) -> Result<(), Error> {
        let msg = self.build_open_msg()?;
        self.send(msg);
        self.send(Message::Keepalive);
        self.hold_timer.start(Self::LARGE_HOLD_TIME);
        self.move_state(Event::Connection(TcpConnectionEvent::TcpConnectionConfirmed));
        Ok(())
    }

    // Event 2
    fn manual_stop(&mut self) -> Result<(), Error> {
        let mut builder = MessageBuilder::builder(MessageType::Notification);
        let msg = builder
            .code(NotificationCode::Cease)?
            .subcode(Some(NotificationSubCode::AdministrativeShutdown))?
            .build()?;
        tracing::info!(state = %self.state(), "administrative shutdown");
        self.send(msg);
        self.hold_timer.stop();
        self.keepalive_timer.stop();
        self.move_state(Event::Admin(AdministrativeEvent::ManualStop));
        Ok(())
    }

    // Event 11
    fn keepalive_timer_expire(&mut self) -> Result<(), Error> {
        self.send(Message::Keepalive);
        self.keepalive_timer.restart();
        self.move_state(Event::Timer(TimerEvent::KeepaliveTimerExpire));
        Ok(())
    }

    // Event 19
    #[tracing::instrument(skip(self, capabilities))]
    fn bgp_open(
        &mut self,
        as_num: u32,
        hold_time: u16,
        identifier: Ipv4Addr,
        capabilities: Vec<Cap>,
    ) -> Result<(), Error> {
        if self.state() != State::OpenSent {
            self.move_state(Event::Message(BgpMessageEvent::BgpOpen));
            return Err(Error::FiniteStateMachine);
        }
        if hold_time != 0 && hold_time < Self::MIN_HOLD_TIME {
            return Err(Error::OpenMessage(OpenMessageError::UnacceptableHoldTime {
                hold_time,
            }));
        }
        let peer_asn = capabilities
            .iter()
            .find_map(|cap| match cap {
                Cap::FourOctetASNumber(asn) => Some(*asn),
                _ => None,
            })
            .unwrap_or(as_num);
        if let Some(expected) = self.config.neighbor_asn {
            if expected != peer_asn {
                return Err(Error::OpenMessage(OpenMessageError::BadPeerAS {
                    asn: peer_asn,
                }));
            }
        }
        if identifier.is_unspecified() || identifier == self.config.router_id {
            return Err(Error::OpenMessage(OpenMessageError::BadBgpIdentifier));
        }

        let negotiated_hold_time = self.negotiate_hold_time(hold_time);
        {
            let mut info = self.info();
            info.peer_asn = peer_asn;
            info.peer_id = identifier;
            info.hold_time = negotiated_hold_time;
            info.keepalive_time = Self::keepalive_time(negotiated_hold_time);
        }
        tracing::info!(
            peer.asn = peer_asn,
            peer.id = %identifier,
            hold_time = negotiated_hold_time,
            "accept open message"
        );
        self.move_state(Event::Message(BgpMessageEvent::BgpOpen));
        Ok(())
    }

    // Event 26
    fn keepalive_msg(&mut self) -> Result<(), Error> {
        match self.state() {
            State::OpenConfirm => {
                let keepalive_time = self.info().keepalive_time;
                self.keepalive_timer.start(keepalive_time as u64);
                self.move_state(Event::Message(BgpMessageEvent::KeepAliveMsg));
                let info = self.info().clone();
                tracing::info!(
                    peer.addr = %info.remote_addr,
                    peer.asn = info.peer_asn,
                    peer.id = %info.peer_id,
                    "establish bgp session"
                );
                Ok(())
            }
            State::Established => {
                self.move_state(Event::Message(BgpMessageEvent::KeepAliveMsg));
                Ok(())
            }
            _ => {
                self.move_state(Event::Message(BgpMessageEvent::KeepAliveMsg));
                Err(Error::FiniteStateMachine)
            }
        }
    }

    // Event 27
    fn update_msg(
        &mut self,
        withdrawn_routes: Vec<Prefix>,
        attributes: Vec<Attribute>,
        nlri: Vec<Prefix>,
    ) -> Result<(), Error> {
        if self.state() != State::Established {
            self.move_state(Event::Message(BgpMessageEvent::UpdateMsg));
            return Err(Error::FiniteStateMachine);
        }
        self.handle_update_msg(withdrawn_routes, attributes, nlri)?;
        self.move_state(Event::Message(BgpMessageEvent::UpdateMsg));
        Ok(())
    }

    // Event 25
    fn notification_msg(
        &mut self,
        code: NotificationCode,
        subcode: Option<NotificationSubCode>,
        data: Vec<u8>,
    ) -> Result<(), Error> {
        tracing::warn!(?code, ?subcode, ?data, "receive notification");
        Err(Error::Peer(PeerError::NotificationReceived {
            code: u8::from(code),
            subcode: subcode.map(u8::from).unwrap_or(0),
        }))
    }

    // Returns the negotiated hold time and arms both timers accordingly.
    fn negotiate_hold_time(&mut self, received_hold_time: u16) -> u16 {
        let negotiated_hold_time = self.config.hold_time.min(received_hold_time);
        if negotiated_hold_time == 0 {
            self.hold_timer.stop();
            self.keepalive_timer.stop();
        } else {
            self.hold_timer.start(negotiated_hold_time as u64);
        }
        negotiated_hold_time
    }

    fn keepalive_time(hold_time: u16) -> u16 {
        if hold_time == 0 {
            0
        } else {
            (hold_time / 3).max(1)
        }
    }

    fn build_open_msg(&self) -> Result<Message, Error> {
        let mut builder = MessageBuilder::builder(MessageType::Open);
        builder
            .asn(self.config.asn)?
            .hold_time(self.config.hold_time)?
            .identifier(self.config.router_id)?;
        tracing::debug!(local.asn = self.config.asn, local.id = %self.config.router_id, "build open message");
        builder.build()
    }

    #[tracing::instrument(skip_all)]
    fn handle_update_msg(
        &mut self,
        withdrawn_routes: Vec<Prefix>,
        attributes: Vec<Attribute>,
        nlri: Vec<Prefix>,
    ) -> Result<(), Error> {
        let peer_id = self.info().peer_id;
        let mut builder = RouteEntryBuilder::builder(self.id, peer_id);
        builder.local_pref(self.config.default_local_pref);
        for attr in attributes.into_iter() {
            builder.attr(attr)?;
        }
        let entries = builder.nlri(nlri).build()?;
        let announced: HashSet<Ipv4Net> = entries.iter().map(|e| e.prefix()).collect();

        let (dropped, installed) = {
            let mut rib = self
                .adj_rib_in
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let dropped: Vec<Ipv4Net> = withdrawn_routes
                .iter()
                .map(|p| p.net())
                .filter(|p| !announced.contains(p))
                .filter(|p| rib.remove(p).is_some())
                .collect();
            let installed: Vec<RouteEntry> = entries
                .into_iter()
                .filter(|e| rib.insert(e.clone()))
                .collect();
            (dropped, installed)
        };
        tracing::debug!(
            withdrawn = dropped.len(),
            announced = installed.len(),
            "update adj-rib-in"
        );

        if !dropped.is_empty() {
            self.notify_rib(RibEvent::DropPaths(self.id, dropped))?;
        }
        if !installed.is_empty() {
            self.notify_rib(RibEvent::InstallPaths(self.id, installed))?;
        }
        Ok(())
    }

    fn notify_rib(&self, event: RibEvent) -> Result<(), Error> {
        self.rib_tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => Error::Peer(PeerError::RibChannelFull),
            TrySendError::Closed(_) => Error::Peer(PeerError::RibChannelClosed),
        })
    }

    /// Stop timers and retract every route this session owns.
    #[tracing::instrument(skip(self))]
    async fn release(&mut self) -> Result<(), Error> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.hold_timer.stop();
        self.keepalive_timer.stop();
        self.outgoing.clear();

        let dropped = {
            let mut rib = self
                .adj_rib_in
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let len = rib.len();
            rib.clear();
            len
        };
        self.rib_tx
            .send(RibEvent::DropSession(self.id))
            .await
            .map_err(|_| Error::Peer(PeerError::RibChannelClosed))?;
        self.info().state = State::Idle;
        tracing::warn!(dropped, "release session");
        Ok(())
    }
}

/// Restartable one-shot timer. A stopped timer never fires.
#[derive(Debug)]
struct Timer {
    sleep: Option<Pin<Box<Sleep>>>,
    interval: Duration,
}

impl Timer {
    fn new() -> Self {
        Self {
            sleep: None,
            interval: Duration::ZERO,
        }
    }

    // Zero seconds stops the timer.
    fn start(&mut self, secs: u64) {
        if secs == 0 {
            self.stop();
            return;
        }
        self.interval = Duration::from_secs(secs);
        self.sleep = Some(Box::pin(sleep(self.interval)));
    }

    fn restart(&mut self) {
        let deadline = Instant::now() + self.interval;
        if let Some(sleep) = self.sleep.as_mut() {
            sleep.as_mut().reset(deadline);
        }
    }

    fn stop(&mut self) {
        self.sleep = None;
    }

    async fn expired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().await,
            None => futures::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::{Arc, Mutex};

    use futures::{SinkExt, StreamExt};
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc::{channel, Receiver};
    use tokio::sync::Notify;
    use tokio::time::Instant;
    use tokio_util::codec::Framed;

    use rstest::rstest;

    use super::{Peer, PeerConfig, SessionInfo};
    use crate::event::RibEvent;
    use crate::packet::attribute::{ASSegment, Attribute};
    use crate::packet::capability::Cap;
    use crate::packet::codec::Codec;
    use crate::packet::message::{Message, NotificationCode, NotificationSubCode};
    use crate::packet::prefix::Prefix;
    use crate::path::SessionId;
    use crate::peer::fsm::State;
    use crate::rib::AdjRibIn;

    const LOCAL_ID: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);

    struct TestPeer {
        info: Arc<Mutex<SessionInfo>>,
        adj_rib_in: Arc<Mutex<AdjRibIn>>,
        rib_rx: Receiver<RibEvent>,
        close_signal: Arc<Notify>,
        remote: Framed<DuplexStream, Codec>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_peer(neighbor_asn: Option<u32>, rib_channel_size: usize) -> TestPeer {
        let info = Arc::new(Mutex::new(SessionInfo::new(
            SessionId::new(1),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 50000),
            65000,
            LOCAL_ID,
        )));
        let adj_rib_in = Arc::new(Mutex::new(AdjRibIn::new()));
        let (rib_tx, rib_rx) = channel(rib_channel_size);
        let close_signal = Arc::new(Notify::new());
        let mut peer = Peer::new(
            info.clone(),
            PeerConfig {
                asn: 65000,
                router_id: LOCAL_ID,
                hold_time: 90,
                neighbor_asn,
                default_local_pref: 100,
            },
            adj_rib_in.clone(),
            rib_tx,
            close_signal.clone(),
        );
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let handle = tokio::spawn(async move { peer.handle(local).await });
        TestPeer {
            info,
            adj_rib_in,
            rib_rx,
            close_signal,
            remote: Framed::new(remote, Codec::new()),
            handle,
        }
    }

    fn open(asn: u32, hold_time: u16, id: Ipv4Addr) -> Message {
        Message::Open {
            version: 4,
            as_num: asn,
            hold_time,
            identifier: id,
            capabilities: vec![],
        }
    }

    fn update(withdrawn: &[&str], nlri: &[&str], local_pref: Option<u32>) -> Message {
        let mut attributes = vec![];
        if !nlri.is_empty() {
            attributes.push(Attribute::new_origin(Attribute::ORIGIN_IGP).unwrap());
            attributes.push(Attribute::new_as_path(vec![ASSegment::new(
                Attribute::AS_SEQUENCE,
                vec![65001],
            )]));
            attributes.push(Attribute::new_nexthop(Ipv4Addr::new(10, 0, 0, 1)));
            if let Some(local_pref) = local_pref {
                attributes.push(Attribute::new_local_pref(local_pref));
            }
        }
        Message::Update {
            withdrawn_routes: withdrawn
                .iter()
                .map(|p| Prefix::new(p.parse().unwrap()))
                .collect(),
            attributes,
            nlri: nlri.iter().map(|p| Prefix::new(p.parse().unwrap())).collect(),
        }
    }

    async fn recv(remote: &mut Framed<DuplexStream, Codec>) -> Option<Message> {
        remote.next().await.map(|r| r.unwrap())
    }

    async fn establish(peer: &mut TestPeer) {
        match recv(&mut peer.remote).await {
            Some(Message::Open {
                as_num,
                hold_time,
                identifier,
                ..
            }) => {
                assert_eq!(65000, as_num);
                assert_eq!(90, hold_time);
                assert_eq!(LOCAL_ID, identifier);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(Some(Message::Keepalive), recv(&mut peer.remote).await);
        peer.remote
            .send(open(65001, 120, Ipv4Addr::new(10, 0, 0, 1)))
            .await
            .unwrap();
        peer.remote.send(Message::Keepalive).await.unwrap();
    }

    async fn expect_notification(
        remote: &mut Framed<DuplexStream, Codec>,
    ) -> (NotificationCode, Option<NotificationSubCode>, Vec<u8>) {
        loop {
            match recv(remote).await {
                Some(Message::Notification {
                    code,
                    subcode,
                    data,
                }) => return (code, subcode, data),
                Some(Message::Keepalive) => continue,
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn works_peer_handshake_and_shutdown() {
        let mut peer = spawn_peer(Some(65001), 16);
        establish(&mut peer).await;
        peer.remote
            .send(update(&[], &["10.0.0.0/8"], None))
            .await
            .unwrap();
        match peer.rib_rx.recv().await {
            Some(RibEvent::InstallPaths(id, entries)) => {
                assert_eq!(SessionId::new(1), id);
                assert_eq!(1, entries.len());
                assert_eq!(100, entries[0].local_pref());
                assert_eq!(Ipv4Addr::new(10, 0, 0, 1), entries[0].peer_id());
            }
            other => panic!("unexpected {other:?}"),
        }
        {
            let info = peer.info.lock().unwrap();
            assert_eq!(State::Established, info.state);
            assert_eq!(65001, info.peer_asn);
            assert_eq!(90, info.hold_time);
            assert_eq!(30, info.keepalive_time);
            assert_eq!(1, info.received.open);
            assert_eq!(1, info.received.update);
            assert_eq!(1, info.sent.open);
        }

        peer.close_signal.notify_one();
        assert_eq!(
            (
                NotificationCode::Cease,
                Some(NotificationSubCode::AdministrativeShutdown),
                vec![]
            ),
            expect_notification(&mut peer.remote).await
        );
        match peer.rib_rx.recv().await {
            Some(RibEvent::DropSession(id)) => assert_eq!(SessionId::new(1), id),
            other => panic!("unexpected {other:?}"),
        }
        peer.handle.await.unwrap();
        assert_eq!(State::Idle, peer.info.lock().unwrap().state);
        assert!(peer.adj_rib_in.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_peer_update_before_established() {
        let mut peer = spawn_peer(None, 16);
        assert!(matches!(
            recv(&mut peer.remote).await,
            Some(Message::Open { .. })
        ));
        peer.remote
            .send(update(&[], &["10.0.0.0/8"], None))
            .await
            .unwrap();
        let (code, _, _) = expect_notification(&mut peer.remote).await;
        assert_eq!(NotificationCode::FiniteStateMachine, code);
        assert_eq!(None, recv(&mut peer.remote).await);
        assert!(matches!(
            peer.rib_rx.recv().await,
            Some(RibEvent::DropSession(_))
        ));
        peer.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_peer_open_validation() {
        let cases = [
            (
                open(65001, 120, Ipv4Addr::new(10, 0, 0, 1)),
                Some(65002),
                NotificationSubCode::BadPeerAS,
                vec![0xfd, 0xe9],
            ),
            (
                open(65001, 120, LOCAL_ID),
                None,
                NotificationSubCode::BadBGPIdentifier,
                vec![],
            ),
            (
                open(65001, 120, Ipv4Addr::UNSPECIFIED),
                None,
                NotificationSubCode::BadBGPIdentifier,
                vec![],
            ),
            (
                open(65001, 2, Ipv4Addr::new(10, 0, 0, 1)),
                None,
                NotificationSubCode::UnacceptableHoldTime,
                vec![],
            ),
        ];
        for (msg, neighbor_asn, subcode, data) in cases {
            let mut peer = spawn_peer(neighbor_asn, 16);
            recv(&mut peer.remote).await;
            peer.remote.send(msg).await.unwrap();
            assert_eq!(
                (NotificationCode::OpenMessage, Some(subcode), data),
                expect_notification(&mut peer.remote).await
            );
            peer.handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn works_peer_four_octet_as_capability() {
        let mut peer = spawn_peer(Some(4200000000), 16);
        recv(&mut peer.remote).await;
        recv(&mut peer.remote).await;
        peer.remote
            .send(Message::Open {
                version: 4,
                as_num: 23456,
                hold_time: 0,
                identifier: Ipv4Addr::new(10, 0, 0, 1),
                capabilities: vec![Cap::FourOctetASNumber(4200000000)],
            })
            .await
            .unwrap();
        peer.remote.send(Message::Keepalive).await.unwrap();
        peer.remote
            .send(update(&[], &["10.0.0.0/8"], None))
            .await
            .unwrap();
        assert!(matches!(
            peer.rib_rx.recv().await,
            Some(RibEvent::InstallPaths(_, _))
        ));
        let info = peer.info.lock().unwrap().clone();
        assert_eq!(4200000000, info.peer_asn);
        assert_eq!(0, info.hold_time);
        assert_eq!(0, info.keepalive_time);
    }

    #[tokio::test(start_paused = true)]
    async fn works_peer_hold_timer_expire() {
        let mut peer = spawn_peer(None, 16);
        establish(&mut peer).await;
        let start = Instant::now();
        assert_eq!(
            (NotificationCode::HoldTimerExpired, None, vec![]),
            expect_notification(&mut peer.remote).await
        );
        assert!(start.elapsed().as_secs() >= 90);
        peer.handle.await.unwrap();
        assert_eq!(State::Idle, peer.info.lock().unwrap().state);
    }

    #[tokio::test(start_paused = true)]
    async fn works_peer_update_idempotent() {
        let mut peer = spawn_peer(None, 16);
        establish(&mut peer).await;
        let msg = update(&[], &["10.0.0.0/8", "20.0.0.0/16"], None);
        peer.remote.send(msg.clone()).await.unwrap();
        peer.remote.send(msg).await.unwrap();
        peer.remote
            .send(update(&["20.0.0.0/16"], &[], None))
            .await
            .unwrap();
        match peer.rib_rx.recv().await {
            Some(RibEvent::InstallPaths(_, entries)) => assert_eq!(2, entries.len()),
            other => panic!("unexpected {other:?}"),
        }
        match peer.rib_rx.recv().await {
            Some(RibEvent::DropPaths(_, prefixes)) => {
                assert_eq!(vec!["20.0.0.0/16".parse::<ipnet::Ipv4Net>().unwrap()], prefixes)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(1, peer.adj_rib_in.lock().unwrap().len());
    }

    #[tokio::test(start_paused = true)]
    async fn works_peer_withdraw_and_announce_same_prefix() {
        let mut peer = spawn_peer(None, 16);
        establish(&mut peer).await;
        peer.remote
            .send(update(&[], &["10.0.0.0/8"], None))
            .await
            .unwrap();
        peer.remote
            .send(update(&["10.0.0.0/8"], &["10.0.0.0/8"], Some(200)))
            .await
            .unwrap();
        // unknown prefix, nothing to drop
        peer.remote
            .send(update(&["30.0.0.0/8"], &[], None))
            .await
            .unwrap();
        assert!(matches!(
            peer.rib_rx.recv().await,
            Some(RibEvent::InstallPaths(_, _))
        ));
        match peer.rib_rx.recv().await {
            Some(RibEvent::InstallPaths(_, entries)) => {
                assert_eq!(200, entries[0].local_pref())
            }
            other => panic!("unexpected {other:?}"),
        }
        peer.close_signal.notify_one();
        assert!(matches!(
            peer.rib_rx.recv().await,
            Some(RibEvent::DropSession(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_peer_malformed_update() {
        let mut peer = spawn_peer(None, 16);
        establish(&mut peer).await;
        peer.remote
            .send(Message::Update {
                withdrawn_routes: vec![],
                attributes: vec![
                    Attribute::new_origin(Attribute::ORIGIN_IGP).unwrap(),
                    Attribute::new_nexthop(Ipv4Addr::new(10, 0, 0, 1)),
                ],
                nlri: vec![Prefix::new("10.0.0.0/8".parse().unwrap())],
            })
            .await
            .unwrap();
        assert_eq!(
            (
                NotificationCode::UpdateMessage,
                Some(NotificationSubCode::MissingWellknownAttribute),
                vec![Attribute::AS_PATH]
            ),
            expect_notification(&mut peer.remote).await
        );
        peer.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_peer_rib_channel_full() {
        let mut peer = spawn_peer(None, 1);
        establish(&mut peer).await;
        peer.remote
            .send(update(&[], &["10.0.0.0/8"], None))
            .await
            .unwrap();
        peer.remote
            .send(update(&[], &["20.0.0.0/8"], None))
            .await
            .unwrap();
        assert_eq!(
            (
                NotificationCode::Cease,
                Some(NotificationSubCode::OutOfResources),
                vec![]
            ),
            expect_notification(&mut peer.remote).await
        );
        assert!(matches!(
            peer.rib_rx.recv().await,
            Some(RibEvent::InstallPaths(_, _))
        ));
        assert!(matches!(
            peer.rib_rx.recv().await,
            Some(RibEvent::DropSession(_))
        ));
        peer.handle.await.unwrap();
    }

    #[rstest]
    #[case(NotificationCode::Cease, Some(NotificationSubCode::AdministrativeReset))]
    #[case(NotificationCode::Cease, Some(NotificationSubCode::Unknown(9)))]
    #[case(NotificationCode::FiniteStateMachine, Some(NotificationSubCode::Unknown(1)))]
    #[case(NotificationCode::OpenMessage, Some(NotificationSubCode::Unknown(7)))]
    #[case(NotificationCode::Unknown(7), None)]
    #[tokio::test(start_paused = true)]
    async fn works_peer_notification_is_not_answered(
        #[case] code: NotificationCode,
        #[case] subcode: Option<NotificationSubCode>,
    ) {
        let mut peer = spawn_peer(None, 16);
        establish(&mut peer).await;
        peer.remote
            .send(Message::Notification {
                code,
                subcode,
                data: vec![0x01, 0x02],
            })
            .await
            .unwrap();
        loop {
            match recv(&mut peer.remote).await {
                Some(Message::Keepalive) => continue,
                None => break,
                other => panic!("unexpected {other:?}"),
            }
        }
        peer.handle.await.unwrap();
        assert_eq!(1, peer.info.lock().unwrap().received.notification);
    }
}
