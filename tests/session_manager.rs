use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use ipnet::Ipv4Net;
use rstest::rstest;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::codec::Framed;

use bgp_speaker::packet::attribute::{ASSegment, Attribute};
use bgp_speaker::packet::codec::Codec;
use bgp_speaker::packet::message::{Message, NotificationCode, NotificationSubCode};
use bgp_speaker::packet::prefix::Prefix;
use bgp_speaker::{
    Config, NeighborConfig, RouteListener, RouteUpdate, RouteUpdateKind, SessionInfo,
    SessionManager, State,
};

const LOCAL_ASN: u32 = 65000;
const LOCAL_ID: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);
const PEER_A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const PEER_B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const WAIT: Duration = Duration::from_secs(5);

struct Recorder {
    tx: UnboundedSender<RouteUpdate>,
}

impl RouteListener for Recorder {
    fn update(&self, updates: Vec<RouteUpdate>) {
        for update in updates.into_iter() {
            let _ = self.tx.send(update);
        }
    }
}

type Remote = Framed<TcpStream, Codec>;

async fn start_manager(config: Config) -> (SessionManager, SocketAddr, UnboundedReceiver<RouteUpdate>) {
    let (tx, rx) = unbounded_channel();
    let mut manager = SessionManager::new(config, Arc::new(Recorder { tx }));
    let bound = manager.start(0).await.unwrap();
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), bound.port());
    (manager, addr, rx)
}

fn config() -> Config {
    let mut config = Config::new(LOCAL_ASN, LOCAL_ID);
    config.hold_time = 90;
    config
}

async fn recv(remote: &mut Remote) -> Option<Message> {
    tokio::time::timeout(WAIT, remote.next())
        .await
        .unwrap()
        .map(|r| r.unwrap())
}

/// Connect and run the OPEN/KEEPALIVE exchange as AS 65001.
async fn connect(addr: SocketAddr, id: Ipv4Addr) -> Remote {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut remote = Framed::new(stream, Codec::new());
    match recv(&mut remote).await {
        Some(Message::Open {
            as_num,
            hold_time,
            identifier,
            ..
        }) => {
            assert_eq!(LOCAL_ASN, as_num);
            assert_eq!(90, hold_time);
            assert_eq!(LOCAL_ID, identifier);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(Some(Message::Keepalive), recv(&mut remote).await);
    remote
        .send(Message::Open {
            version: 4,
            as_num: 65001,
            hold_time: 120,
            identifier: id,
            capabilities: vec![],
        })
        .await
        .unwrap();
    remote.send(Message::Keepalive).await.unwrap();
    remote
}

async fn wait_until<F: Fn() -> bool>(f: F) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !f() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn session_of(manager: &SessionManager, id: Ipv4Addr) -> Option<SessionInfo> {
    manager
        .active_sessions()
        .into_iter()
        .find(|s| s.peer_id == id && s.state == State::Established)
}

async fn establish(manager: &SessionManager, addr: SocketAddr, id: Ipv4Addr) -> (Remote, SessionInfo) {
    let remote = connect(addr, id).await;
    wait_until(|| session_of(manager, id).is_some()).await;
    let info = session_of(manager, id).unwrap();
    (remote, info)
}

fn update(withdrawn: &[&str], nlri: &[&str], local_pref: Option<u32>) -> Message {
    let mut attributes = vec![];
    if !nlri.is_empty() {
        attributes.push(Attribute::new_origin(Attribute::ORIGIN_IGP).unwrap());
        attributes.push(Attribute::new_as_path(vec![ASSegment::new(
            Attribute::AS_SEQUENCE,
            vec![65001],
        )]));
        attributes.push(Attribute::new_nexthop(PEER_A));
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

async fn next_update(rx: &mut UnboundedReceiver<RouteUpdate>) -> RouteUpdate {
    tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

async fn collect_updates(
    rx: &mut UnboundedReceiver<RouteUpdate>,
    n: usize,
    kind: RouteUpdateKind,
) -> HashSet<Ipv4Net> {
    let mut prefixes = HashSet::new();
    for _ in 0..n {
        let update = next_update(rx).await;
        assert_eq!(kind, update.kind);
        prefixes.insert(update.entry.prefix());
    }
    prefixes
}

fn nets(prefixes: &[&str]) -> HashSet<Ipv4Net> {
    prefixes.iter().map(|p| p.parse().unwrap()).collect()
}

async fn expect_notification(remote: &mut Remote) -> (NotificationCode, Option<NotificationSubCode>) {
    loop {
        match recv(remote).await {
            Some(Message::Notification { code, subcode, .. }) => return (code, subcode),
            Some(Message::Keepalive) => continue,
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[tokio::test]
async fn works_handshake() {
    let (mut manager, addr, _rx) = start_manager(config()).await;
    let (_remote, info) = establish(&manager, addr, PEER_A).await;

    let sessions = manager.active_sessions();
    assert_eq!(1, sessions.len());
    assert_eq!(65001, info.peer_asn);
    assert_eq!(PEER_A, info.peer_id);
    assert_eq!(LOCAL_ID, info.local_id);
    assert_eq!(90, info.hold_time);
    assert_eq!(30, info.keepalive_time);
    assert_eq!(1, info.sent.open);
    assert_eq!(1, info.received.open);
    assert_eq!(LOCAL_ID, manager.my_bgp_id());
    assert_eq!(Some(vec![]), manager.rib_in(info.id));

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn works_withdrawal_and_close() {
    let (mut manager, addr, mut rx) = start_manager(config()).await;
    let (mut remote, info) = establish(&manager, addr, PEER_A).await;

    let all = ["0.0.0.0/0", "20.0.0.0/8", "30.0.0.0/16", "40.0.0.0/24", "50.0.0.0/32"];
    remote.send(update(&[], &all, None)).await.unwrap();
    assert_eq!(nets(&all), collect_updates(&mut rx, 5, RouteUpdateKind::Add).await);
    assert_eq!(5, manager.rib_in(info.id).unwrap().len());
    assert_eq!(5, manager.best_routes().len());

    remote
        .send(update(&["0.0.0.0/0", "50.0.0.0/32"], &[], None))
        .await
        .unwrap();
    assert_eq!(
        nets(&["0.0.0.0/0", "50.0.0.0/32"]),
        collect_updates(&mut rx, 2, RouteUpdateKind::Withdraw).await
    );
    let remaining = nets(&["20.0.0.0/8", "30.0.0.0/16", "40.0.0.0/24"]);
    let best: HashSet<Ipv4Net> = manager.best_routes().iter().map(|r| r.prefix()).collect();
    assert_eq!(remaining, best);

    drop(remote);
    assert_eq!(
        remaining,
        collect_updates(&mut rx, 3, RouteUpdateKind::Withdraw).await
    );
    wait_until(|| manager.active_sessions().is_empty()).await;
    assert!(manager.best_routes().is_empty());
    assert_eq!(None, manager.rib_in(info.id));

    manager.stop().await.unwrap();
}

#[rstest]
#[case(true)]
#[case(false)]
#[tokio::test]
async fn works_best_path_local_pref(#[case] low_first: bool) {
    let (mut manager, addr, mut rx) = start_manager(config()).await;
    let (mut a, _) = establish(&manager, addr, PEER_A).await;
    let (mut b, _) = establish(&manager, addr, PEER_B).await;

    if low_first {
        a.send(update(&[], &["10.0.0.0/8"], Some(100))).await.unwrap();
        let change = next_update(&mut rx).await;
        assert_eq!(RouteUpdateKind::Add, change.kind);
        assert_eq!(100, change.entry.local_pref());

        b.send(update(&[], &["10.0.0.0/8"], Some(200))).await.unwrap();
        let change = next_update(&mut rx).await;
        assert_eq!(RouteUpdateKind::Add, change.kind);
        assert_eq!(200, change.entry.local_pref());
        assert_eq!(PEER_B, change.entry.peer_id());
    } else {
        b.send(update(&[], &["10.0.0.0/8"], Some(200))).await.unwrap();
        let change = next_update(&mut rx).await;
        assert_eq!(RouteUpdateKind::Add, change.kind);
        assert_eq!(200, change.entry.local_pref());

        // A losing candidate produces no update; the marker shows A's update was processed.
        a.send(update(&[], &["10.0.0.0/8"], Some(100))).await.unwrap();
        a.send(update(&[], &["99.0.0.0/8"], Some(100))).await.unwrap();
        let change = next_update(&mut rx).await;
        assert_eq!("99.0.0.0/8".parse::<Ipv4Net>().unwrap(), change.entry.prefix());
    }

    let best = manager.best_routes();
    let best = best
        .iter()
        .find(|r| r.prefix() == "10.0.0.0/8".parse::<Ipv4Net>().unwrap())
        .unwrap();
    assert_eq!(200, best.local_pref());
    assert_eq!(PEER_B, best.peer_id());

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn works_update_idempotent() {
    let (mut manager, addr, mut rx) = start_manager(config()).await;
    let (mut remote, info) = establish(&manager, addr, PEER_A).await;

    remote.send(update(&[], &["10.0.0.0/8"], None)).await.unwrap();
    remote.send(update(&[], &["10.0.0.0/8"], None)).await.unwrap();
    remote.send(update(&[], &["99.0.0.0/8"], None)).await.unwrap();

    let first = next_update(&mut rx).await;
    assert_eq!(RouteUpdateKind::Add, first.kind);
    assert_eq!("10.0.0.0/8".parse::<Ipv4Net>().unwrap(), first.entry.prefix());
    let second = next_update(&mut rx).await;
    assert_eq!("99.0.0.0/8".parse::<Ipv4Net>().unwrap(), second.entry.prefix());
    assert_eq!(2, manager.rib_in(info.id).unwrap().len());

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn failed_malformed_update_closes_only_sender() {
    let (mut manager, addr, mut rx) = start_manager(config()).await;
    let (mut a, info_a) = establish(&manager, addr, PEER_A).await;
    let (mut b, info_b) = establish(&manager, addr, PEER_B).await;

    a.send(update(&[], &["10.0.0.0/8"], None)).await.unwrap();
    assert_eq!(RouteUpdateKind::Add, next_update(&mut rx).await.kind);
    b.send(update(&[], &["20.0.0.0/8"], None)).await.unwrap();
    assert_eq!(RouteUpdateKind::Add, next_update(&mut rx).await.kind);

    a.send(Message::Update {
        withdrawn_routes: vec![],
        attributes: vec![
            Attribute::new_origin(Attribute::ORIGIN_IGP).unwrap(),
            Attribute::new_nexthop(PEER_A),
        ],
        nlri: vec![Prefix::new("30.0.0.0/8".parse().unwrap())],
    })
    .await
    .unwrap();
    assert_eq!(
        (
            NotificationCode::UpdateMessage,
            Some(NotificationSubCode::MissingWellknownAttribute)
        ),
        expect_notification(&mut a).await
    );

    let withdrawn = next_update(&mut rx).await;
    assert_eq!(RouteUpdateKind::Withdraw, withdrawn.kind);
    assert_eq!("10.0.0.0/8".parse::<Ipv4Net>().unwrap(), withdrawn.entry.prefix());

    wait_until(|| manager.rib_in(info_a.id).is_none()).await;
    let sessions = manager.active_sessions();
    assert_eq!(1, sessions.len());
    assert_eq!(info_b.id, sessions[0].id);
    assert_eq!(State::Established, sessions[0].state);
    assert_eq!(1, manager.rib_in(info_b.id).unwrap().len());
    let best = manager.best_routes();
    assert_eq!(1, best.len());
    assert_eq!(PEER_B, best[0].peer_id());

    manager.stop().await.unwrap();
    assert_eq!(
        (
            NotificationCode::Cease,
            Some(NotificationSubCode::AdministrativeShutdown)
        ),
        expect_notification(&mut b).await
    );
}

#[tokio::test]
async fn works_stop_withdraws_routes() {
    let (mut manager, addr, mut rx) = start_manager(config()).await;
    let (mut remote, _) = establish(&manager, addr, PEER_A).await;

    remote
        .send(update(&[], &["10.0.0.0/8", "20.0.0.0/8"], None))
        .await
        .unwrap();
    collect_updates(&mut rx, 2, RouteUpdateKind::Add).await;

    manager.stop().await.unwrap();
    assert_eq!(
        (
            NotificationCode::Cease,
            Some(NotificationSubCode::AdministrativeShutdown)
        ),
        expect_notification(&mut remote).await
    );
    let mut withdrawn = HashSet::new();
    while let Ok(update) = rx.try_recv() {
        assert_eq!(RouteUpdateKind::Withdraw, update.kind);
        withdrawn.insert(update.entry.prefix());
    }
    assert_eq!(nets(&["10.0.0.0/8", "20.0.0.0/8"]), withdrawn);
    assert!(manager.best_routes().is_empty());
    assert!(manager.active_sessions().is_empty());
}

#[tokio::test]
async fn failed_unknown_neighbor_refused() {
    let mut config = config();
    config.neighbors.push(NeighborConfig {
        name: "other".to_string(),
        asn: 65001,
        address: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
    });
    let (mut manager, addr, _rx) = start_manager(config).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut remote = Framed::new(stream, Codec::new());
    let res = tokio::time::timeout(WAIT, remote.next()).await.unwrap();
    assert!(!matches!(res, Some(Ok(Message::Open { .. }))));
    assert!(manager.active_sessions().is_empty());

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn works_known_neighbor_accepted() {
    let mut config = config();
    config.neighbors.push(NeighborConfig {
        name: "local".to_string(),
        asn: 65001,
        address: IpAddr::V4(Ipv4Addr::LOCALHOST),
    });
    let (mut manager, addr, _rx) = start_manager(config).await;
    let (_remote, info) = establish(&manager, addr, PEER_A).await;
    assert_eq!(65001, info.peer_asn);
    manager.stop().await.unwrap();
}
