use ipnet::Ipv4Net;
use tokio::sync::oneshot;

use crate::path::{RouteEntry, SessionId};

// Subset of https://www.rfc-editor.org/rfc/rfc4271#section-8.1 used by a passive speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Event {
    Admin(AdministrativeEvent),
    Timer(TimerEvent),
    Connection(TcpConnectionEvent),
    Message(BgpMessageEvent),
}

// https://www.rfc-editor.org/rfc/rfc4271#section-8.1.2
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum AdministrativeEvent {
    ManualStop,
}

// https://www.rfc-editor.org/rfc/rfc4271#section-8.1.3
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum TimerEvent {
    HoldTimerExpire,
    KeepaliveTimerExpire,
}

// https://www.rfc-editor.org/rfc/rfc4271#section-8.1.4
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum TcpConnectionEvent {
    TcpConnectionConfirmed,
    TcpConnectionFail,
}

// https://www.rfc-editor.org/rfc/rfc4271#section-8.1.5
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum BgpMessageEvent {
    BgpOpen,
    BgpHeaderError,
    BgpOpenMsgErr,
    NotifMsg,
    KeepAliveMsg,
    UpdateMsg,
    UpdateMsgErr,
}

/// Requests handled by the RIB task.
#[derive(Debug)]
pub(crate) enum RibEvent {
    /// Routes added to or replaced in a session's RIB-in.
    InstallPaths(SessionId, Vec<RouteEntry>),
    /// Prefixes removed from a session's RIB-in.
    DropPaths(SessionId, Vec<Ipv4Net>),
    /// The session is gone; retract everything it still owns.
    DropSession(SessionId),
    /// Withdraw every best route and stop once the withdrawals are dispatched.
    Shutdown(oneshot::Sender<()>),
}
