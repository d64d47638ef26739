use std::fmt;

use crate::event::{AdministrativeEvent, BgpMessageEvent, Event, TcpConnectionEvent, TimerEvent};

#[derive(Debug)]
pub(crate) struct FiniteStateMachine {
    state: State,
}

impl FiniteStateMachine {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    pub fn get_state(&self) -> State {
        self.state
    }

    // https://www.rfc-editor.org/rfc/rfc4271#section-8.2.2
    // The speaker never opens connections, so Connect and Active are not modeled.
    pub fn mv(&mut self, event: Event) {
        self.state = match self.state {
            State::Idle => match event {
                Event::Connection(TcpConnectionEvent::TcpConnectionConfirmed) => State::OpenSent,
                _ => State::Idle,
            },
            State::OpenSent => match event {
                Event::Message(BgpMessageEvent::BgpOpen) => State::OpenConfirm,
                _ => State::Idle,
            },
            State::OpenConfirm => match event {
                Event::Message(BgpMessageEvent::KeepAliveMsg) => State::Established,
                Event::Timer(TimerEvent::KeepaliveTimerExpire) => State::OpenConfirm,
                _ => State::Idle,
            },
            State::Established => match event {
                Event::Message(BgpMessageEvent::KeepAliveMsg)
                | Event::Message(BgpMessageEvent::UpdateMsg)
                | Event::Timer(TimerEvent::KeepaliveTimerExpire) => State::Established,
                Event::Admin(AdministrativeEvent::ManualStop)
                | Event::Timer(TimerEvent::HoldTimerExpire)
                | Event::Connection(_)
                | Event::Message(_) => State::Idle,
            },
        }
    }
}

// https://www.rfc-editor.org/rfc/rfc4271#section-8.2.2
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    Idle,
    OpenSent,
    OpenConfirm,
    Established,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::OpenSent => write!(f, "OpenSent"),
            Self::OpenConfirm => write!(f, "OpenConfirm"),
            Self::Established => write!(f, "Established"),
        }
    }
}
