use thiserror::Error;

use crate::packet::message::{Message, MessageType, NotificationCode, NotificationSubCode};

#[derive(Debug, Error)]
pub enum Error {
    #[error("message header error: {0}")]
    MessageHeader(#[from] MessageHeaderError),
    #[error("OPEN message error: {0}")]
    OpenMessage(#[from] OpenMessageError),
    #[error("UPDATE message error: {0}")]
    UpdateMessage(#[from] UpdateMessageError),
    #[error("field {field} is not valid for {msg_type:?} message")]
    InvalidMessageField {
        field: &'static str,
        msg_type: MessageType,
    },
    #[error("Hold timer expired")]
    HoldTimerExpired,
    #[error("Finite state machine error")]
    FiniteStateMachine,
    #[error("peer error: {0}")]
    Peer(#[from] PeerError),
    #[error("rib error: {0}")]
    Rib(#[from] RibError),
    #[error("control error: {0}")]
    Control(#[from] ControlError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("std::io::Error: {0}")]
    StdIoErr(#[from] std::io::Error),
}

impl Error {
    /// Error code, subcode and diagnostic data to report to the peer in a NOTIFICATION.
    /// Returns None for errors that are not the peer's fault.
    pub fn notification(&self) -> Option<(NotificationCode, Option<NotificationSubCode>, Vec<u8>)> {
        match self {
            Error::MessageHeader(e) => {
                let (subcode, data) = match e {
                    MessageHeaderError::ConnectionNotSynchronized => {
                        (NotificationSubCode::ConnectionNotSynchronized, Vec::new())
                    }
                    MessageHeaderError::BadMessageLength { length } => (
                        NotificationSubCode::BadMessageLength,
                        length.to_be_bytes().to_vec(),
                    ),
                    MessageHeaderError::BadMessageType { val } => {
                        (NotificationSubCode::BadMessageType, vec![*val])
                    }
                };
                Some((NotificationCode::MessageHeader, Some(subcode), data))
            }
            Error::OpenMessage(e) => {
                let (subcode, data) = match e {
                    OpenMessageError::UnsupportedVersionNumber => (
                        Some(NotificationSubCode::UnsupportedVersionNumber),
                        (Message::VERSION as u16)
                            .to_be_bytes()
                            .to_vec(),
                    ),
                    OpenMessageError::BadPeerAS { asn } => (
                        Some(NotificationSubCode::BadPeerAS),
                        u16::try_from(*asn)
                            .unwrap_or(Message::AS_TRANS as u16)
                            .to_be_bytes()
                            .to_vec(),
                    ),
                    OpenMessageError::BadBgpIdentifier => {
                        (Some(NotificationSubCode::BadBGPIdentifier), Vec::new())
                    }
                    OpenMessageError::UnsupportedOptionalParameter { param } => (
                        Some(NotificationSubCode::UnsupportedOptionalParameter),
                        vec![*param],
                    ),
                    OpenMessageError::UnacceptableHoldTime { .. } => {
                        (Some(NotificationSubCode::UnacceptableHoldTime), Vec::new())
                    }
                    OpenMessageError::Unspecific => (None, Vec::new()),
                };
                Some((NotificationCode::OpenMessage, subcode, data))
            }
            Error::UpdateMessage(e) => {
                let (subcode, data) = match e {
                    UpdateMessageError::MalformedAttributeList => {
                        (NotificationSubCode::MalformedAttributeList, Vec::new())
                    }
                    UpdateMessageError::UnrecognizedWellknownAttribute(code) => {
                        (NotificationSubCode::UnrecognizedWellknownAttribute, vec![*code])
                    }
                    UpdateMessageError::MissingWellKnownAttribute(code) => {
                        (NotificationSubCode::MissingWellknownAttribute, vec![*code])
                    }
                    UpdateMessageError::AttributeFlagsError { code, .. } => {
                        (NotificationSubCode::AttributeFlagsError, vec![*code])
                    }
                    UpdateMessageError::AttributeLengthError { code, .. } => {
                        (NotificationSubCode::AttributeLengthError, vec![*code])
                    }
                    UpdateMessageError::InvalidOriginAttribute(val) => {
                        (NotificationSubCode::InvalidOriginAttribute, vec![*val])
                    }
                    UpdateMessageError::InvalidNextHopAttribute(addr) => (
                        NotificationSubCode::InvalidNextHopAttribute,
                        addr.octets().to_vec(),
                    ),
                    UpdateMessageError::InvalidNetworkField => {
                        (NotificationSubCode::InvalidNetworkField, Vec::new())
                    }
                    UpdateMessageError::MalformedASPath => {
                        (NotificationSubCode::MalformedASPath, Vec::new())
                    }
                };
                Some((NotificationCode::UpdateMessage, Some(subcode), data))
            }
            Error::HoldTimerExpired => Some((NotificationCode::HoldTimerExpired, None, Vec::new())),
            Error::FiniteStateMachine => {
                Some((NotificationCode::FiniteStateMachine, None, Vec::new()))
            }
            Error::Peer(PeerError::RibChannelFull) => Some((
                NotificationCode::Cease,
                Some(NotificationSubCode::OutOfResources),
                Vec::new(),
            )),
            _ => None,
        }
    }
}

// https://www.rfc-editor.org/rfc/rfc4271#section-6.1
#[derive(Debug, Error, PartialEq)]
pub enum MessageHeaderError {
    #[error("Connection not synchronized")]
    ConnectionNotSynchronized,
    #[error("Bad message length {length}")]
    BadMessageLength { length: u16 },
    #[error("Bad message type {val}")]
    BadMessageType { val: u8 },
}

// https://www.rfc-editor.org/rfc/rfc4271#section-6.2
#[derive(Debug, Error, PartialEq)]
pub enum OpenMessageError {
    #[error("Unsupported version number")]
    UnsupportedVersionNumber,
    #[error("Bad peer AS {asn}")]
    BadPeerAS { asn: u32 },
    #[error("Bad BGP identifier")]
    BadBgpIdentifier,
    #[error("Unsupported optional parameter {param}")]
    UnsupportedOptionalParameter { param: u8 },
    #[error("Unacceptable hold time {hold_time}")]
    UnacceptableHoldTime { hold_time: u16 },
    #[error("Unspecific")]
    Unspecific,
}

// https://www.rfc-editor.org/rfc/rfc4271#section-6.3
#[derive(Debug, Error, PartialEq)]
pub enum UpdateMessageError {
    #[error("Malformed attribute list")]
    MalformedAttributeList,
    #[error("Unrecognized well-known attribute {0}")]
    UnrecognizedWellknownAttribute(u8),
    #[error("Missing well-known attribute {0}")]
    MissingWellKnownAttribute(u8),
    #[error("Attribute flags error: code={code} flag={value:#04x}")]
    AttributeFlagsError { code: u8, value: u8 },
    #[error("Attribute length error: code={code} length={length}")]
    AttributeLengthError { code: u8, length: usize },
    #[error("Invalid ORIGIN attribute {0}")]
    InvalidOriginAttribute(u8),
    #[error("Invalid NEXT_HOP attribute {0}")]
    InvalidNextHopAttribute(std::net::Ipv4Addr),
    #[error("Invalid network field")]
    InvalidNetworkField,
    #[error("Malformed AS path")]
    MalformedASPath,
}

#[derive(Debug, Error, PartialEq)]
pub enum PeerError {
    #[error("peer closed the connection")]
    ConnectionClosed,
    #[error("received NOTIFICATION: code={code} subcode={subcode}")]
    NotificationReceived { code: u8, subcode: u8 },
    #[error("rib channel is full")]
    RibChannelFull,
    #[error("rib channel is closed")]
    RibChannelClosed,
    #[error("peer {0} is not configured")]
    UnknownNeighbor(std::net::IpAddr),
}

#[derive(Debug, Error, PartialEq)]
pub enum RibError {
    #[error("rib manager is stopped")]
    ManagerStopped,
    #[error("listener queue is closed")]
    ListenerClosed,
}

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("session manager is already running")]
    AlreadyRunning,
    #[error("session manager is not running")]
    NotRunning,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load: {0}")]
    FailedToLoad(#[from] serde_yaml::Error),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}
