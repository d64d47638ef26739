use std::net::Ipv4Addr;

use crate::error::{Error, MessageHeaderError};
use crate::packet::attribute::Attribute;
use crate::packet::capability::Cap;
use crate::packet::prefix::Prefix;

// https://www.rfc-editor.org/rfc/rfc4271#section-4.1
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    // https://www.rfc-editor.org/rfc/rfc4271#section-4.2
    Open {
        version: u8,
        // values above 65535 are sent as AS_TRANS
        as_num: u32,
        hold_time: u16,
        identifier: Ipv4Addr,
        capabilities: Vec<Cap>,
    },
    // https://www.rfc-editor.org/rfc/rfc4271#section-4.3
    Update {
        withdrawn_routes: Vec<Prefix>,
        attributes: Vec<Attribute>,
        nlri: Vec<Prefix>,
    },
    // https://www.rfc-editor.org/rfc/rfc4271#section-4.5
    Notification {
        code: NotificationCode,
        subcode: Option<NotificationSubCode>,
        data: Vec<u8>,
    },
    // https://www.rfc-editor.org/rfc/rfc4271#section-4.4
    Keepalive,
}

impl Message {
    pub const VERSION: u8 = 4;
    pub const HEADER_LENGTH: u16 = 19;
    pub const MAX_LENGTH: u16 = 4096;
    pub const MIN_OPEN_LENGTH: u16 = 29;
    pub const MIN_UPDATE_LENGTH: u16 = 23;
    pub const MIN_NOTIFICATION_LENGTH: u16 = 21;
    pub const MARKER: u128 = 0xffff_ffff_ffff_ffff_ffff_ffff_ffff_ffff;
    pub const AS_TRANS: u32 = 23456;
    pub const OPTION_TYPE_CAPABILITIES: u8 = 2;
    pub const DEFAULT_HOLD_TIME: u16 = 120;

    pub fn msg_type(&self) -> MessageType {
        self.into()
    }

    /// Build the NOTIFICATION that reports `err` to the peer.
    pub fn notification_from(err: &Error) -> Option<Message> {
        err.notification()
            .map(|(code, subcode, data)| Message::Notification {
                code,
                subcode,
                data,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Open = 1,
    Update = 2,
    Notification = 3,
    Keepalive = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = MessageHeaderError;
    fn try_from(from: u8) -> Result<Self, Self::Error> {
        match from {
            1 => Ok(Self::Open),
            2 => Ok(Self::Update),
            3 => Ok(Self::Notification),
            4 => Ok(Self::Keepalive),
            _ => Err(MessageHeaderError::BadMessageType { val: from }),
        }
    }
}

impl From<&Message> for MessageType {
    fn from(msg: &Message) -> Self {
        match msg {
            Message::Open { .. } => Self::Open,
            Message::Update { .. } => Self::Update,
            Message::Notification { .. } => Self::Notification,
            Message::Keepalive => Self::Keepalive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCode {
    MessageHeader,
    OpenMessage,
    UpdateMessage,
    HoldTimerExpired,
    FiniteStateMachine,
    Cease,
    // codes from later RFCs are carried as received
    Unknown(u8),
}

impl From<u8> for NotificationCode {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::MessageHeader,
            2 => Self::OpenMessage,
            3 => Self::UpdateMessage,
            4 => Self::HoldTimerExpired,
            5 => Self::FiniteStateMachine,
            6 => Self::Cease,
            _ => Self::Unknown(value),
        }
    }
}

impl From<NotificationCode> for u8 {
    fn from(val: NotificationCode) -> Self {
        match val {
            NotificationCode::MessageHeader => 1,
            NotificationCode::OpenMessage => 2,
            NotificationCode::UpdateMessage => 3,
            NotificationCode::HoldTimerExpired => 4,
            NotificationCode::FiniteStateMachine => 5,
            NotificationCode::Cease => 6,
            NotificationCode::Unknown(code) => code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationSubCode {
    // for MessageHeader
    ConnectionNotSynchronized,
    BadMessageLength,
    BadMessageType,
    // for OpenMessage
    UnsupportedVersionNumber,
    BadPeerAS,
    BadBGPIdentifier,
    UnsupportedOptionalParameter,
    UnacceptableHoldTime,
    // for UpdateMessage
    MalformedAttributeList,
    UnrecognizedWellknownAttribute,
    MissingWellknownAttribute,
    AttributeFlagsError,
    AttributeLengthError,
    InvalidOriginAttribute,
    InvalidNextHopAttribute,
    OptionalAttributeError,
    InvalidNetworkField,
    MalformedASPath,
    // for Cease, https://www.rfc-editor.org/rfc/rfc4486#section-3
    MaximumNumberOfPrefixesReached,
    AdministrativeShutdown,
    PeerDeconfigured,
    AdministrativeReset,
    ConnectionRejected,
    OtherConfigurationChange,
    ConnectionCollisionResolution,
    OutOfResources,
    Unknown(u8),
}

impl NotificationSubCode {
    /// A subcode of 0 means unspecific and is decoded as None.
    pub fn from_with_code(value: u8, code: NotificationCode) -> Option<Self> {
        if value == 0 {
            return None;
        }
        let subcode = match code {
            NotificationCode::MessageHeader => match value {
                1 => Self::ConnectionNotSynchronized,
                2 => Self::BadMessageLength,
                3 => Self::BadMessageType,
                _ => Self::Unknown(value),
            },
            NotificationCode::OpenMessage => match value {
                1 => Self::UnsupportedVersionNumber,
                2 => Self::BadPeerAS,
                3 => Self::BadBGPIdentifier,
                4 => Self::UnsupportedOptionalParameter,
                6 => Self::UnacceptableHoldTime,
                _ => Self::Unknown(value),
            },
            NotificationCode::UpdateMessage => match value {
                1 => Self::MalformedAttributeList,
                2 => Self::UnrecognizedWellknownAttribute,
                3 => Self::MissingWellknownAttribute,
                4 => Self::AttributeFlagsError,
                5 => Self::AttributeLengthError,
                6 => Self::InvalidOriginAttribute,
                8 => Self::InvalidNextHopAttribute,
                9 => Self::OptionalAttributeError,
                10 => Self::InvalidNetworkField,
                11 => Self::MalformedASPath,
                _ => Self::Unknown(value),
            },
            NotificationCode::Cease => match value {
                1 => Self::MaximumNumberOfPrefixesReached,
                2 => Self::AdministrativeShutdown,
                3 => Self::PeerDeconfigured,
                4 => Self::AdministrativeReset,
                5 => Self::ConnectionRejected,
                6 => Self::OtherConfigurationChange,
                7 => Self::ConnectionCollisionResolution,
                8 => Self::OutOfResources,
                _ => Self::Unknown(value),
            },
            NotificationCode::HoldTimerExpired
            | NotificationCode::FiniteStateMachine
            | NotificationCode::Unknown(_) => Self::Unknown(value),
        };
        Some(subcode)
    }
}

impl From<NotificationSubCode> for u8 {
    fn from(val: NotificationSubCode) -> Self {
        match val {
            NotificationSubCode::ConnectionNotSynchronized => 1,
            NotificationSubCode::BadMessageLength => 2,
            NotificationSubCode::BadMessageType => 3,
            NotificationSubCode::UnsupportedVersionNumber => 1,
            NotificationSubCode::BadPeerAS => 2,
            NotificationSubCode::BadBGPIdentifier => 3,
            NotificationSubCode::UnsupportedOptionalParameter => 4,
            NotificationSubCode::UnacceptableHoldTime => 6,
            NotificationSubCode::MalformedAttributeList => 1,
            NotificationSubCode::UnrecognizedWellknownAttribute => 2,
            NotificationSubCode::MissingWellknownAttribute => 3,
            NotificationSubCode::AttributeFlagsError => 4,
            NotificationSubCode::AttributeLengthError => 5,
            NotificationSubCode::InvalidOriginAttribute => 6,
            NotificationSubCode::InvalidNextHopAttribute => 8,
            NotificationSubCode::OptionalAttributeError => 9,
            NotificationSubCode::InvalidNetworkField => 10,
            NotificationSubCode::MalformedASPath => 11,
            NotificationSubCode::MaximumNumberOfPrefixesReached => 1,
            NotificationSubCode::AdministrativeShutdown => 2,
            NotificationSubCode::PeerDeconfigured => 3,
            NotificationSubCode::AdministrativeReset => 4,
            NotificationSubCode::ConnectionRejected => 5,
            NotificationSubCode::OtherConfigurationChange => 6,
            NotificationSubCode::ConnectionCollisionResolution => 7,
            NotificationSubCode::OutOfResources => 8,
            NotificationSubCode::Unknown(subcode) => subcode,
        }
    }
}

#[derive(Debug)]
pub struct MessageBuilder {
    msg_type: MessageType,
    as_num: u32,
    hold_time: u16,
    identifier: Ipv4Addr,
    capabilities: Vec<Cap>,
    withdrawn_routes: Vec<Prefix>,
    attributes: Vec<Attribute>,
    nlri: Vec<Prefix>,
    code: Option<NotificationCode>,
    subcode: Option<NotificationSubCode>,
    data: Vec<u8>,
}

impl MessageBuilder {
    pub fn builder(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            as_num: 0,
            hold_time: Message::DEFAULT_HOLD_TIME,
            identifier: Ipv4Addr::UNSPECIFIED,
            capabilities: Vec::new(),
            withdrawn_routes: Vec::new(),
            attributes: Vec::new(),
            nlri: Vec::new(),
            code: None,
            subcode: None,
            data: Vec::new(),
        }
    }

    fn expect(&self, msg_type: MessageType, field: &'static str) -> Result<(), Error> {
        if self.msg_type != msg_type {
            return Err(Error::InvalidMessageField {
                field,
                msg_type: self.msg_type,
            });
        }
        Ok(())
    }

    pub fn asn(&mut self, asn: u32) -> Result<&mut Self, Error> {
        self.expect(MessageType::Open, "asn")?;
        self.as_num = asn;
        Ok(self)
    }

    pub fn hold_time(&mut self, hold_time: u16) -> Result<&mut Self, Error> {
        self.expect(MessageType::Open, "hold_time")?;
        self.hold_time = hold_time;
        Ok(self)
    }

    pub fn identifier(&mut self, id: Ipv4Addr) -> Result<&mut Self, Error> {
        self.expect(MessageType::Open, "identifier")?;
        self.identifier = id;
        Ok(self)
    }

    pub fn capability(&mut self, cap: Cap) -> Result<&mut Self, Error> {
        self.expect(MessageType::Open, "capability")?;
        self.capabilities.push(cap);
        Ok(self)
    }

    pub fn withdrawn_routes(&mut self, mut routes: Vec<Prefix>) -> Result<&mut Self, Error> {
        self.expect(MessageType::Update, "withdrawn_routes")?;
        self.withdrawn_routes.append(&mut routes);
        Ok(self)
    }

    pub fn attribute(&mut self, attr: Attribute) -> Result<&mut Self, Error> {
        self.expect(MessageType::Update, "attribute")?;
        self.attributes.push(attr);
        Ok(self)
    }

    pub fn nlri(&mut self, mut prefixes: Vec<Prefix>) -> Result<&mut Self, Error> {
        self.expect(MessageType::Update, "nlri")?;
        self.nlri.append(&mut prefixes);
        Ok(self)
    }

    pub fn code(&mut self, code: NotificationCode) -> Result<&mut Self, Error> {
        self.expect(MessageType::Notification, "code")?;
        self.code = Some(code);
        Ok(self)
    }

    pub fn subcode(&mut self, subcode: Option<NotificationSubCode>) -> Result<&mut Self, Error> {
        self.expect(MessageType::Notification, "subcode")?;
        self.subcode = subcode;
        Ok(self)
    }

    pub fn data(&mut self, data: Vec<u8>) -> Result<&mut Self, Error> {
        self.expect(MessageType::Notification, "data")?;
        self.data = data;
        Ok(self)
    }

    pub fn build(&self) -> Result<Message, Error> {
        match self.msg_type {
            MessageType::Open => Ok(Message::Open {
                version: Message::VERSION,
                as_num: self.as_num,
                hold_time: self.hold_time,
                identifier: self.identifier,
                capabilities: self.capabilities.clone(),
            }),
            MessageType::Update => Ok(Message::Update {
                withdrawn_routes: self.withdrawn_routes.clone(),
                attributes: self.attributes.clone(),
                nlri: self.nlri.clone(),
            }),
            MessageType::Notification => match self.code {
                Some(code) => Ok(Message::Notification {
                    code,
                    subcode: self.subcode,
                    data: self.data.clone(),
                }),
                None => Err(Error::InvalidMessageField {
                    field: "code",
                    msg_type: self.msg_type,
                }),
            },
            MessageType::Keepalive => Ok(Message::Keepalive),
        }
    }
}
