use std::collections::HashSet;
use std::net::Ipv4Addr;

use byteorder::{NetworkEndian, WriteBytesExt};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::*;
use crate::packet::attribute::Attribute;
use crate::packet::capability::Cap;
use crate::packet::message::{Message, MessageType, NotificationCode, NotificationSubCode};
use crate::packet::prefix::Prefix;

/// Streaming framer for BGP messages.
///
/// `decode` yields `Ok(None)` until a whole message is buffered. The header is
/// validated as soon as it is readable so that a bogus length never causes
/// the codec to wait for bytes that will not come.
#[derive(Debug, Default)]
pub struct Codec {}

impl Codec {
    pub fn new() -> Self {
        Self {}
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = Error;

    #[tracing::instrument(skip(self, src))]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < Message::HEADER_LENGTH as usize {
            return Ok(None);
        }
        let length = check_header(src)?;
        if src.len() < length as usize {
            src.reserve(length as usize - src.len());
            return Ok(None);
        }
        let frame = src.split_to(length as usize);
        tracing::trace!(length, "decode message");
        decode_msg(frame).map(Some)
    }
}

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let msg_head = dst.len();
        dst.put_u128(Message::MARKER);
        let header_length_head = dst.len();
        dst.put_u16(Message::HEADER_LENGTH);
        dst.put_u8(item.msg_type() as u8);
        if let Err(e) = encode_body(item, dst) {
            dst.truncate(msg_head);
            return Err(e);
        }
        let length = dst.len() - msg_head;
        if length > Message::MAX_LENGTH as usize {
            dst.truncate(msg_head);
            return Err(too_long(length));
        }
        (&mut dst.as_mut()[header_length_head..]).write_u16::<NetworkEndian>(length as u16)?;
        Ok(())
    }
}

fn too_long(length: usize) -> Error {
    Error::MessageHeader(MessageHeaderError::BadMessageLength {
        length: length.min(u16::MAX as usize) as u16,
    })
}

// Length fields are checked before they are written so that nothing is truncated.
fn encode_body(item: Message, dst: &mut BytesMut) -> Result<(), Error> {
    match item {
        Message::Open {
            version,
            as_num,
            hold_time,
            identifier,
            capabilities,
        } => {
            // one capability per optional parameter
            let params_length: usize = capabilities.iter().map(|cap| cap.len() + 4).sum();
            if params_length > u8::MAX as usize {
                return Err(Error::InvalidMessageField {
                    field: "capabilities",
                    msg_type: MessageType::Open,
                });
            }
            dst.put_u8(version);
            dst.put_u16(if as_num > u16::MAX as u32 {
                Message::AS_TRANS
            } else {
                as_num
            } as u16);
            dst.put_u16(hold_time);
            dst.put_slice(&identifier.octets());
            dst.put_u8(params_length as u8);
            for cap in capabilities.iter() {
                dst.put_u8(Message::OPTION_TYPE_CAPABILITIES);
                dst.put_u8((cap.len() + 2) as u8);
                cap.encode(dst);
            }
        }
        Message::Update {
            withdrawn_routes,
            attributes,
            nlri,
        } => {
            let withdrawn_length: usize = withdrawn_routes.iter().map(|p| p.len()).sum();
            let attributes_length: usize = attributes.iter().map(|a| a.encoded_len()).sum();
            let nlri_length: usize = nlri.iter().map(|p| p.len()).sum();
            let length = Message::MIN_UPDATE_LENGTH as usize
                + withdrawn_length
                + attributes_length
                + nlri_length;
            if length > Message::MAX_LENGTH as usize {
                return Err(too_long(length));
            }
            dst.put_u16(withdrawn_length as u16);
            for route in withdrawn_routes.iter() {
                route.encode(dst);
            }
            dst.put_u16(attributes_length as u16);
            for attr in attributes.iter() {
                attr.encode(dst)?;
            }
            for prefix in nlri.iter() {
                prefix.encode(dst);
            }
        }
        Message::Notification {
            code,
            subcode,
            data,
        } => {
            dst.put_u8(u8::from(code));
            dst.put_u8(subcode.map(u8::from).unwrap_or(0));
            dst.put_slice(&data);
        }
        Message::Keepalive => {}
    }
    Ok(())
}

/// Decode exactly one message. The declared length must match `bytes.len()`.
pub fn decode(bytes: &[u8]) -> Result<Message, Error> {
    if bytes.len() < Message::HEADER_LENGTH as usize {
        return Err(Error::MessageHeader(MessageHeaderError::BadMessageLength {
            length: bytes.len() as u16,
        }));
    }
    let length = check_header(bytes)?;
    if length as usize != bytes.len() {
        return Err(Error::MessageHeader(MessageHeaderError::BadMessageLength {
            length,
        }));
    }
    decode_msg(BytesMut::from(bytes))
}

pub fn encode(msg: Message) -> Result<BytesMut, Error> {
    let mut buf = BytesMut::new();
    Codec::new().encode(msg, &mut buf)?;
    Ok(buf)
}

// Validates marker and length bounds of a buffer holding at least a header.
fn check_header(buf: &[u8]) -> Result<u16, Error> {
    if buf[..16].iter().any(|b| *b != 0xff) {
        return Err(Error::MessageHeader(
            MessageHeaderError::ConnectionNotSynchronized,
        ));
    }
    let length = u16::from_be_bytes([buf[16], buf[17]]);
    if !(Message::HEADER_LENGTH..=Message::MAX_LENGTH).contains(&length) {
        return Err(Error::MessageHeader(MessageHeaderError::BadMessageLength {
            length,
        }));
    }
    Ok(length)
}

#[tracing::instrument(skip(frame))]
fn decode_msg(mut frame: BytesMut) -> Result<Message, Error> {
    frame.advance(16);
    let length = frame.get_u16();
    let message_type = MessageType::try_from(frame.get_u8())?;
    let min_length = match message_type {
        MessageType::Open => Message::MIN_OPEN_LENGTH,
        MessageType::Update => Message::MIN_UPDATE_LENGTH,
        MessageType::Notification => Message::MIN_NOTIFICATION_LENGTH,
        MessageType::Keepalive => Message::HEADER_LENGTH,
    };
    if length < min_length || (message_type == MessageType::Keepalive && length != min_length) {
        return Err(Error::MessageHeader(MessageHeaderError::BadMessageLength {
            length,
        }));
    }
    match message_type {
        MessageType::Open => decode_open(&mut frame, length),
        MessageType::Update => decode_update(&mut frame),
        MessageType::Notification => {
            let code = NotificationCode::from(frame.get_u8());
            let subcode = NotificationSubCode::from_with_code(frame.get_u8(), code);
            Ok(Message::Notification {
                code,
                subcode,
                data: frame.to_vec(),
            })
        }
        MessageType::Keepalive => Ok(Message::Keepalive),
    }
}

fn decode_open(src: &mut BytesMut, length: u16) -> Result<Message, Error> {
    let version = src.get_u8();
    if version != Message::VERSION {
        return Err(Error::OpenMessage(
            OpenMessageError::UnsupportedVersionNumber,
        ));
    }
    let asn = src.get_u16();
    let hold_time = src.get_u16();
    let identifier = Ipv4Addr::from(src.get_u32());
    let optional_parameters_length = src.get_u8() as usize;
    if optional_parameters_length != src.remaining() {
        return Err(Error::MessageHeader(MessageHeaderError::BadMessageLength {
            length,
        }));
    }

    let mut capabilities = Vec::new();
    while src.has_remaining() {
        if src.remaining() < 2 {
            return Err(Error::OpenMessage(OpenMessageError::Unspecific));
        }
        let option_type = src.get_u8();
        let option_length = src.get_u8() as usize;
        if src.remaining() < option_length {
            return Err(Error::OpenMessage(OpenMessageError::Unspecific));
        }
        let mut param = src.split_to(option_length);
        if option_type != Message::OPTION_TYPE_CAPABILITIES {
            return Err(Error::OpenMessage(
                OpenMessageError::UnsupportedOptionalParameter { param: option_type },
            ));
        }
        while param.has_remaining() {
            if param.remaining() < 2 {
                return Err(Error::OpenMessage(OpenMessageError::Unspecific));
            }
            let code = param.get_u8();
            let cap_length = param.get_u8();
            capabilities.push(Cap::decode(code, cap_length, &mut param)?);
        }
    }

    Ok(Message::Open {
        version,
        as_num: asn as u32,
        hold_time,
        identifier,
        capabilities,
    })
}

fn decode_update(src: &mut BytesMut) -> Result<Message, Error> {
    let withdrawn_routes_length = src.get_u16() as usize;
    // the total path attribute length field must still follow
    if src.remaining() < withdrawn_routes_length + 2 {
        return Err(Error::UpdateMessage(
            UpdateMessageError::MalformedAttributeList,
        ));
    }
    let mut withdrawn = src.split_to(withdrawn_routes_length);
    let mut withdrawn_routes = Vec::new();
    while withdrawn.has_remaining() {
        withdrawn_routes.push(Prefix::decode(&mut withdrawn)?);
    }

    let total_path_attribute_length = src.get_u16() as usize;
    if src.remaining() < total_path_attribute_length {
        return Err(Error::UpdateMessage(
            UpdateMessageError::MalformedAttributeList,
        ));
    }
    let mut attrs = src.split_to(total_path_attribute_length);
    let mut attributes = Vec::new();
    let mut attribute_set = HashSet::new();
    while attrs.has_remaining() {
        let attr = Attribute::decode(&mut attrs)?;
        if !attribute_set.insert(attr.code()) {
            return Err(Error::UpdateMessage(
                UpdateMessageError::MalformedAttributeList,
            ));
        }
        attributes.push(attr);
    }

    let mut nlri = Vec::new();
    while src.has_remaining() {
        nlri.push(Prefix::decode(src)?);
    }

    if !nlri.is_empty() {
        for code in [Attribute::ORIGIN, Attribute::AS_PATH, Attribute::NEXT_HOP] {
            if !attribute_set.contains(&code) {
                return Err(Error::UpdateMessage(
                    UpdateMessageError::MissingWellKnownAttribute(code),
                ));
            }
        }
    }

    Ok(Message::Update {
        withdrawn_routes,
        attributes,
        nlri,
    })
}
