use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::*;
use crate::packet::message::Message;

// https://www.rfc-editor.org/rfc/rfc4271#section-4.3
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Attribute {
    Origin(Base, u8),
    ASPath(Base, Vec<ASSegment>),
    NextHop(Base, Ipv4Addr),
    MultiExitDisc(Base, u32),
    LocalPref(Base, u32),
    AtomicAggregate(Base),
    Aggregator(Base, u32, Ipv4Addr),
    Unsupported(Base, Vec<u8>),
}

impl Attribute {
    pub const ORIGIN: u8 = 1;
    pub const AS_PATH: u8 = 2;
    pub const NEXT_HOP: u8 = 3;
    pub const MULTI_EXIT_DISC: u8 = 4;
    pub const LOCAL_PREF: u8 = 5;
    pub const ATOMIC_AGGREGATE: u8 = 6;
    pub const AGGREGATOR: u8 = 7;

    pub const FLAG_OPTIONAL: u8 = 1 << 7;
    pub const FLAG_TRANSITIVE: u8 = 1 << 6;
    pub const FLAG_PARTIAL: u8 = 1 << 5;
    pub const FLAG_EXTENDED: u8 = 1 << 4;

    pub const ORIGIN_IGP: u8 = 0;
    pub const ORIGIN_EGP: u8 = 1;
    pub const ORIGIN_INCOMPLETE: u8 = 2;

    pub const AS_SET: u8 = 1;
    pub const AS_SEQUENCE: u8 = 2;
    pub const AS_CONFED_SEQUENCE: u8 = 3;
    pub const AS_CONFED_SET: u8 = 4;

    pub fn is_extended(&self) -> bool {
        self.get_base().is_extended()
    }

    fn get_base(&self) -> &Base {
        match self {
            Self::Origin(b, _) => b,
            Self::ASPath(b, _) => b,
            Self::NextHop(b, _) => b,
            Self::MultiExitDisc(b, _) => b,
            Self::LocalPref(b, _) => b,
            Self::AtomicAggregate(b) => b,
            Self::Aggregator(b, _, _) => b,
            Self::Unsupported(b, _) => b,
        }
    }

    pub fn code(&self) -> u8 {
        self.get_base().code
    }

    pub fn new_origin(val: u8) -> Result<Attribute, Error> {
        match val {
            Attribute::ORIGIN_IGP | Attribute::ORIGIN_EGP | Attribute::ORIGIN_INCOMPLETE => {
                Ok(Attribute::Origin(
                    Base::new(Attribute::FLAG_TRANSITIVE, Attribute::ORIGIN),
                    val,
                ))
            }
            _ => Err(Error::UpdateMessage(
                UpdateMessageError::InvalidOriginAttribute(val),
            )),
        }
    }

    pub fn new_as_path(segments: Vec<ASSegment>) -> Attribute {
        Attribute::ASPath(
            Base::new(Attribute::FLAG_TRANSITIVE, Attribute::AS_PATH),
            segments,
        )
    }

    pub fn new_nexthop(addr: Ipv4Addr) -> Attribute {
        Attribute::NextHop(
            Base::new(Attribute::FLAG_TRANSITIVE, Attribute::NEXT_HOP),
            addr,
        )
    }

    pub fn new_local_pref(val: u32) -> Attribute {
        Attribute::LocalPref(
            Base::new(Attribute::FLAG_TRANSITIVE, Attribute::LOCAL_PREF),
            val,
        )
    }

    pub fn new_med(val: u32) -> Attribute {
        Attribute::MultiExitDisc(
            Base::new(Attribute::FLAG_OPTIONAL, Attribute::MULTI_EXIT_DISC),
            val,
        )
    }

    /// Decode one attribute. `data` must be bounded by the total path attribute length.
    pub fn decode(data: &mut BytesMut) -> Result<Self, Error> {
        if data.remaining() < 3 {
            return Err(Error::UpdateMessage(
                UpdateMessageError::MalformedAttributeList,
            ));
        }
        let b = Base {
            flag: data.get_u8(),
            code: data.get_u8(),
        };
        let length = if b.is_extended() {
            if data.remaining() < 2 {
                return Err(Error::UpdateMessage(
                    UpdateMessageError::MalformedAttributeList,
                ));
            }
            data.get_u16() as usize
        } else {
            data.get_u8() as usize
        };
        if data.remaining() < length {
            return Err(Error::UpdateMessage(
                UpdateMessageError::MalformedAttributeList,
            ));
        }
        let mut value = data.split_to(length);
        if !b.validate_attribute_flag() {
            return Err(Error::UpdateMessage(
                UpdateMessageError::AttributeFlagsError {
                    code: b.code,
                    value: b.flag,
                },
            ));
        }
        let length_error = || {
            Error::UpdateMessage(UpdateMessageError::AttributeLengthError {
                code: b.code,
                length,
            })
        };
        match b.code {
            Self::ORIGIN => {
                if length != 1 {
                    return Err(length_error());
                }
                let val = value.get_u8();
                if val > Self::ORIGIN_INCOMPLETE {
                    return Err(Error::UpdateMessage(
                        UpdateMessageError::InvalidOriginAttribute(val),
                    ));
                }
                Ok(Self::Origin(b, val))
            }
            Self::AS_PATH => {
                let mut segments = Vec::new();
                while value.has_remaining() {
                    segments.push(ASSegment::decode(&mut value)?);
                }
                Ok(Self::ASPath(b, segments))
            }
            Self::NEXT_HOP => {
                if length != 4 {
                    return Err(length_error());
                }
                let addr = Ipv4Addr::from(value.get_u32());
                if addr.is_unspecified() || addr.is_multicast() || addr.is_broadcast() {
                    return Err(Error::UpdateMessage(
                        UpdateMessageError::InvalidNextHopAttribute(addr),
                    ));
                }
                Ok(Self::NextHop(b, addr))
            }
            Self::MULTI_EXIT_DISC => {
                if length != 4 {
                    return Err(length_error());
                }
                Ok(Self::MultiExitDisc(b, value.get_u32()))
            }
            Self::LOCAL_PREF => {
                if length != 4 {
                    return Err(length_error());
                }
                Ok(Self::LocalPref(b, value.get_u32()))
            }
            Self::ATOMIC_AGGREGATE => {
                if length != 0 {
                    return Err(length_error());
                }
                Ok(Self::AtomicAggregate(b))
            }
            Self::AGGREGATOR => {
                if length != 6 {
                    return Err(length_error());
                }
                let asn = value.get_u16() as u32;
                Ok(Self::Aggregator(b, asn, Ipv4Addr::from(value.get_u32())))
            }
            _ => {
                if !b.is_optional() {
                    return Err(Error::UpdateMessage(
                        UpdateMessageError::UnrecognizedWellknownAttribute(b.code),
                    ));
                }
                Ok(Self::Unsupported(b, value.to_vec()))
            }
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), Error> {
        let length = self.len();
        if length > u16::MAX as usize {
            return Err(Error::UpdateMessage(
                UpdateMessageError::AttributeLengthError {
                    code: self.code(),
                    length,
                },
            ));
        }
        if let Self::ASPath(_, segments) = self {
            if segments.iter().any(|seg| seg.segments.len() > u8::MAX as usize) {
                return Err(Error::UpdateMessage(UpdateMessageError::MalformedASPath));
            }
        }
        let mut base = *self.get_base();
        if length > u8::MAX as usize {
            base.flag |= Self::FLAG_EXTENDED;
        }
        dst.put_u8(base.flag);
        dst.put_u8(base.code);
        if base.is_extended() {
            dst.put_u16(length as u16);
        } else {
            dst.put_u8(length as u8);
        }
        match self {
            Self::Origin(_, val) => dst.put_u8(*val),
            Self::ASPath(_, segments) => {
                for seg in segments.iter() {
                    seg.encode(dst);
                }
            }
            Self::NextHop(_, addr) => dst.put_slice(&addr.octets()),
            Self::MultiExitDisc(_, val) => dst.put_u32(*val),
            Self::LocalPref(_, val) => dst.put_u32(*val),
            Self::AtomicAggregate(_) => {}
            Self::Aggregator(_, asn, addr) => {
                dst.put_u16(as2(*asn));
                dst.put_slice(&addr.octets());
            }
            Self::Unsupported(_, data) => dst.put_slice(data),
        }
        Ok(())
    }

    /// Length of the attribute value.
    pub fn len(&self) -> usize {
        match self {
            Self::Origin(_, _) => 1,
            Self::ASPath(_, segments) => segments.iter().map(|s| s.len()).sum(),
            Self::NextHop(_, _) => 4,
            Self::MultiExitDisc(_, _) => 4,
            Self::LocalPref(_, _) => 4,
            Self::AtomicAggregate(_) => 0,
            Self::Aggregator(_, _, _) => 6,
            Self::Unsupported(_, data) => data.len(),
        }
    }

    /// Length including the flag, code and length octets.
    pub fn encoded_len(&self) -> usize {
        let length = self.len();
        if self.is_extended() || length > u8::MAX as usize {
            4 + length
        } else {
            3 + length
        }
    }
}

fn as2(asn: u32) -> u16 {
    if asn > u16::MAX as u32 {
        Message::AS_TRANS as u16
    } else {
        asn as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Base {
    flag: u8,
    code: u8,
}

impl Base {
    pub fn new(flag: u8, code: u8) -> Self {
        Self { flag, code }
    }

    pub fn is_optional(&self) -> bool {
        self.flag & Attribute::FLAG_OPTIONAL != 0
    }

    pub fn is_transitive(&self) -> bool {
        self.flag & Attribute::FLAG_TRANSITIVE != 0
    }

    pub fn is_partial(&self) -> bool {
        self.flag & Attribute::FLAG_PARTIAL != 0
    }

    pub fn is_extended(&self) -> bool {
        self.flag & Attribute::FLAG_EXTENDED != 0
    }

    // https://www.rfc-editor.org/rfc/rfc4271#section-6.3
    fn validate_attribute_flag(&self) -> bool {
        match self.code {
            Attribute::ORIGIN
            | Attribute::AS_PATH
            | Attribute::NEXT_HOP
            | Attribute::LOCAL_PREF
            | Attribute::ATOMIC_AGGREGATE => {
                !self.is_optional() && self.is_transitive() && !self.is_partial()
            }
            Attribute::MULTI_EXIT_DISC => {
                self.is_optional() && !self.is_transitive() && !self.is_partial()
            }
            Attribute::AGGREGATOR => self.is_optional() && self.is_transitive(),
            // the partial bit is only meaningful on optional transitive attributes
            _ => !self.is_partial() || (self.is_optional() && self.is_transitive()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ASSegment {
    pub segment_type: u8,
    pub segments: Vec<u32>,
}

impl ASSegment {
    pub fn new(segment_type: u8, segments: Vec<u32>) -> Self {
        Self {
            segment_type,
            segments,
        }
    }

    fn decode(data: &mut BytesMut) -> Result<Self, Error> {
        if data.remaining() < 2 {
            return Err(Error::UpdateMessage(UpdateMessageError::MalformedASPath));
        }
        let segment_type = data.get_u8();
        if !(Attribute::AS_SET..=Attribute::AS_CONFED_SET).contains(&segment_type) {
            return Err(Error::UpdateMessage(UpdateMessageError::MalformedASPath));
        }
        let count = data.get_u8() as usize;
        if data.remaining() < count * 2 {
            return Err(Error::UpdateMessage(UpdateMessageError::MalformedASPath));
        }
        let segments = (0..count).map(|_| data.get_u16() as u32).collect();
        Ok(Self {
            segment_type,
            segments,
        })
    }

    // segment counts above 255 are rejected by Attribute::encode
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.segment_type);
        dst.put_u8(self.segments.len() as u8);
        for asn in self.segments.iter() {
            dst.put_u16(as2(*asn));
        }
    }

    fn len(&self) -> usize {
        2 + self.segments.len() * 2
    }
}
