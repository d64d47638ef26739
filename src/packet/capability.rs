use bytes::{Buf, BufMut, BytesMut};

use crate::error::*;
use crate::family::AddressFamily;

#[derive(Debug, Clone, PartialEq)]
pub enum Cap {
    MultiProtocol(AddressFamily), // rfc 2858 // 1
    RouteRefresh,                 // rfc 2918 // 2
    FourOctetASNumber(u32),       // rfc 6793 // 65
    Unsupported(u8, Vec<u8>),
}

impl Cap {
    pub const MULTI_PROTOCOL: u8 = 1;
    pub const ROUTE_REFRESH: u8 = 2;
    pub const FOUR_OCTET_AS_NUMBER: u8 = 65;

    /// Decode the value of one capability. `data` must start at the value.
    pub fn decode(code: u8, length: u8, data: &mut BytesMut) -> Result<Self, Error> {
        let length = length as usize;
        if data.remaining() < length {
            return Err(Error::OpenMessage(OpenMessageError::Unspecific));
        }
        let mut value = data.split_to(length);
        match (code, length) {
            (Self::MULTI_PROTOCOL, 4) => {
                let afi = value.get_u16();
                let _reserved = value.get_u8();
                let safi = value.get_u8();
                match AddressFamily::new(afi, safi) {
                    Ok(family) => Ok(Self::MultiProtocol(family)),
                    Err(_) => {
                        // families we do not know are kept opaque
                        let mut raw = Vec::with_capacity(4);
                        raw.put_u16(afi);
                        raw.put_u8(0);
                        raw.put_u8(safi);
                        Ok(Self::Unsupported(code, raw))
                    }
                }
            }
            (Self::ROUTE_REFRESH, 0) => Ok(Self::RouteRefresh),
            (Self::FOUR_OCTET_AS_NUMBER, 4) => Ok(Self::FourOctetASNumber(value.get_u32())),
            (Self::MULTI_PROTOCOL, _)
            | (Self::ROUTE_REFRESH, _)
            | (Self::FOUR_OCTET_AS_NUMBER, _) => {
                Err(Error::OpenMessage(OpenMessageError::Unspecific))
            }
            _ => Ok(Self::Unsupported(code, value.to_vec())),
        }
    }

    /// Encode code, length and value.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.code());
        dst.put_u8(self.len() as u8);
        match self {
            Self::MultiProtocol(family) => {
                dst.put_u16(family.afi as u16);
                dst.put_u8(0);
                dst.put_u8(family.safi as u8);
            }
            Self::RouteRefresh => {}
            Self::FourOctetASNumber(asn) => dst.put_u32(*asn),
            Self::Unsupported(_, data) => dst.put_slice(data),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::MultiProtocol(_) => Self::MULTI_PROTOCOL,
            Self::RouteRefresh => Self::ROUTE_REFRESH,
            Self::FourOctetASNumber(_) => Self::FOUR_OCTET_AS_NUMBER,
            Self::Unsupported(code, _) => *code,
        }
    }

    /// Length of the value, excluding the code and length octets.
    pub fn len(&self) -> usize {
        match self {
            Self::MultiProtocol(_) => 4,
            Self::RouteRefresh => 0,
            Self::FourOctetASNumber(_) => 4,
            Self::Unsupported(_, data) => data.len(),
        }
    }
}
