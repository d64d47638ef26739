use std::fmt;
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, BytesMut};
use ipnet::Ipv4Net;

use crate::error::*;

/// An IPv4 prefix in the packed NLRI encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Prefix {
    inner: Ipv4Net,
}

impl Prefix {
    pub const MAX_LENGTH: u8 = 32;

    pub fn new(prefix: Ipv4Net) -> Self {
        Self {
            inner: prefix.trunc(),
        }
    }

    pub fn decode(data: &mut BytesMut) -> Result<Self, Error> {
        if !data.has_remaining() {
            return Err(Error::UpdateMessage(UpdateMessageError::InvalidNetworkField));
        }
        let length = data.get_u8();
        if length > Self::MAX_LENGTH {
            return Err(Error::UpdateMessage(UpdateMessageError::InvalidNetworkField));
        }
        let n = prefix_bytes_len(length as usize);
        if data.remaining() < n {
            return Err(Error::UpdateMessage(UpdateMessageError::InvalidNetworkField));
        }
        let mut b = [0u8; 4];
        data.copy_to_slice(&mut b[..n]);
        let inner = Ipv4Net::new(Ipv4Addr::from(b), length)
            .map_err(|_| Error::UpdateMessage(UpdateMessageError::InvalidNetworkField))?;
        Ok(Self::new(inner))
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let length = self.inner.prefix_len();
        dst.put_u8(length);
        let oct = self.inner.addr().octets();
        dst.put_slice(&oct[..prefix_bytes_len(length as usize)]);
    }

    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        1 + prefix_bytes_len(self.inner.prefix_len() as usize)
    }

    pub fn net(&self) -> Ipv4Net {
        self.inner
    }
}

fn prefix_bytes_len(prefix_len: usize) -> usize {
    match prefix_len % 8 {
        0 => prefix_len / 8,
        _ => 1 + (prefix_len / 8),
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl From<Ipv4Net> for Prefix {
    fn from(pref: Ipv4Net) -> Self {
        Self::new(pref)
    }
}

impl From<Prefix> for Ipv4Net {
    fn from(val: Prefix) -> Self {
        val.inner
    }
}

impl From<&Prefix> for Ipv4Net {
    fn from(val: &Prefix) -> Self {
        val.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;

    #[rstest(
		input,
		expected,
		case(vec![0x18, 0x0a, 0x02, 0x00], "10.2.0.0/24"),
		case(vec![0x08, 0x1e], "30.0.0.0/8"),
		case(vec![0x00], "0.0.0.0/0"),
		case(vec![0x20, 0x32, 0x00, 0x00, 0x00], "50.0.0.0/32"),
		case(vec![0x11, 0x0a, 0x00, 0x80], "10.0.128.0/17"),
	)]
    fn works_prefix_decode(input: Vec<u8>, expected: &str) {
        let mut buf = BytesMut::from(input.as_slice());
        let pref = Prefix::decode(&mut buf).unwrap();
        assert_eq!(Prefix::new(expected.parse().unwrap()), pref);
        assert_eq!(0, buf.remaining());

        let mut out = BytesMut::new();
        pref.encode(&mut out);
        assert_eq!(input, out.to_vec());
        assert_eq!(input.len(), pref.len());
    }

    #[rstest(
        input,
        case(vec![]),
        case(vec![0x21, 0x0a, 0x00, 0x00, 0x00, 0x00]),
        case(vec![0x18, 0x0a, 0x00]),
        case(vec![0x20]),
    )]
    fn failed_prefix_decode(input: Vec<u8>) {
        let mut buf = BytesMut::from(input.as_slice());
        match Prefix::decode(&mut buf) {
            Ok(_) => panic!("should fail"),
            Err(e) => match e {
                Error::UpdateMessage(UpdateMessageError::InvalidNetworkField) => {}
                _ => panic!("unexpected error {e:?}"),
            },
        }
    }

    #[test]
    fn works_prefix_new_truncates_host_bits() {
        let pref = Prefix::new("10.1.2.3/16".parse().unwrap());
        assert_eq!("10.1.0.0/16", pref.to_string());
    }
}
