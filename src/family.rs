use std::fmt;

// https://www.iana.org/assignments/address-family-numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressFamily {
    pub afi: Afi,
    pub safi: Safi,
}

impl AddressFamily {
    pub fn new(afi: u16, safi: u8) -> Result<Self, &'static str> {
        Ok(Self {
            afi: Afi::try_from(afi)?,
            safi: Safi::try_from(safi)?,
        })
    }

    pub fn ipv4_unicast() -> Self {
        Self {
            afi: Afi::IPv4,
            safi: Safi::Unicast,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.afi, self.safi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Afi {
    IPv4 = 1,
    IPv6 = 2,
}

impl TryFrom<u16> for Afi {
    type Error = &'static str;
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::IPv4),
            2 => Ok(Self::IPv6),
            _ => Err("invalid AFI"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Safi {
    Unicast = 1,
    Multicast = 2,
}

impl TryFrom<u8> for Safi {
    type Error = &'static str;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Unicast),
            2 => Ok(Self::Multicast),
            _ => Err("unsupported SAFI number"),
        }
    }
}
