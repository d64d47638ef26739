use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::{Error, UpdateMessageError};
use crate::packet::attribute::{ASSegment, Attribute};
use crate::packet::prefix::Prefix;

/// Identifies a peer session. Routes hold this instead of a reference to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

// Ordered by preference: IGP < EGP < INCOMPLETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

impl TryFrom<u8> for Origin {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            Attribute::ORIGIN_IGP => Ok(Self::Igp),
            Attribute::ORIGIN_EGP => Ok(Self::Egp),
            Attribute::ORIGIN_INCOMPLETE => Ok(Self::Incomplete),
            _ => Err(Error::UpdateMessage(
                UpdateMessageError::InvalidOriginAttribute(value),
            )),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Igp => write!(f, "IGP"),
            Self::Egp => write!(f, "EGP"),
            Self::Incomplete => write!(f, "INCOMPLETE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    AsSet,
    AsSequence,
    AsConfedSequence,
    AsConfedSet,
}

impl TryFrom<u8> for SegmentKind {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            Attribute::AS_SET => Ok(Self::AsSet),
            Attribute::AS_SEQUENCE => Ok(Self::AsSequence),
            Attribute::AS_CONFED_SEQUENCE => Ok(Self::AsConfedSequence),
            Attribute::AS_CONFED_SET => Ok(Self::AsConfedSet),
            _ => Err(Error::UpdateMessage(UpdateMessageError::MalformedASPath)),
        }
    }
}

impl From<SegmentKind> for u8 {
    fn from(kind: SegmentKind) -> Self {
        match kind {
            SegmentKind::AsSet => Attribute::AS_SET,
            SegmentKind::AsSequence => Attribute::AS_SEQUENCE,
            SegmentKind::AsConfedSequence => Attribute::AS_CONFED_SEQUENCE,
            SegmentKind::AsConfedSet => Attribute::AS_CONFED_SET,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    kind: SegmentKind,
    asns: Vec<u32>,
}

impl PathSegment {
    pub fn new(kind: SegmentKind, asns: Vec<u32>) -> Self {
        Self { kind, asns }
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn asns(&self) -> &[u32] {
        &self.asns
    }

    // https://www.rfc-editor.org/rfc/rfc4271#section-9.1.2.2
    // https://www.rfc-editor.org/rfc/rfc5065#section-5.3
    fn length(&self) -> usize {
        match self.kind {
            SegmentKind::AsSequence => self.asns.len(),
            SegmentKind::AsSet => usize::from(!self.asns.is_empty()),
            SegmentKind::AsConfedSequence | SegmentKind::AsConfedSet => 0,
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let asns = self
            .asns
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<String>>();
        match self.kind {
            SegmentKind::AsSequence => write!(f, "{}", asns.join(" ")),
            SegmentKind::AsSet => write!(f, "{{{}}}", asns.join(",")),
            SegmentKind::AsConfedSequence => write!(f, "({})", asns.join(" ")),
            SegmentKind::AsConfedSet => write!(f, "[{}]", asns.join(",")),
        }
    }
}

/// Immutable AS_PATH.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AsPath {
    segments: Vec<PathSegment>,
}

impl AsPath {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Path length used by best path selection. Confederation segments do not count
    /// and a non-empty AS_SET counts as one hop.
    pub fn length(&self) -> usize {
        self.segments.iter().map(|s| s.length()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn to_segments(&self) -> Vec<ASSegment> {
        self.segments
            .iter()
            .map(|s| ASSegment::new(s.kind.into(), s.asns.clone()))
            .collect()
    }
}

impl TryFrom<&[ASSegment]> for AsPath {
    type Error = Error;
    fn try_from(segments: &[ASSegment]) -> Result<Self, Self::Error> {
        let segments = segments
            .iter()
            .map(|s| {
                SegmentKind::try_from(s.segment_type)
                    .map(|kind| PathSegment::new(kind, s.segments.clone()))
            })
            .collect::<Result<Vec<PathSegment>, Error>>()?;
        Ok(Self { segments })
    }
}

impl fmt::Display for AsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let segments = self
            .segments
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<String>>();
        write!(f, "[{}]", segments.join(" "))
    }
}

/// A route received from a peer.
///
/// Equality compares the route attributes only. Which session a route came
/// from is tracked by the RIB holding it.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    session: SessionId,
    peer_id: Ipv4Addr,
    prefix: Ipv4Net,
    next_hop: Ipv4Addr,
    origin: Origin,
    as_path: AsPath,
    local_pref: u32,
    med: Option<u32>,
}

impl RouteEntry {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn peer_id(&self) -> Ipv4Addr {
        self.peer_id
    }

    pub fn prefix(&self) -> Ipv4Net {
        self.prefix
    }

    pub fn next_hop(&self) -> Ipv4Addr {
        self.next_hop
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn as_path(&self) -> &AsPath {
        &self.as_path
    }

    pub fn local_pref(&self) -> u32 {
        self.local_pref
    }

    pub fn med(&self) -> Option<u32> {
        self.med
    }
}

impl PartialEq for RouteEntry {
    fn eq(&self, other: &Self) -> bool {
        self.prefix == other.prefix
            && self.next_hop == other.next_hop
            && self.origin == other.origin
            && self.as_path == other.as_path
            && self.local_pref == other.local_pref
            && self.med == other.med
    }
}

impl Eq for RouteEntry {}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} via {} origin {} as_path {} local_pref {}",
            self.prefix, self.next_hop, self.origin, self.as_path, self.local_pref
        )?;
        if let Some(med) = self.med {
            write!(f, " med {}", med)?;
        }
        write!(f, " from {}({})", self.session, self.peer_id)
    }
}

#[derive(Debug)]
pub struct RouteEntryBuilder {
    session: SessionId,
    peer_id: Ipv4Addr,
    next_hop: Option<Ipv4Addr>,
    origin: Option<Origin>,
    as_path: Option<AsPath>,
    local_pref: u32,
    med: Option<u32>,
    nlri: Vec<Prefix>,
}

impl RouteEntryBuilder {
    pub const DEFAULT_LOCAL_PREF: u32 = 100;

    pub fn builder(session: SessionId, peer_id: Ipv4Addr) -> Self {
        Self {
            session,
            peer_id,
            next_hop: None,
            origin: None,
            as_path: None,
            local_pref: Self::DEFAULT_LOCAL_PREF,
            med: None,
            nlri: Vec::new(),
        }
    }

    pub fn next_hop(&mut self, next_hop: Ipv4Addr) -> &mut Self {
        self.next_hop = Some(next_hop);
        self
    }

    pub fn origin(&mut self, origin: Origin) -> &mut Self {
        self.origin = Some(origin);
        self
    }

    pub fn as_path(&mut self, as_path: AsPath) -> &mut Self {
        self.as_path = Some(as_path);
        self
    }

    pub fn local_pref(&mut self, val: u32) -> &mut Self {
        self.local_pref = val;
        self
    }

    pub fn med(&mut self, val: u32) -> &mut Self {
        self.med = Some(val);
        self
    }

    pub fn attr(&mut self, attr: Attribute) -> Result<&mut Self, Error> {
        match attr {
            Attribute::Origin(_, val) => Ok(self.origin(Origin::try_from(val)?)),
            Attribute::ASPath(_, segments) => {
                Ok(self.as_path(AsPath::try_from(segments.as_slice())?))
            }
            Attribute::NextHop(_, val) => Ok(self.next_hop(val)),
            Attribute::MultiExitDisc(_, val) => Ok(self.med(val)),
            Attribute::LocalPref(_, val) => Ok(self.local_pref(val)),
            Attribute::AtomicAggregate(_)
            | Attribute::Aggregator(_, _, _)
            | Attribute::Unsupported(_, _) => Ok(self),
        }
    }

    pub fn nlri(&mut self, mut nlri: Vec<Prefix>) -> &mut Self {
        self.nlri.append(&mut nlri);
        self
    }

    /// One entry per NLRI prefix, all sharing the attributes given so far.
    pub fn build(&self) -> Result<Vec<RouteEntry>, Error> {
        if self.nlri.is_empty() {
            return Ok(Vec::new());
        }
        let missing =
            |code| Error::UpdateMessage(UpdateMessageError::MissingWellKnownAttribute(code));
        let origin = self.origin.ok_or_else(|| missing(Attribute::ORIGIN))?;
        let as_path = self
            .as_path
            .clone()
            .ok_or_else(|| missing(Attribute::AS_PATH))?;
        let next_hop = self.next_hop.ok_or_else(|| missing(Attribute::NEXT_HOP))?;
        Ok(self
            .nlri
            .iter()
            .map(|p| RouteEntry {
                session: self.session,
                peer_id: self.peer_id,
                prefix: p.net(),
                next_hop,
                origin,
                as_path: as_path.clone(),
                local_pref: self.local_pref,
                med: self.med,
            })
            .collect())
    }
}
