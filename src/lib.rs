pub mod config;
pub mod error;
pub(crate) mod event;
pub mod family;
pub mod packet;
pub mod path;
pub mod peer;
pub mod rib;
pub mod server;
pub mod trace;

pub use config::{Config, NeighborConfig};
pub use error::Error;
pub use path::{AsPath, Origin, RouteEntry, SessionId};
pub use peer::fsm::State;
pub use peer::peer::{MessageCounter, SessionInfo};
pub use rib::{RouteUpdate, RouteUpdateKind};
pub use server::{RouteListener, SessionManager};
