// duskswitch-elevate: privileged elevation transport for duskswitch.
//
// Three pieces: the wire protocol spoken with the companion service, the
// companion service itself (server), and the client-side host abstraction
// plus the superuser shell runner.

pub mod error;
pub mod host;
pub mod protocol;
pub mod service;
pub mod superuser;

pub use error::Error;
pub use host::{
    AuthorizationOutcome, ElevationHost, ServiceEndpoint, SocketEndpoint, SocketHost,
    SocketHostConfig,
};
pub use protocol::{INTERFACE_DESCRIPTOR, Reply, Request};
pub use service::CompanionService;
pub use superuser::SuperuserShell;
