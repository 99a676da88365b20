//! figview asset gateway.
//!
//! Every outbound request the viewer makes passes through here. The gateway
//! checks the target against a host allowlist, decides which credential (if
//! any) may travel upstream, and hands back raw bytes or parsed JSON.
//!
//! [`Gateway`] is the in-process [`AssetFetcher`](figview_core::fetch::AssetFetcher);
//! [`RemoteGateway`] talks to a running [`GatewayServer`] over HTTP.

pub mod config;
pub mod credentials;
mod gateway;
pub mod policy;
mod remote;
mod routes;
pub mod session;
pub mod upstream;

pub use config::{ConfigError, GatewayConfig};
pub use gateway::Gateway;
pub use policy::HostPolicy;
pub use remote::RemoteGateway;
pub use routes::GatewayServer;
pub use session::{SessionStore, session_cookie};
pub use upstream::{ReqwestUpstream, StaticUpstream, Upstream, UpstreamRequest, UpstreamResponse};
