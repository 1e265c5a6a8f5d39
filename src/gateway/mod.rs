//! Gateway server implementation

pub mod auth;
mod context;
pub mod proxy;
pub mod rewrite;
mod router;
mod server;

pub use auth::{AuthenticatedClient, ResolvedAuthConfig, auth_middleware};
pub use context::{EventContext, Operation};
pub use proxy::{CsarProxy, OutboundBody};
pub use router::{AppState, create_router};
pub use server::Gateway;
