pub mod error;
pub mod handler;
pub mod registry;
pub mod router;
pub mod server;
pub mod sse;
pub mod transport;
pub mod wire;

pub use error::RouteError;
pub use registry::SessionRegistry;
pub use router::MessageRouter;
pub use server::{build_router, start, AppState, GatewayConfig, ServerError, ServerHandle};
pub use transport::{Connection, InboundHandler, InboundMessage, Transport};
