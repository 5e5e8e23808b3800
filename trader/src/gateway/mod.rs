pub mod exchange_gateway;
pub use exchange_gateway::*;

pub mod credential_provider;
pub use credential_provider::*;

pub mod session;
pub use session::*;
