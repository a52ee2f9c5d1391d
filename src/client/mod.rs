pub mod backoff;
pub mod connection;
pub mod overrides;
pub mod token_client;
pub mod transport;

pub use backoff::ReconnectBackoff;
pub use connection::{ConnectionState, LiveConnection};
pub use overrides::OptimisticOverrides;
pub use token_client::TokenDataClient;
pub use transport::{HttpLookupTransport, LookupTransport, UnifiedFallback};
