//! Request side of the data layer: executor, transports, credentials and the
//! coordinating client that ties requests to the cache.

pub mod client;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod transport;
pub mod types;

pub use client::{DataClient, MutationResult};
pub use credentials::{CredentialSource, EnvToken, FirstOf, StaticToken, TokenFile};
pub use error::ApiError;
pub use executor::Executor;
pub use transport::{ReqwestTransport, Transport};
pub use types::{ApiRequest, MutationReceipt, Payload, TransportRequest, TransportResponse};
