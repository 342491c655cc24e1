pub mod admin;
pub mod channel;
pub mod credentials;
pub mod error;
pub mod http;
pub mod listener;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod supervisor;

pub use admin::AdminState;
pub use channel::{union_terms, StreamChannel, StreamConnector};
pub use credentials::{CredentialSource, JsonFileCredentials, OwnerCredentials};
pub use error::StreamError;
pub use http::{HttpStreamChannel, HttpStreamConnector};
pub use listener::ArchiveListener;
#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockConnector;
pub use supervisor::{Supervisor, SupervisorCommand, TickOutcome};
