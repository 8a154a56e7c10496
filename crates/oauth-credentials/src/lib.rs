//! OAuth 2.0 credential management
//!
//! Acquires, refreshes, persists and revokes access/refresh token pairs for
//! service accounts, three-legged user flows and bare access tokens. The
//! crate never opens sockets itself: every network call goes through an
//! [`HttpRequester`], which `reqwest::Client` implements.
//!
//! Typical use:
//! 1. Build [`Credentials`] from a key file, an authorized-user file or
//!    [`WebServerFlow::step2_exchange`]
//! 2. Pair them with a [`Storage`] in [`StoredCredentials`] to persist refreshes
//! 3. Wrap the HTTP client in [`AuthorizedHttp`] so requests carry a valid
//!    token and a 401 triggers one refresh-and-retry

pub mod assertion;
pub mod codec;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod flow;
pub mod helpers;
pub mod http;
pub mod pkce;
pub mod service_account;
pub mod storage;
pub mod stored;
pub mod token;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use assertion::{AssertionGenerator, AssertionGrant};
pub use codec::{AssertionDecoder, CredentialClass, CredentialCodec};
pub use credentials::{CredentialKind, Credentials, TokenState};
pub use error::{Error, Result};
pub use flow::WebServerFlow;
pub use http::{Body, HttpRequest, HttpRequester, HttpResponse};
pub use service_account::ServiceAccount;
pub use storage::{CredentialTable, FileStorage, KeyedStorage, MemoryTable, Storage, StorageLock};
pub use stored::{SharedCredentials, StoredCredentials};
pub use token::TokenResponse;
pub use transport::AuthorizedHttp;
