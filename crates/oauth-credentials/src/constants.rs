//! OAuth endpoint and protocol constants
//!
//! Google's public OAuth 2.0 endpoints are used as defaults when a key file
//! or caller does not name its own. Every credential stores the URIs it was
//! built with, so other providers only need to override them at construction.

use std::time::Duration;

/// Token endpoint for code exchange, refresh and assertion grants
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Revocation endpoint (takes the token as a `token` query parameter)
pub const GOOGLE_REVOKE_URI: &str = "https://oauth2.googleapis.com/revoke";

/// Authorization endpoint for the three-legged web-server flow
pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Userinfo endpoint used by the system check
pub const GOOGLE_USERINFO_URI: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Redirect URI for installed applications that display the code to the user
pub const OOB_CALLBACK_URN: &str = "urn:ietf:params:oauth:2.0:oob";

/// Grant type for signed-JWT assertion grants (RFC 7523)
pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime assumed for an access token when the token endpoint omits
/// `expires_in`. Override per call with `TokenResponse::expiry_from`.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Lifetime of a signed service-account assertion (the maximum Google accepts)
pub const MAX_ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);

/// Serialized form of `token_expiry`.
pub const EXPIRY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";
