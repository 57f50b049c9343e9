//! Backend authentication constants
//!
//! These must match the REST backend's routes and header conventions.

/// Refresh endpoint path, relative to the API base URL
pub const REFRESH_TOKEN_PATH: &str = "/auth/refresh-token";

/// Scheme prefix for the Authorization header value
pub const BEARER_PREFIX: &str = "Bearer ";

/// Route the navigation collaborator is sent to on session teardown
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

/// Error code some backends place in a non-401 body to signal expired auth
pub const UNAUTHENTICATED_CODE: &str = "UNAUTHENTICATED";
