mod context;
mod error;
mod extractor;

pub use context::UserContext;
pub use error::AuthError;
pub use extractor::IdentityExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Jwt,
    Header,
}

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";
