use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    #[error("Invalid JWT: {0}")]
    InvalidJwt(String),

    #[error("User ID not found in JWT or headers")]
    UserIdNotFound,

    #[error("Unsupported authentication method")]
    UnsupportedAuthMethod,
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AuthError::InvalidJwt(err.to_string())
    }
}
