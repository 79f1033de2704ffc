use super::{AuthError, AuthMethod, UserContext, AUTHORIZATION_HEADER, USER_ID_HEADER};
use crate::config::{JwtAlgorithm, UploadQuotaConfig};
use anyhow::Context;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JwtClaims {
    sub: Option<String>,
    uid: Option<String>,
    iss: Option<String>,
    aud: Option<String>,
    exp: Option<usize>,
}

/// Resolves the caller identity of a request. With JWT disabled the
/// service runs in testing mode and trusts the `X-User-ID` header.
pub struct IdentityExtractor {
    enable_jwt: bool,
    jwt_decoding_key: Option<DecodingKey>,
    jwt_validation: Option<Validation>,
}

impl IdentityExtractor {
    pub fn new(config: &UploadQuotaConfig) -> anyhow::Result<Self> {
        let (jwt_decoding_key, jwt_validation) = if config.enable_jwt {
            let algorithm = match config.jwt_algorithm {
                JwtAlgorithm::HS256 => Algorithm::HS256,
                JwtAlgorithm::HS384 => Algorithm::HS384,
                JwtAlgorithm::HS512 => Algorithm::HS512,
            };

            let secret = config
                .jwt_secret
                .as_ref()
                .context("JWT secret missing for HMAC algorithm")?;
            let decoding_key = DecodingKey::from_secret(secret.as_bytes());

            let mut validation = Validation::new(algorithm);
            validation.algorithms = vec![algorithm];

            if let Some(issuer) = &config.jwt_issuer {
                validation.set_issuer(&[issuer]);
            }

            if let Some(audience) = &config.jwt_audience {
                validation.set_audience(&[audience]);
            }

            (Some(decoding_key), Some(validation))
        } else {
            (None, None)
        };

        Ok(Self {
            enable_jwt: config.enable_jwt,
            jwt_decoding_key,
            jwt_validation,
        })
    }

    pub fn extract_from_jwt(&self, token: &str) -> Result<UserContext, AuthError> {
        let decoding_key = self
            .jwt_decoding_key
            .as_ref()
            .ok_or(AuthError::UnsupportedAuthMethod)?;

        let validation = self
            .jwt_validation
            .as_ref()
            .ok_or(AuthError::UnsupportedAuthMethod)?;

        let token_data = decode::<JwtClaims>(token, decoding_key, validation)?;
        let claims = token_data.claims;

        let user_id = claims
            .sub
            .or(claims.uid)
            .filter(|id| !id.trim().is_empty())
            .ok_or(AuthError::UserIdNotFound)?;

        debug!(user_id = %user_id, "extracted user ID from JWT");
        Ok(UserContext::new(user_id, AuthMethod::Jwt))
    }

    pub fn extract_from_request(&self, headers: &HeaderMap) -> Result<UserContext, AuthError> {
        if self.enable_jwt {
            let auth_header = headers
                .get(AUTHORIZATION_HEADER)
                .ok_or(AuthError::MissingAuthHeader)?;
            let token = auth_header
                .to_str()
                .ok()
                .and_then(|value| value.strip_prefix("Bearer "))
                .ok_or(AuthError::UnsupportedAuthMethod)?;

            return self.extract_from_jwt(token.trim()).map_err(|err| {
                warn!(error = %err, "rejected bearer token");
                err
            });
        }

        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::UserIdNotFound)?;

        debug!(user_id = %user_id, "using X-User-ID header (testing mode)");
        Ok(UserContext::new(user_id, AuthMethod::Header))
    }
}
