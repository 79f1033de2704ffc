use super::AuthMethod;

/// Authenticated caller of a quota operation.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
    pub auth_method: AuthMethod,
    pub request_id: String,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, auth_method: AuthMethod) -> Self {
        Self {
            user_id: user_id.into(),
            auth_method,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = id;
        self
    }
}
