//! Shared-token authorization for the registry room.

use async_trait::async_trait;
use atrium_core::{AuthError, AuthMiddleware};
use serde_json::{json, Value as JsonValue};

/// Admits instances that present the registry's shared token as their
/// ticket. Actors carry no identity payload; the registry only cares
/// about what they push.
pub struct RegistryAuthMiddleware {
    token: String,
    room_id: String,
}

impl RegistryAuthMiddleware {
    pub fn new(token: String, room_id: String) -> Self {
        Self { token, room_id }
    }
}

#[async_trait]
impl AuthMiddleware for RegistryAuthMiddleware {
    async fn get_room_id(&self, ticket: &str) -> Result<String, AuthError> {
        if ticket != self.token {
            return Err(AuthError::InvalidTicket("invalid registry token".into()));
        }
        Ok(self.room_id.clone())
    }

    async fn extract(&self, ticket: &str) -> Result<JsonValue, AuthError> {
        if ticket != self.token {
            return Err(AuthError::InvalidTicket("invalid registry token".into()));
        }
        Ok(json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_the_shared_token_only() {
        let auth = RegistryAuthMiddleware::new("secret".into(), "registry".into());
        assert_eq!(auth.get_room_id("secret").await.unwrap(), "registry");
        assert!(auth.get_room_id("guess").await.is_err());
        assert!(auth.extract("guess").await.is_err());
        assert_eq!(auth.extract("secret").await.unwrap(), json!({}));
    }
}
