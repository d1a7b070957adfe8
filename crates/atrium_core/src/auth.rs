//! Pluggable authorization capability.

use crate::error::AuthError;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Resolves opaque connect-time tickets into a target room and an actor
/// data payload.
///
/// Implementations own the credential scheme entirely (shared token, JWT,
/// database lookup); the core only depends on this contract. Both calls
/// may suspend - [`AuthMiddleware::extract`] is the single asynchronous
/// boundary inside the actor authorization handshake.
#[async_trait]
pub trait AuthMiddleware: Send + Sync {
    /// Resolves the room a ticket grants access to.
    async fn get_room_id(&self, ticket: &str) -> Result<String, AuthError>;

    /// Extracts the identity payload stored on the actor for its lifetime.
    async fn extract(&self, ticket: &str) -> Result<JsonValue, AuthError>;
}
