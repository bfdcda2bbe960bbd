//! Authentication hook for validating user identity.
//!
//! Teamup doesn't verify credentials itself. The server hands the
//! handshake token to an [`Authenticator`] and trusts the [`Identity`]
//! that comes back, including whether the user is a teammate and for
//! which game.

use teamup_protocol::{Identity, UserId};

use crate::SessionError;

/// Validates a client's auth token and returns their identity.
///
/// `Send + Sync + 'static` because one authenticator is shared by every
/// connection task for the lifetime of the server.
pub trait Authenticator: Send + Sync + 'static {
    /// Validates the given token and returns the verified identity.
    ///
    /// # Errors
    /// [`SessionError::AuthFailed`] when the token is invalid or expired.
    fn authenticate(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Identity, SessionError>> + Send;
}

/// Development authenticator: the token *is* the identity.
///
/// - `"42"` → client `U-42`
/// - `"7:valorant"` → teammate `U-7` for `valorant`
///
/// Never use this in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevAuthenticator;

impl Authenticator for DevAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, SessionError> {
        let (id, game) = match token.split_once(':') {
            Some((id, game)) => (id, Some(game)),
            None => (token, None),
        };

        let user_id = id
            .trim()
            .parse::<u64>()
            .map(UserId)
            .map_err(|_| SessionError::AuthFailed("token must start with a numeric id".into()))?;

        match game {
            Some(game) if game.is_empty() => {
                Err(SessionError::AuthFailed("teammate token has an empty game".into()))
            }
            Some(game) => Ok(Identity::teammate(user_id, game)),
            None => Ok(Identity::client(user_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dev_authenticator_numeric_token_is_client() {
        let identity = DevAuthenticator.authenticate("42").await.unwrap();
        assert_eq!(identity, Identity::client(UserId(42)));
    }

    #[tokio::test]
    async fn test_dev_authenticator_game_suffix_is_teammate() {
        let identity = DevAuthenticator.authenticate("7:valorant").await.unwrap();
        assert!(identity.is_teammate());
        assert_eq!(identity.teammate_game(), Some("valorant"));
    }

    #[tokio::test]
    async fn test_dev_authenticator_rejects_garbage() {
        assert!(matches!(
            DevAuthenticator.authenticate("alice").await,
            Err(SessionError::AuthFailed(_))
        ));
        assert!(matches!(
            DevAuthenticator.authenticate("7:").await,
            Err(SessionError::AuthFailed(_))
        ));
    }
}
