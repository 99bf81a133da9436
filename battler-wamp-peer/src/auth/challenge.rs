use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use battler_wamp_values::Dictionary;

use crate::message::message::ChallengeMessage;

/// An authentication challenge sent by the router during the handshake.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// The authentication method the router selected.
    pub auth_method: String,
    /// Method-specific challenge data.
    pub extra: Dictionary,
}

impl From<ChallengeMessage> for Challenge {
    fn from(value: ChallengeMessage) -> Self {
        Self {
            auth_method: value.auth_method,
            extra: value.extra,
        }
    }
}

/// Answers authentication challenges with a signature.
///
/// An error aborts the session being established.
#[async_trait]
pub trait ChallengeHandler: Send + Sync {
    async fn respond(&self, challenge: Challenge) -> Result<String>;
}

#[async_trait]
impl<F, Fut> ChallengeHandler for F
where
    F: Fn(Challenge) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    async fn respond(&self, challenge: Challenge) -> Result<String> {
        self(challenge).await
    }
}
