use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;
use base64::Engine;
use battler_wamp_values::Value;
use hmac::{
    Hmac,
    Mac,
};
use sha2::Sha256;

use crate::auth::challenge::{
    Challenge,
    ChallengeHandler,
};

const DEFAULT_ITERATIONS: u64 = 1000;
const DEFAULT_KEY_LENGTH: u64 = 32;

/// A [`ChallengeHandler`] for WAMP Challenge-Response Authentication (`wampcra`).
///
/// Salted challenges derive the signing key from the secret with PBKDF2-HMAC-SHA256.
#[derive(Debug, Clone)]
pub struct WampCraChallengeHandler {
    secret: String,
}

impl WampCraChallengeHandler {
    pub fn new<S>(secret: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            secret: secret.into(),
        }
    }

    fn key(&self, challenge: &Challenge) -> Result<Vec<u8>> {
        let salt = match challenge.extra.get("salt").and_then(Value::string) {
            Some(salt) => salt,
            None => return Ok(self.secret.as_bytes().to_vec()),
        };
        let iterations = challenge
            .extra
            .get("iterations")
            .and_then(Value::integer)
            .unwrap_or(DEFAULT_ITERATIONS);
        let key_length = challenge
            .extra
            .get("keylen")
            .and_then(Value::integer)
            .unwrap_or(DEFAULT_KEY_LENGTH);
        let iterations = u32::try_from(iterations).map_err(Error::new)?;
        let key_length = usize::try_from(key_length).map_err(Error::new)?;
        Ok(derive_key(self.secret.as_bytes(), salt.as_bytes(), iterations, key_length).into_bytes())
    }

    /// Signs a challenge string.
    pub fn sign(&self, challenge: &Challenge) -> Result<String> {
        let data = challenge
            .extra
            .get("challenge")
            .and_then(Value::string)
            .ok_or_else(|| Error::msg("wampcra challenge is missing challenge string"))?;
        let key = self.key(challenge)?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&key)
            .map_err(|_| Error::msg("invalid wampcra key length"))?;
        mac.update(data.as_bytes());
        Ok(base64::prelude::BASE64_STANDARD.encode(mac.finalize().into_bytes()))
    }
}

/// Derives a salted key, encoded as base64 like the secret it replaces.
fn derive_key(secret: &[u8], salt: &[u8], iterations: u32, key_length: usize) -> String {
    let mut key = vec![0u8; key_length];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret, salt, iterations, &mut key);
    base64::prelude::BASE64_STANDARD.encode(key)
}

#[async_trait]
impl ChallengeHandler for WampCraChallengeHandler {
    async fn respond(&self, challenge: Challenge) -> Result<String> {
        if challenge.auth_method != "wampcra" {
            return Err(Error::msg(format!(
                "unsupported authentication method: {}",
                challenge.auth_method
            )));
        }
        self.sign(&challenge)
    }
}
