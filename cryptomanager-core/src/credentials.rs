//! Exchange API credentials supplied by users

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One stored API key set for one exchange, as supplied by the user
#[derive(Clone, Serialize, Deserialize)]
pub struct UserExchangeAuthentication {
    /// Exchange name, e.g. "Binance"
    pub exchange: String,
    pub api_key: String,
    pub api_secret: String,
    /// Passphrase, only used by some exchanges
    pub api_pass: Option<String>,
    /// Exchange environment (live, testnet, ...); `None` means the default
    pub environment: Option<String>,
}

impl fmt::Debug for UserExchangeAuthentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserExchangeAuthentication")
            .field("exchange", &self.exchange)
            .field("api_key", &self.api_key)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

/// Credentials for a single exchange connection
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub key: String,
    pub secret: String,
    pub pass: Option<String>,
    pub environment: Option<String>,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("key", &self.key)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

impl From<&UserExchangeAuthentication> for ApiCredentials {
    fn from(auth: &UserExchangeAuthentication) -> Self {
        Self {
            key: auth.api_key.clone(),
            secret: auth.api_secret.clone(),
            pass: auth.api_pass.clone(),
            environment: auth.environment.clone(),
        }
    }
}

/// Per-exchange credentials handed to the exchange connection provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeCredentials(HashMap<String, ApiCredentials>);

impl ExchangeCredentials {
    /// Build credentials from a user's authentication set
    ///
    /// When an exchange appears more than once the last entry wins.
    pub fn from_authentications(auths: &[UserExchangeAuthentication]) -> Self {
        Self(
            auths
                .iter()
                .map(|auth| (auth.exchange.clone(), ApiCredentials::from(auth)))
                .collect(),
        )
    }

    pub fn get(&self, exchange: &str) -> Option<&ApiCredentials> {
        self.0.get(exchange)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(exchange: &str, key: &str) -> UserExchangeAuthentication {
        UserExchangeAuthentication {
            exchange: exchange.to_string(),
            api_key: key.to_string(),
            api_secret: "secret".to_string(),
            api_pass: None,
            environment: Some("live".to_string()),
        }
    }

    #[test]
    fn test_credentials_from_authentications() {
        let creds = ExchangeCredentials::from_authentications(&[
            auth("Binance", "k1"),
            auth("Kraken", "k2"),
        ]);

        assert_eq!(creds.get("Binance").unwrap().key, "k1");
        assert_eq!(creds.get("Kraken").unwrap().key, "k2");
        assert_eq!(creds.get("Binance").unwrap().environment.as_deref(), Some("live"));
        assert!(creds.get("OKX").is_none());
    }

    #[test]
    fn test_debug_hides_secret() {
        let rendered = format!("{:?}", auth("Binance", "k1"));
        assert!(rendered.contains("k1"));
        assert!(!rendered.contains("secret"));
    }
}
