use log::{info, warn};

use crate::error::{Result, SentinelError};

/// Secret half of a Jenkins basic-auth pair.
#[derive(Clone)]
pub enum Secret {
    Token(String),
    Password(String),
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(***)"),
            Self::Password(_) => f.write_str("Password(***)"),
        }
    }
}

/// Jenkins credentials. API tokens are preferred over passwords.
#[derive(Debug, Clone)]
pub struct Credentials {
    username: String,
    secret: Secret,
}

impl Credentials {
    /// Picks the token when one is configured and falls back to the password
    /// with a warning otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if neither a token nor a password is available.
    pub fn resolve(username: &str, token: Option<&str>, password: Option<&str>) -> Result<Self> {
        let token = token.filter(|t| !t.is_empty());
        let password = password.filter(|p| !p.is_empty());

        let secret = match (token, password) {
            (Some(token), _) => {
                info!("Using Jenkins API token authentication for user {username}");
                Secret::Token(token.to_string())
            }
            (None, Some(password)) => {
                warn!(
                    "Jenkins API token is missing for user {username}, falling back to password authentication. \
                     Generate an API token in Jenkins and configure it instead."
                );
                Secret::Password(password.to_string())
            }
            (None, None) => {
                return Err(SentinelError::Config(format!(
                    "no Jenkins token or password configured for user {username}"
                )))
            }
        };

        Ok(Self {
            username: username.to_string(),
            secret,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &str {
        match &self.secret {
            Secret::Token(value) | Secret::Password(value) => value,
        }
    }

    pub fn uses_token(&self) -> bool {
        matches!(self.secret, Secret::Token(_))
    }
}
