//! Authentication providers
//!
//! The session treats every backend polymorphically through one contract:
//! credentials in, a principal (or failure) out. Which backend answers is a
//! configuration choice, never a conditional in the core.

use async_trait::async_trait;
use base64::Engine;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{BridgeError, Result};

/// Credentials presented by a client
#[derive(Debug, Clone)]
pub enum Credentials {
    Anonymous,
    Password { username: String, password: String },
}

/// Authenticated identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// `None` for an anonymous session
    pub name: Option<String>,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self { name: None }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Author string used when this principal commits
    pub fn author(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }
}

/// Authentication provider trait
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Wire mechanisms this provider supports (`ANONYMOUS`, `PLAIN`)
    fn mechanisms(&self) -> Vec<&'static str>;

    /// Authenticate the given credentials
    async fn authenticate(&self, credentials: &Credentials) -> Result<Principal>;
}

/// Allows anonymous access only
#[derive(Clone, Default)]
pub struct AnonymousAuthProvider;

#[async_trait]
impl AuthProvider for AnonymousAuthProvider {
    fn mechanisms(&self) -> Vec<&'static str> {
        vec!["ANONYMOUS"]
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Principal> {
        match credentials {
            Credentials::Anonymous => Ok(Principal::anonymous()),
            Credentials::Password { username, .. } => Ok(Principal::named(username.clone())),
        }
    }
}

/// Htpasswd-style password file provider
///
/// Supported hash formats per line (`username:hash`):
/// - `{SHA}` (SHA-1 + base64)
/// - plain text (files generated with `htpasswd -p`)
pub struct PasswordFileAuthProvider {
    users: HashMap<String, String>,
}

impl PasswordFileAuthProvider {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_content(&content)
    }

    pub fn from_content(content: &str) -> Result<Self> {
        let mut users = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((username, hash)) = line.split_once(':') else {
                return Err(BridgeError::AuthFailure(format!(
                    "invalid password file line: {}",
                    line
                )));
            };
            let (username, hash) = (username.trim(), hash.trim());
            if username.is_empty() || hash.is_empty() {
                return Err(BridgeError::AuthFailure(
                    "invalid password file line (empty username or hash)".into(),
                ));
            }
            users.insert(username.to_string(), hash.to_string());
        }
        if users.is_empty() {
            return Err(BridgeError::AuthFailure(
                "no valid users found in password file".into(),
            ));
        }
        Ok(Self { users })
    }

    fn verify_sha1(hash: &str, password: &str) -> bool {
        use sha1::{Digest, Sha1};
        let expected = &hash[5..]; // skip {SHA}
        let mut hasher = Sha1::new();
        hasher.update(password.as_bytes());
        let computed = base64::engine::general_purpose::STANDARD.encode(hasher.finalize());
        computed == expected
    }

    fn verify(&self, username: &str, password: &str) -> bool {
        let Some(hash) = self.users.get(username) else {
            return false;
        };
        if hash.starts_with("{SHA}") {
            Self::verify_sha1(hash, password)
        } else {
            hash == password
        }
    }
}

#[async_trait]
impl AuthProvider for PasswordFileAuthProvider {
    fn mechanisms(&self) -> Vec<&'static str> {
        vec!["PLAIN"]
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Principal> {
        match credentials {
            Credentials::Anonymous => {
                Err(BridgeError::AuthFailure("anonymous access disabled".into()))
            }
            Credentials::Password { username, password } => {
                if username.is_empty() || !self.verify(username, password) {
                    return Err(BridgeError::AuthFailure(format!(
                        "invalid credentials for '{}'",
                        username
                    )));
                }
                Ok(Principal::named(username.clone()))
            }
        }
    }
}

/// Single fixed user, for tests
#[derive(Clone)]
pub struct SingleUserAuthProvider {
    pub username: String,
    pub password: String,
}

#[async_trait]
impl AuthProvider for SingleUserAuthProvider {
    fn mechanisms(&self) -> Vec<&'static str> {
        vec!["PLAIN"]
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Principal> {
        match credentials {
            Credentials::Password { username, password }
                if *username == self.username && *password == self.password =>
            {
                Ok(Principal::named(username.clone()))
            }
            _ => Err(BridgeError::AuthFailure("invalid credentials".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_anonymous_provider() {
        let provider = AnonymousAuthProvider;
        let principal = provider.authenticate(&Credentials::Anonymous).await.unwrap();
        assert_eq!(principal, Principal::anonymous());
        assert_eq!(principal.author(), "anonymous");
    }

    #[tokio::test]
    async fn test_password_file_plain() {
        let provider = PasswordFileAuthProvider::from_content("alice:secret\n# comment\n").unwrap();
        let ok = provider
            .authenticate(&Credentials::Password {
                username: "alice".into(),
                password: "secret".into(),
            })
            .await
            .unwrap();
        assert_eq!(ok.author(), "alice");
        let err = provider
            .authenticate(&Credentials::Password {
                username: "alice".into(),
                password: "wrong".into(),
            })
            .await;
        assert!(matches!(err, Err(BridgeError::AuthFailure(_))));
    }

    #[tokio::test]
    async fn test_password_file_sha() {
        // {SHA} of "password": base64(sha1("password"))
        let provider =
            PasswordFileAuthProvider::from_content("bob:{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g=\n")
                .unwrap();
        let ok = provider
            .authenticate(&Credentials::Password {
                username: "bob".into(),
                password: "password".into(),
            })
            .await
            .unwrap();
        assert_eq!(ok.author(), "bob");
    }

    #[test]
    fn test_password_file_rejects_garbage() {
        assert!(PasswordFileAuthProvider::from_content("no-colon-here").is_err());
        assert!(PasswordFileAuthProvider::from_content("\n#only comments\n").is_err());
    }
}
