use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::livechat::error::{LiveChatError, Operation, Result};
use crate::livechat::LiveChat;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email already in use: {0}")]
    EmailInUse(String),

    #[error("Password too weak: {0}")]
    WeakPassword(String),
}

/// The signed-in user as reported by the authentication provider
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct User {
    /// Stable identifier assigned by the provider
    pub uid: String,

    /// Email address, if the account has one
    pub email: Option<String>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> std::result::Result<User, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> std::result::Result<User, AuthError>;

    async fn sign_out(&self) -> std::result::Result<(), AuthError>;

    /// Sends a reset mail. Providers do not reveal whether the address is registered.
    async fn send_password_reset(&self, email: &str) -> std::result::Result<(), AuthError>;

    fn current_user(&self) -> Option<User>;

    /// Receiver that observes every change of the current user
    fn watch_user(&self) -> watch::Receiver<Option<User>>;
}

const MIN_PASSWORD_LEN: usize = 6;

/// Email/password accounts kept in memory
pub struct InMemoryAuth {
    accounts: Mutex<HashMap<String, (String, User)>>,
    reset_requests: Mutex<Vec<String>>,
    current: watch::Sender<Option<User>>,
}

impl InMemoryAuth {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            reset_requests: Mutex::new(Vec::new()),
            current: watch::Sender::new(None),
        }
    }

    /// Addresses a reset mail was requested for, in request order
    pub fn reset_requests(&self) -> Vec<String> {
        self.reset_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Signs in a user without an email address, as some providers allow
    pub fn sign_in_anonymously(&self) -> User {
        let user = User {
            uid: Uuid::new_v4().simple().to_string(),
            email: None,
        };
        self.current.send_replace(Some(user.clone()));
        user
    }
}

impl Default for InMemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for InMemoryAuth {
    async fn sign_up(&self, email: &str, password: &str) -> std::result::Result<User, AuthError> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword(format!(
                "at least {} characters required",
                MIN_PASSWORD_LEN
            )));
        }
        let user = {
            let mut accounts = self
                .accounts
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if accounts.contains_key(email) {
                return Err(AuthError::EmailInUse(email.to_string()));
            }
            let user = User {
                uid: Uuid::new_v4().simple().to_string(),
                email: Some(email.to_string()),
            };
            accounts.insert(email.to_string(), (password.to_string(), user.clone()));
            user
        };
        // Registering also signs the user in
        self.current.send_replace(Some(user.clone()));
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> std::result::Result<User, AuthError> {
        let user = self
            .accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(email)
            .filter(|(stored, _)| stored == password)
            .map(|(_, user)| user.clone())
            .ok_or(AuthError::InvalidCredentials)?;
        self.current.send_replace(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> std::result::Result<(), AuthError> {
        self.current.send_replace(None);
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> std::result::Result<(), AuthError> {
        self.reset_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(email.to_string());
        Ok(())
    }

    fn current_user(&self) -> Option<User> {
        self.current.borrow().clone()
    }

    fn watch_user(&self) -> watch::Receiver<Option<User>> {
        self.current.subscribe()
    }
}

impl LiveChat {
    /// Creates an account and signs it in. The live window follows through the
    /// presence watcher or an explicit [`LiveChat::activate`].
    pub async fn register(&self, email: &str, password: &str) -> Result<User> {
        let user = self
            .auth
            .sign_up(email.trim(), password)
            .await
            .map_err(|e| LiveChatError::remote(Operation::Register, e))?;
        tracing::info!(target: "livechat::accounts::register", "Registered user {}", user.uid);
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let user = self
            .auth
            .sign_in(email.trim(), password)
            .await
            .map_err(|e| LiveChatError::remote(Operation::Login, e))?;
        tracing::info!(target: "livechat::accounts::login", "User {} signed in", user.uid);
        Ok(user)
    }

    /// Signs out and tears down the live window
    pub async fn logout(&self) -> Result<()> {
        self.auth
            .sign_out()
            .await
            .map_err(|e| LiveChatError::remote(Operation::Logout, e))?;
        self.deactivate().await;
        tracing::info!(target: "livechat::accounts::logout", "Signed out");
        Ok(())
    }

    pub async fn reset_password(&self, email: &str) -> Result<()> {
        let email = email.trim();
        if email.is_empty() {
            return Err(LiveChatError::Validation(
                "Enter an email address to reset the password".to_string(),
            ));
        }
        self.auth
            .send_password_reset(email)
            .await
            .map_err(|e| LiveChatError::remote(Operation::ResetPassword, e))
    }

    pub fn current_user(&self) -> Option<User> {
        self.auth.current_user()
    }

    pub fn watch_user(&self) -> watch::Receiver<Option<User>> {
        self.auth.watch_user()
    }

    /// Follows the authentication state: activates the live window whenever a user is
    /// present and deactivates it when the user goes away.
    pub fn spawn_presence_watcher(self: &std::sync::Arc<Self>) -> JoinHandle<()> {
        let chat = self.clone();
        let mut users = self.auth.watch_user();
        tokio::spawn(async move {
            loop {
                let present = users.borrow_and_update().is_some();
                if present {
                    if let Err(e) = chat.activate().await {
                        tracing::error!(
                            target: "livechat::accounts::presence",
                            "Failed to activate live window: {}",
                            e
                        );
                    }
                } else {
                    chat.deactivate().await;
                }
                if users.changed().await.is_err() {
                    tracing::debug!(
                        target: "livechat::accounts::presence",
                        "Auth provider dropped, stopping presence watcher"
                    );
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_up_signs_in() {
        let auth = InMemoryAuth::new();
        let user = auth.sign_up("a@example.com", "secret1").await.unwrap();

        assert_eq!(auth.current_user(), Some(user.clone()));
        assert_eq!(user.email.as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn test_duplicate_and_weak_sign_up() {
        let auth = InMemoryAuth::new();
        auth.sign_up("a@example.com", "secret1").await.unwrap();

        assert!(matches!(
            auth.sign_up("a@example.com", "secret1").await,
            Err(AuthError::EmailInUse(_))
        ));
        assert!(matches!(
            auth.sign_up("b@example.com", "123").await,
            Err(AuthError::WeakPassword(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_in_checks_password() {
        let auth = InMemoryAuth::new();
        auth.sign_up("a@example.com", "secret1").await.unwrap();
        auth.sign_out().await.unwrap();

        assert!(matches!(
            auth.sign_in("a@example.com", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert_eq!(auth.current_user(), None);

        let user = auth.sign_in("a@example.com", "secret1").await.unwrap();
        assert_eq!(auth.current_user(), Some(user));
    }

    #[tokio::test]
    async fn test_watch_sees_sign_out() {
        let auth = InMemoryAuth::new();
        let mut rx = auth.watch_user();
        auth.sign_up("a@example.com", "secret1").await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());

        auth.sign_out().await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }
}
