use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use vibestudy_core::{User, UserResolver};

/// Resolver with a fixed answer, e.g. a CLI configured with one account.
#[derive(Debug, Clone, Default)]
pub struct StaticUserResolver {
    user: Option<User>,
}

impl StaticUserResolver {
    pub fn new(user: Option<User>) -> Self {
        Self { user }
    }

    /// A resolver that never finds a user (local-only mode).
    pub fn anonymous() -> Self {
        Self { user: None }
    }
}

#[async_trait]
impl UserResolver for StaticUserResolver {
    async fn current_user(&self) -> Option<User> {
        self.user.clone()
    }
}

/// Sign-in state shared with the application shell.
///
/// The shell calls [`sign_in`](Self::sign_in) / [`sign_out`](Self::sign_out)
/// as the session changes; sync operations see the state at the moment they
/// are issued.
#[derive(Debug, Default)]
pub struct SessionUserResolver {
    user: RwLock<Option<User>>,
}

impl SessionUserResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sign_in(&self, user: User) {
        info!(user_id = %user.id, "Session signed in");
        *self.user.write().await = Some(user);
    }

    pub async fn sign_out(&self) {
        if let Some(user) = self.user.write().await.take() {
            info!(user_id = %user.id, "Session signed out");
        }
    }
}

#[async_trait]
impl UserResolver for SessionUserResolver {
    async fn current_user(&self) -> Option<User> {
        self.user.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_tracks_sign_in_and_out() {
        let session = SessionUserResolver::new();
        assert!(session.current_user().await.is_none());

        session.sign_in(User::new("learner-1")).await;
        assert_eq!(session.current_user().await.unwrap().id.as_str(), "learner-1");

        session.sign_out().await;
        assert!(session.current_user().await.is_none());
    }
}
