use std::sync::Arc;

use chrono::{TimeZone, Utc};
use portfolio_analytics_lib::user::{AuthRejection, NewUser, User, UserPatch, UserRole, UserStatus};
use tokio::sync::Mutex;

use crate::{TOKEN_KEY, USER_KEY, kv_store::KvStore};

struct AuthState {
    users: Vec<User>,
    current: Option<User>,
    last_id: i64,
}

/// The user directory plus current-session state. Backed by a fixed seed of
/// mock users; the session survives restarts through the durable store.
#[derive(Clone)]
pub struct AuthStore {
    state: Arc<Mutex<AuthState>>,
    kv: KvStore,
}

fn seed_users() -> Vec<User> {
    vec![
        User {
            id: "1".to_string(),
            name: "Admin User".to_string(),
            email: "admin@example.com".to_string(),
            role: UserRole::Admin,
            status: UserStatus::Active,
            created_at: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            avatar_url: None,
        },
        User {
            id: "2".to_string(),
            name: "Regular User".to_string(),
            email: "user@example.com".to_string(),
            role: UserRole::User,
            status: UserStatus::Active,
            created_at: Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap(),
            avatar_url: None,
        },
        User {
            id: "3".to_string(),
            name: "Test User".to_string(),
            email: "test@example.com".to_string(),
            role: UserRole::User,
            status: UserStatus::Inactive,
            created_at: Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap(),
            avatar_url: None,
        },
    ]
}

// Millisecond-timestamp ids, bumped when two creations land in the same
// millisecond so ids stay unique.
fn next_user_id(state: &mut AuthState) -> String {
    let mut id = Utc::now().timestamp_millis();
    if id <= state.last_id {
        id = state.last_id + 1;
    }
    state.last_id = id;
    id.to_string()
}

impl AuthStore {
    /// Seeds the mock directory and restores any persisted session.
    pub async fn start(kv: KvStore) -> Self {
        let store = Self {
            state: Arc::new(Mutex::new(AuthState {
                users: seed_users(),
                current: None,
                last_id: 0,
            })),
            kv,
        };
        store.hydrate().await;
        store
    }

    async fn hydrate(&self) {
        let token = self.kv.get::<String>(TOKEN_KEY).await;
        let user = self.kv.get::<User>(USER_KEY).await;

        match (token, user) {
            (Ok(Some(_)), Ok(Some(user))) => self.state.lock().await.current = Some(user),
            (Err(err), _) | (_, Err(err)) => {
                // A malformed stored session logs the visitor out instead
                // of failing construction.
                tracing::warn!("Failed to restore stored session, logging out: {err:?}");
                self.logout().await;
            }
            _ => {}
        }
    }

    async fn persist_session(&self, user: &User) {
        let token = hex::encode(rand::random::<[u8; 16]>());
        if let Err(err) = self.kv.set(TOKEN_KEY, &token).await {
            tracing::error!("Failed to persist session token: {err:?}");
        }
        if let Err(err) = self.kv.set(USER_KEY, user).await {
            tracing::error!("Failed to persist session user: {err:?}");
        }
    }

    /// The mock accepts any password for an active account with a matching
    /// email; the password is not verified.
    pub async fn login(&self, email: &str, _password: &str) -> Result<User, AuthRejection> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .iter()
            .find(|user| user.email == email && user.status == UserStatus::Active)
            .cloned();

        match user {
            Some(user) => {
                state.current = Some(user.clone());
                drop(state);
                self.persist_session(&user).await;
                Ok(user)
            }
            None => Err(AuthRejection::InvalidCredentials),
        }
    }

    /// Creates the account and immediately logs it in.
    pub async fn register(&self, new_user: NewUser) -> Result<User, AuthRejection> {
        let mut state = self.state.lock().await;
        if state.users.iter().any(|user| user.email == new_user.email) {
            return Err(AuthRejection::EmailTaken);
        }

        let user = build_user(&mut state, new_user);
        state.users.push(user.clone());
        state.current = Some(user.clone());
        drop(state);
        self.persist_session(&user).await;

        Ok(user)
    }

    /// Safe to call with no active session.
    pub async fn logout(&self) {
        self.state.lock().await.current = None;
        if let Err(err) = self.kv.remove(TOKEN_KEY).await {
            tracing::error!("Failed to clear session token: {err:?}");
        }
        if let Err(err) = self.kv.remove(USER_KEY).await {
            tracing::error!("Failed to clear session user: {err:?}");
        }
    }

    pub async fn is_logged_in(&self) -> bool {
        self.state.lock().await.current.is_some()
    }

    pub async fn current_user(&self) -> Option<User> {
        self.state.lock().await.current.clone()
    }

    pub async fn current_role(&self) -> Option<UserRole> {
        self.state.lock().await.current.as_ref().map(|user| user.role)
    }

    /// Guard predicate for the admin dashboard route. Enforcement is
    /// client-side only; no server checks this.
    pub async fn is_admin(&self) -> bool {
        self.current_role().await == Some(UserRole::Admin)
    }

    pub async fn list_users(&self) -> Vec<User> {
        self.state.lock().await.users.clone()
    }

    pub async fn user_count(&self) -> usize {
        self.state.lock().await.users.len()
    }

    /// Admin-side creation. Rejects duplicate emails; does not log the new
    /// user in.
    pub async fn create_user(&self, new_user: NewUser) -> bool {
        let mut state = self.state.lock().await;
        if state.users.iter().any(|user| user.email == new_user.email) {
            return false;
        }

        let user = build_user(&mut state, new_user);
        state.users.push(user);
        true
    }

    /// Applies the patch to the matching directory entry. When the target
    /// is the logged-in user, the session mirror is refreshed and
    /// re-persisted to match.
    pub async fn update_user(&self, user_id: &str, patch: UserPatch) -> bool {
        let mut state = self.state.lock().await;
        let Some(index) = state.users.iter().position(|user| user.id == user_id) else {
            return false;
        };

        patch.apply(&mut state.users[index]);
        let updated = state.users[index].clone();

        let refresh_session = state
            .current
            .as_ref()
            .is_some_and(|current| current.id == user_id);
        if refresh_session {
            state.current = Some(updated.clone());
        }
        drop(state);

        if refresh_session {
            self.persist_session(&updated).await;
        }

        true
    }

    /// Removes the entry. Deleting the currently logged-in user leaves the
    /// active session untouched.
    pub async fn delete_user(&self, user_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let initial_len = state.users.len();
        state.users.retain(|user| user.id != user_id);
        state.users.len() < initial_len
    }

    /// Mock reset: reports whether an account exists for the email. No
    /// mail is sent.
    pub async fn reset_password(&self, email: &str) -> bool {
        self.state.lock().await.users.iter().any(|user| user.email == email)
    }
}

fn build_user(state: &mut AuthState, new_user: NewUser) -> User {
    User {
        id: next_user_id(state),
        name: new_user.name,
        email: new_user.email,
        role: new_user.role,
        status: UserStatus::Active,
        created_at: Utc::now(),
        avatar_url: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh_store(name: &str) -> (AuthStore, KvStore) {
        let kv = KvStore::open(crate::test_data_dir(name)).await.unwrap();
        (AuthStore::start(kv.clone()).await, kv)
    }

    fn new_user(email: &str, role: UserRole) -> NewUser {
        NewUser {
            name: "New User".to_string(),
            email: email.to_string(),
            password: "hunter2".to_string(),
            role,
        }
    }

    #[tokio::test]
    async fn starts_anonymous_with_seeded_directory() {
        let (auth, _kv) = fresh_store("auth_seed").await;

        assert!(!auth.is_logged_in().await);
        assert_eq!(auth.current_user().await, None);
        assert_eq!(auth.current_role().await, None);
        assert_eq!(auth.user_count().await, 3);
    }

    #[tokio::test]
    async fn login_requires_matching_active_account() {
        let (auth, _kv) = fresh_store("auth_login").await;

        let user = auth.login("admin@example.com", "anything").await.unwrap();
        assert_eq!(user.role, UserRole::Admin);
        assert!(auth.is_logged_in().await);
        assert!(auth.is_admin().await);

        auth.logout().await;

        // Inactive account.
        let rejected = auth.login("test@example.com", "anything").await;
        assert_eq!(rejected, Err(AuthRejection::InvalidCredentials));
        assert!(!auth.is_logged_in().await);

        // Unknown email.
        let rejected = auth.login("nobody@example.com", "anything").await;
        assert_eq!(rejected, Err(AuthRejection::InvalidCredentials));
    }

    #[tokio::test]
    async fn register_logs_the_new_user_in() {
        let (auth, _kv) = fresh_store("auth_register").await;

        let user = auth.register(new_user("a@x.com", UserRole::User)).await.unwrap();
        assert_eq!(auth.current_user().await, Some(user.clone()));
        assert_eq!(auth.user_count().await, 4);
        assert_eq!(user.status, UserStatus::Active);

        // The fresh account can log back in.
        auth.logout().await;
        assert!(auth.login("a@x.com", "anything").await.is_ok());
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email() {
        let (auth, _kv) = fresh_store("auth_register_dup").await;

        let rejected = auth.register(new_user("admin@example.com", UserRole::User)).await;
        assert_eq!(rejected, Err(AuthRejection::EmailTaken));
        assert_eq!(auth.user_count().await, 3);
        assert!(!auth.is_logged_in().await);
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let (auth, _kv) = fresh_store("auth_logout").await;

        auth.login("admin@example.com", "anything").await.unwrap();
        auth.logout().await;
        auth.logout().await;
        assert!(!auth.is_logged_in().await);
    }

    #[tokio::test]
    async fn session_survives_restart() {
        let (auth, kv) = fresh_store("auth_restart").await;
        auth.login("admin@example.com", "anything").await.unwrap();

        let rehydrated = AuthStore::start(kv).await;
        assert!(rehydrated.is_logged_in().await);
        assert_eq!(
            rehydrated.current_user().await.map(|user| user.email),
            Some("admin@example.com".to_string())
        );
    }

    #[tokio::test]
    async fn malformed_stored_session_hydrates_as_anonymous() {
        let dir = crate::test_data_dir("auth_malformed");
        let kv = KvStore::open(&dir).await.unwrap();
        kv.set(crate::TOKEN_KEY, &"token".to_string()).await.unwrap();
        tokio::fs::write(dir.join(format!("{}.json", crate::USER_KEY)), b"{broken")
            .await
            .unwrap();

        let auth = AuthStore::start(kv.clone()).await;
        assert!(!auth.is_logged_in().await);

        // The implicit logout also cleared the stored pair.
        assert!(kv.get::<String>(crate::TOKEN_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn token_without_user_hydrates_as_anonymous() {
        let dir = crate::test_data_dir("auth_token_only");
        let kv = KvStore::open(&dir).await.unwrap();
        kv.set(crate::TOKEN_KEY, &"token".to_string()).await.unwrap();

        let auth = AuthStore::start(kv).await;
        assert!(!auth.is_logged_in().await);
    }

    #[tokio::test]
    async fn create_user_rejects_duplicates_without_mutation() {
        let (auth, _kv) = fresh_store("auth_create").await;

        assert!(auth.create_user(new_user("a@x.com", UserRole::User)).await);
        assert_eq!(auth.user_count().await, 4);
        // Admin creation does not log anyone in.
        assert!(!auth.is_logged_in().await);

        assert!(!auth.create_user(new_user("a@x.com", UserRole::Admin)).await);
        assert_eq!(auth.user_count().await, 4);
    }

    #[tokio::test]
    async fn created_users_get_distinct_ids() {
        let (auth, _kv) = fresh_store("auth_ids").await;

        auth.create_user(new_user("a@x.com", UserRole::User)).await;
        auth.create_user(new_user("b@x.com", UserRole::User)).await;
        auth.create_user(new_user("c@x.com", UserRole::User)).await;

        let users = auth.list_users().await;
        let mut ids: Vec<&str> = users.iter().map(|user| user.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), users.len());
    }

    #[tokio::test]
    async fn update_user_refreshes_current_session_mirror() {
        let (auth, _kv) = fresh_store("auth_update").await;
        let user = auth.login("user@example.com", "anything").await.unwrap();

        let patch = UserPatch {
            name: Some("Renamed".to_string()),
            ..UserPatch::default()
        };
        assert!(auth.update_user(&user.id, patch).await);

        assert_eq!(
            auth.current_user().await.map(|user| user.name),
            Some("Renamed".to_string())
        );

        // Unknown id fails without mutation.
        assert!(!auth.update_user("no-such-id", UserPatch::default()).await);
        assert_eq!(auth.user_count().await, 3);
    }

    #[tokio::test]
    async fn delete_user_reports_presence() {
        let (auth, _kv) = fresh_store("auth_delete").await;

        assert!(!auth.delete_user("no-such-id").await);
        assert_eq!(auth.user_count().await, 3);

        assert!(auth.delete_user("3").await);
        assert_eq!(auth.user_count().await, 2);
    }

    #[tokio::test]
    async fn deleting_the_logged_in_user_keeps_the_session() {
        let (auth, _kv) = fresh_store("auth_delete_current").await;
        let user = auth.login("user@example.com", "anything").await.unwrap();

        assert!(auth.delete_user(&user.id).await);
        // Known gap: the session stays live after the record is gone.
        assert!(auth.is_logged_in().await);
    }

    #[tokio::test]
    async fn reset_password_reports_account_existence() {
        let (auth, _kv) = fresh_store("auth_reset").await;

        assert!(auth.reset_password("admin@example.com").await);
        assert!(!auth.reset_password("nobody@example.com").await);
    }
}
