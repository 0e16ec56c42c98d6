//! `SeaORM` implementation of the `AuthService` trait.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

use crate::config::SecurityConfig;
use crate::db::{NewUser, Store};
use crate::domain::{ADMIN_USERNAME, AuthContext, AuthMethod, Permission};
use crate::models::auth::{ApiKey, Session};
use crate::models::user::User;
use crate::security::{self, HashParams, totp};
use crate::services::auth_service::{
    AuthError, AuthService, CleanupReport, CreatedApiKey, LoginOutcome, LoginRequest,
    NewUserRequest, TotpSetup,
};

const SESSION_TOKEN_BYTES: usize = 32;
const API_KEY_PREFIX_LEN: usize = 8;

pub struct SeaOrmAuthService {
    store: Store,
    password_params: HashParams,
    api_key_params: HashParams,
    session_duration: TimeDelta,
    rate_limit_window: TimeDelta,
    max_failed_attempts: u64,
    attempt_retention: TimeDelta,
}

fn to_delta(d: std::time::Duration) -> anyhow::Result<TimeDelta> {
    TimeDelta::from_std(d).map_err(|e| anyhow::anyhow!("Duration out of range: {e}"))
}

impl SeaOrmAuthService {
    pub fn new(store: Store, config: &SecurityConfig) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            password_params: HashParams::for_passwords(config),
            api_key_params: HashParams::for_api_keys(config),
            session_duration: to_delta(config.session_duration()?)?,
            rate_limit_window: to_delta(config.rate_limit_window()?)?,
            max_failed_attempts: config.max_failed_attempts,
            attempt_retention: to_delta(config.login_attempt_retention()?)?,
        })
    }

    /// Argon2 is CPU and memory heavy; keep it off the async workers.
    async fn hash(secret: &str, params: HashParams) -> Result<String, AuthError> {
        let secret = secret.to_string();
        tokio::task::spawn_blocking(move || security::hash_secret(&secret, &params))
            .await
            .map_err(|e| AuthError::Internal(format!("Hashing task panicked: {e}")))?
            .map_err(AuthError::from)
    }

    async fn verify(secret: &str, encoded: &str) -> Result<bool, AuthError> {
        let secret = secret.to_string();
        let encoded = encoded.to_string();
        tokio::task::spawn_blocking(move || security::verify_secret(&secret, &encoded))
            .await
            .map_err(|e| AuthError::Internal(format!("Verification task panicked: {e}")))?
            .map_err(AuthError::from)
    }

    fn permissions_for(user: &User) -> BTreeSet<Permission> {
        if user.username == ADMIN_USERNAME {
            Permission::admin_set()
        } else {
            Permission::default_set()
        }
    }

    async fn check_rate_limit(&self, request: &LoginRequest) -> Result<(), AuthError> {
        let since = Utc::now() - self.rate_limit_window;
        let attempts = self.store.login_attempts();

        let by_username = attempts
            .count_failed_for_username(&request.username, since)
            .await?;
        if by_username >= self.max_failed_attempts {
            return Err(AuthError::RateLimitExceeded);
        }

        if !request.ip_address.is_empty() {
            let by_ip = attempts
                .count_failed_for_ip(&request.ip_address, since)
                .await?;
            if by_ip >= self.max_failed_attempts {
                return Err(AuthError::RateLimitExceeded);
            }
        }

        Ok(())
    }

    async fn attempt_login(&self, request: &LoginRequest) -> Result<LoginOutcome, AuthError> {
        self.check_rate_limit(request).await?;

        let Some(credentials) = self
            .store
            .users()
            .get_credentials_by_username(&request.username)
            .await?
        else {
            return Err(AuthError::InvalidCredentials);
        };

        if !Self::verify(&request.password, &credentials.password_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }

        if credentials.user.totp_enabled {
            let Some(code) = request.totp_code.as_deref().filter(|c| !c.trim().is_empty()) else {
                return Ok(LoginOutcome::RequiresTotp);
            };
            let secret = credentials
                .totp_secret
                .as_deref()
                .ok_or(AuthError::TotpNotConfigured)?;
            if !totp::validate(secret, code) {
                return Err(AuthError::InvalidTotp);
            }
        }

        let token = security::generate_token(SESSION_TOKEN_BYTES)?;
        let now = Utc::now();
        let session = self
            .store
            .sessions()
            .create(
                credentials.user.id,
                &token,
                &request.user_agent,
                &request.ip_address,
                now + self.session_duration,
            )
            .await?;

        self.store
            .users()
            .record_login(credentials.user.id, now)
            .await?;

        let mut user = credentials.user;
        user.last_login_at = Some(now);

        Ok(LoginOutcome::Authenticated { user, session })
    }

    async fn record_attempt(&self, request: &LoginRequest, success: bool) {
        if let Err(e) = self
            .store
            .login_attempts()
            .record(&request.username, &request.ip_address, success)
            .await
        {
            error!(
                username = %request.username,
                success,
                error = %e,
                "Failed to record login attempt"
            );
        }
    }

    async fn invalidate_sessions(&self, user_id: i32) {
        match self.store.sessions().soft_delete_for_user(user_id).await {
            Ok(count) => info!(user_id, count, "Invalidated sessions"),
            Err(e) => error!(user_id, error = %e, "Failed to invalidate sessions"),
        }
    }

    fn validate_new_user(username: &str, email: &str, password: &str) -> Result<(), AuthError> {
        if username.trim().is_empty() {
            return Err(AuthError::Validation("Username is required".to_string()));
        }
        if email.trim().is_empty() {
            return Err(AuthError::Validation("Email is required".to_string()));
        }
        if password.is_empty() {
            return Err(AuthError::Validation("Password is required".to_string()));
        }
        Ok(())
    }

    async fn insert_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        is_active: bool,
    ) -> Result<User, AuthError> {
        Self::validate_new_user(username, email, password)?;
        let username = username.trim();
        let email = email.trim();

        if self
            .store
            .users()
            .username_or_email_taken(username, email)
            .await?
        {
            return Err(AuthError::UserExists);
        }

        let password_hash = Self::hash(password, self.password_params).await?;

        let user = self
            .store
            .users()
            .create(NewUser {
                username,
                email,
                password_hash,
                is_active,
            })
            .await?;

        info!(user_id = user.id, username = %user.username, is_active, "User created");
        Ok(user)
    }
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn register_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        self.insert_user(username, email, password, true).await
    }

    async fn create_user(&self, request: NewUserRequest) -> Result<User, AuthError> {
        let is_active = request.is_active.unwrap_or(true);
        self.insert_user(&request.username, &request.email, &request.password, is_active)
            .await
    }

    async fn login(&self, request: LoginRequest) -> Result<LoginOutcome, AuthError> {
        let result = self.attempt_login(&request).await;

        let outcome = match &result {
            Ok(LoginOutcome::Authenticated { .. }) => {
                self.record_attempt(&request, true).await;
                "success"
            }
            Ok(LoginOutcome::RequiresTotp) => "totp_required",
            Err(e) => {
                self.record_attempt(&request, false).await;
                debug!(username = %request.username, error = %e, "Login failed");
                match e {
                    AuthError::RateLimitExceeded => "rate_limited",
                    AuthError::InvalidTotp => "invalid_totp",
                    _ => "failure",
                }
            }
        };
        metrics::counter!("auth_login_attempts_total", "outcome" => outcome).increment(1);

        result
    }

    async fn logout(&self, token: &str) -> Result<(), AuthError> {
        if token.is_empty() {
            return Ok(());
        }
        self.store.sessions().soft_delete_by_token(token).await?;
        Ok(())
    }

    async fn logout_all(&self, user_id: i32) -> Result<u64, AuthError> {
        Ok(self.store.sessions().soft_delete_for_user(user_id).await?)
    }

    async fn validate_session(&self, token: &str) -> Result<AuthContext, AuthError> {
        if token.is_empty() {
            return Err(AuthError::InvalidSession);
        }

        let now = Utc::now();
        let session = self
            .store
            .sessions()
            .find_valid(token, now)
            .await?
            .ok_or(AuthError::InvalidSession)?;

        let user = self
            .store
            .users()
            .get_by_id(session.user_id)
            .await?
            .ok_or(AuthError::InvalidSession)?;

        self.store.sessions().touch(session.id, now).await?;

        Ok(AuthContext {
            permissions: Self::permissions_for(&user),
            user,
            session_id: Some(session.id),
            api_key_id: None,
            method: AuthMethod::Session,
        })
    }

    async fn validate_api_key(&self, plaintext: &str) -> Result<AuthContext, AuthError> {
        let prefix = plaintext
            .get(..API_KEY_PREFIX_LEN)
            .ok_or(AuthError::InvalidApiKey)?;

        let now = Utc::now();
        let candidates = self.store.api_keys().find_active_by_prefix(prefix).await?;

        for candidate in candidates {
            if candidate.key.is_expired_at(now) {
                continue;
            }

            match Self::verify(plaintext, &candidate.key_hash).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(api_key_id = candidate.key.id, error = %e, "Stored API key hash unusable");
                    continue;
                }
            }

            let Some(user) = self.store.users().get_by_id(candidate.key.user_id).await? else {
                return Err(AuthError::InvalidApiKey);
            };

            self.store.api_keys().touch(candidate.key.id, now).await?;

            return Ok(AuthContext {
                user,
                session_id: None,
                api_key_id: Some(candidate.key.id),
                permissions: candidate.key.permissions.iter().copied().collect(),
                method: AuthMethod::ApiKey,
            });
        }

        Err(AuthError::InvalidApiKey)
    }

    async fn create_api_key(
        &self,
        user_id: i32,
        name: &str,
        permissions: Vec<Permission>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CreatedApiKey, AuthError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthError::Validation("API key name is required".to_string()));
        }
        if expires_at.is_some_and(|at| at <= Utc::now()) {
            return Err(AuthError::Validation(
                "API key expiry must be in the future".to_string(),
            ));
        }

        let permissions: Vec<Permission> = if permissions.is_empty() {
            Permission::default_set().into_iter().collect()
        } else {
            permissions
                .into_iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };

        let plaintext = security::generate_api_key()?;
        let key_hash = Self::hash(&plaintext, self.api_key_params).await?;
        let prefix = &plaintext[..API_KEY_PREFIX_LEN];

        let key = self
            .store
            .api_keys()
            .create(user_id, name, key_hash, prefix, &permissions, expires_at)
            .await?;

        info!(user_id, api_key_id = key.id, prefix = %key.key_prefix, "API key created");
        Ok(CreatedApiKey { key, plaintext })
    }

    async fn list_api_keys(&self, user_id: i32) -> Result<Vec<ApiKey>, AuthError> {
        Ok(self.store.api_keys().list_for_user(user_id).await?)
    }

    async fn revoke_api_key(&self, user_id: i32, key_id: i32) -> Result<(), AuthError> {
        if self.store.api_keys().revoke(key_id, user_id).await? {
            info!(user_id, api_key_id = key_id, "API key revoked");
            Ok(())
        } else {
            Err(AuthError::ApiKeyNotFound)
        }
    }

    async fn setup_totp(&self, user_id: i32) -> Result<TotpSetup, AuthError> {
        let credentials = self
            .store
            .users()
            .get_credentials_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if credentials.user.totp_enabled {
            return Err(AuthError::Validation("TOTP is already enabled".to_string()));
        }

        let secret = totp::generate_secret()?;
        self.store.users().set_totp_secret(user_id, &secret).await?;

        Ok(TotpSetup {
            provisioning_uri: totp::provisioning_uri(&secret, &credentials.user.username),
            secret,
        })
    }

    async fn enable_totp(&self, user_id: i32, code: &str) -> Result<(), AuthError> {
        let credentials = self
            .store
            .users()
            .get_credentials_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let secret = credentials
            .totp_secret
            .ok_or(AuthError::TotpNotConfigured)?;

        if !totp::validate(&secret, code) {
            return Err(AuthError::InvalidTotp);
        }

        self.store.users().enable_totp(user_id).await?;
        info!(user_id, "TOTP enabled");
        Ok(())
    }

    async fn disable_totp(&self, user_id: i32) -> Result<(), AuthError> {
        if self.store.users().get_by_id(user_id).await?.is_none() {
            return Err(AuthError::UserNotFound);
        }
        self.store.users().disable_totp(user_id).await?;
        info!(user_id, "TOTP disabled");
        Ok(())
    }

    async fn reset_password(&self, username: &str, new_password: &str) -> Result<(), AuthError> {
        if new_password.is_empty() {
            return Err(AuthError::Validation("Password is required".to_string()));
        }

        let user = self
            .store
            .users()
            .get_by_username(username)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let password_hash = Self::hash(new_password, self.password_params).await?;
        self.store
            .users()
            .update_password(user.id, password_hash)
            .await?;

        self.invalidate_sessions(user.id).await;
        info!(user_id = user.id, "Password reset");
        Ok(())
    }

    async fn change_password(
        &self,
        user_id: i32,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if new_password.is_empty() {
            return Err(AuthError::Validation("New password is required".to_string()));
        }
        if current_password == new_password {
            return Err(AuthError::Validation(
                "New password must be different from current password".to_string(),
            ));
        }

        let credentials = self
            .store
            .users()
            .get_credentials_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !Self::verify(current_password, &credentials.password_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let password_hash = Self::hash(new_password, self.password_params).await?;
        self.store
            .users()
            .update_password(user_id, password_hash)
            .await?;

        self.invalidate_sessions(user_id).await;
        Ok(())
    }

    async fn get_user(&self, user_id: i32) -> Result<User, AuthError> {
        self.store
            .users()
            .get_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    async fn list_sessions(&self, user_id: i32) -> Result<Vec<Session>, AuthError> {
        Ok(self
            .store
            .sessions()
            .list_for_user(user_id, Utc::now())
            .await?)
    }

    async fn list_all_users(&self) -> Result<Vec<User>, AuthError> {
        Ok(self.store.users().list_all().await?)
    }

    async fn delete_user(&self, actor_id: i32, target_id: i32) -> Result<(), AuthError> {
        if actor_id == target_id {
            return Err(AuthError::CannotDeleteSelf);
        }

        if !self.store.users().soft_delete(target_id).await? {
            return Err(AuthError::UserNotFound);
        }

        self.invalidate_sessions(target_id).await;
        if let Err(e) = self.store.api_keys().soft_delete_for_user(target_id).await {
            error!(user_id = target_id, error = %e, "Failed to revoke API keys of deleted user");
        }

        info!(actor_id, user_id = target_id, "User deleted");
        Ok(())
    }

    async fn cleanup_expired(&self) -> Result<CleanupReport, AuthError> {
        let now = Utc::now();
        let sessions_removed = self.store.sessions().delete_expired(now).await?;
        let login_attempts_removed = self
            .store
            .login_attempts()
            .delete_older_than(now - self.attempt_retention)
            .await?;

        Ok(CleanupReport {
            sessions_removed,
            login_attempts_removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fast_security() -> SecurityConfig {
        SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
            api_key_memory_cost_kib: 1024,
            api_key_time_cost: 1,
            api_key_parallelism: 1,
            ..SecurityConfig::default()
        }
    }

    async fn service() -> (SeaOrmAuthService, Store, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("auth.db").display());
        let store = Store::new(&url).await.unwrap();
        let svc = SeaOrmAuthService::new(store.clone(), &fast_security()).unwrap();
        (svc, store, dir)
    }

    fn login_req(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
            ip_address: "10.0.0.1".to_string(),
            user_agent: "test".to_string(),
            ..LoginRequest::default()
        }
    }

    async fn login_session(svc: &SeaOrmAuthService, username: &str, password: &str) -> Session {
        match svc.login(login_req(username, password)).await.unwrap() {
            LoginOutcome::Authenticated { session, .. } => session,
            LoginOutcome::RequiresTotp => panic!("unexpected TOTP requirement"),
        }
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let (svc, _store, _dir) = service().await;
        svc.register_user("a", "a@x", "pw1").await.unwrap();

        assert!(matches!(
            svc.register_user("a", "other@x", "pw1").await,
            Err(AuthError::UserExists)
        ));
        assert!(matches!(
            svc.register_user("b", "a@x", "pw1").await,
            Err(AuthError::UserExists)
        ));
        assert!(matches!(
            svc.register_user("", "c@x", "pw1").await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn login_issues_valid_session() {
        let (svc, _store, _dir) = service().await;
        svc.register_user("alice", "alice@x", "hunter22").await.unwrap();

        let session = login_session(&svc, "alice", "hunter22").await;
        let ctx = svc.validate_session(&session.token).await.unwrap();
        assert_eq!(ctx.user.username, "alice");
        assert_eq!(ctx.method, AuthMethod::Session);
        assert_eq!(ctx.permissions, Permission::default_set());
        assert!(ctx.user.last_login_at.is_some());

        svc.logout(&session.token).await.unwrap();
        assert!(matches!(
            svc.validate_session(&session.token).await,
            Err(AuthError::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn admin_username_gets_admin_set() {
        let (svc, _store, _dir) = service().await;
        svc.register_user(ADMIN_USERNAME, "admin@x", "pw").await.unwrap();
        let session = login_session(&svc, ADMIN_USERNAME, "pw").await;

        let ctx = svc.validate_session(&session.token).await.unwrap();
        assert!(ctx.has_permission(Permission::TasksDelete));
        assert!(ctx.has_permission(Permission::AdminAll));
    }

    #[tokio::test]
    async fn rate_limit_blocks_correct_password_and_records_each_failure() {
        let (svc, store, _dir) = service().await;
        svc.register_user("a", "a@x", "pw1").await.unwrap();

        for _ in 0..5 {
            assert!(matches!(
                svc.login(login_req("a", "wrong")).await,
                Err(AuthError::InvalidCredentials)
            ));
        }

        let since = Utc::now() - TimeDelta::minutes(15);
        assert_eq!(
            store
                .login_attempts()
                .count_failed_for_username("a", since)
                .await
                .unwrap(),
            5
        );

        assert!(matches!(
            svc.login(login_req("a", "pw1")).await,
            Err(AuthError::RateLimitExceeded)
        ));
        assert_eq!(
            store
                .login_attempts()
                .count_failed_for_username("a", since)
                .await
                .unwrap(),
            6
        );
    }

    #[tokio::test]
    async fn rate_limit_counts_failures_per_ip_across_usernames() {
        let (svc, _store, _dir) = service().await;
        svc.register_user("bob", "bob@x", "pw1").await.unwrap();

        for name in ["u1", "u2", "u3", "u4", "u5"] {
            assert!(matches!(
                svc.login(login_req(name, "wrong")).await,
                Err(AuthError::InvalidCredentials)
            ));
        }

        assert!(matches!(
            svc.login(login_req("bob", "pw1")).await,
            Err(AuthError::RateLimitExceeded)
        ));

        let elsewhere = LoginRequest {
            ip_address: "10.0.0.2".to_string(),
            ..login_req("bob", "pw1")
        };
        assert!(matches!(
            svc.login(elsewhere).await,
            Ok(LoginOutcome::Authenticated { .. })
        ));
    }

    #[tokio::test]
    async fn inactive_users_cannot_log_in() {
        let (svc, _store, _dir) = service().await;
        svc.create_user(NewUserRequest {
            username: "ghost".to_string(),
            email: "ghost@x".to_string(),
            password: "pw".to_string(),
            is_active: Some(false),
        })
        .await
        .unwrap();

        assert!(matches!(
            svc.login(login_req("ghost", "pw")).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn created_users_default_to_active() {
        let (svc, _store, _dir) = service().await;
        let user = svc
            .create_user(NewUserRequest {
                username: "bob".to_string(),
                email: "bob@x".to_string(),
                password: "pw".to_string(),
                is_active: None,
            })
            .await
            .unwrap();
        assert!(user.is_active);
    }

    #[tokio::test]
    async fn totp_flow() {
        let (svc, _store, _dir) = service().await;
        let user = svc.register_user("t", "t@x", "pw").await.unwrap();

        assert!(matches!(
            svc.enable_totp(user.id, "000000").await,
            Err(AuthError::TotpNotConfigured)
        ));

        let setup = svc.setup_totp(user.id).await.unwrap();
        assert!(setup.provisioning_uri.starts_with("otpauth://totp/"));

        // Not yet enabled: password alone is enough.
        login_session(&svc, "t", "pw").await;

        let code = totp::generate_code(&setup.secret, Utc::now().timestamp()).unwrap();
        svc.enable_totp(user.id, &code).await.unwrap();

        assert!(matches!(
            svc.login(login_req("t", "pw")).await.unwrap(),
            LoginOutcome::RequiresTotp
        ));

        let mut bad = login_req("t", "pw");
        bad.totp_code = Some(if code == "000000" { "111111" } else { "000000" }.to_string());
        assert!(matches!(svc.login(bad).await, Err(AuthError::InvalidTotp)));

        let mut good = login_req("t", "pw");
        good.totp_code = Some(totp::generate_code(&setup.secret, Utc::now().timestamp()).unwrap());
        assert!(matches!(
            svc.login(good).await.unwrap(),
            LoginOutcome::Authenticated { .. }
        ));

        svc.disable_totp(user.id).await.unwrap();
        assert!(!svc.get_user(user.id).await.unwrap().totp_enabled);
        login_session(&svc, "t", "pw").await;
    }

    #[tokio::test]
    async fn api_key_round_trip_and_mutation() {
        let (svc, _store, _dir) = service().await;
        let user = svc.register_user("k", "k@x", "pw").await.unwrap();

        let created = svc
            .create_api_key(user.id, "ci", vec![Permission::TasksRead], None)
            .await
            .unwrap();
        assert_eq!(created.plaintext.len(), 64);
        assert_eq!(created.key.key_prefix, &created.plaintext[..8]);

        let ctx = svc.validate_api_key(&created.plaintext).await.unwrap();
        assert_eq!(ctx.method, AuthMethod::ApiKey);
        assert_eq!(ctx.api_key_id, Some(created.key.id));
        assert!(ctx.has_permission(Permission::TasksRead));
        assert!(!ctx.has_permission(Permission::TasksWrite));

        // Flip the lowest bit of the last character.
        let mut bytes = created.plaintext.clone().into_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 1;
        let mutated = String::from_utf8(bytes).unwrap();
        assert!(matches!(
            svc.validate_api_key(&mutated).await,
            Err(AuthError::InvalidApiKey)
        ));

        assert!(matches!(
            svc.validate_api_key("short").await,
            Err(AuthError::InvalidApiKey)
        ));

        svc.revoke_api_key(user.id, created.key.id).await.unwrap();
        assert!(matches!(
            svc.validate_api_key(&created.plaintext).await,
            Err(AuthError::InvalidApiKey)
        ));
    }

    #[tokio::test]
    async fn reset_password_invalidates_sessions() {
        let (svc, _store, _dir) = service().await;
        svc.register_user("r", "r@x", "old").await.unwrap();
        let s1 = login_session(&svc, "r", "old").await;
        let s2 = login_session(&svc, "r", "old").await;

        svc.reset_password("r", "new").await.unwrap();

        for s in [s1, s2] {
            assert!(matches!(
                svc.validate_session(&s.token).await,
                Err(AuthError::InvalidSession)
            ));
        }
        assert!(matches!(
            svc.login(login_req("r", "old")).await,
            Err(AuthError::InvalidCredentials)
        ));
        login_session(&svc, "r", "new").await;
    }

    #[tokio::test]
    async fn delete_user_rules() {
        let (svc, _store, _dir) = service().await;
        let admin = svc.register_user(ADMIN_USERNAME, "admin@x", "pw").await.unwrap();
        let other = svc.register_user("o", "o@x", "pw").await.unwrap();
        let session = login_session(&svc, "o", "pw").await;

        assert!(matches!(
            svc.delete_user(admin.id, admin.id).await,
            Err(AuthError::CannotDeleteSelf)
        ));

        svc.delete_user(admin.id, other.id).await.unwrap();
        assert!(matches!(
            svc.validate_session(&session.token).await,
            Err(AuthError::InvalidSession)
        ));

        let all = svc.list_all_users().await.unwrap();
        assert_eq!(all.len(), 2, "deleted users still appear in admin listing");
    }

    #[tokio::test]
    async fn cleanup_removes_expired_sessions() {
        let (svc, store, _dir) = service().await;
        let user = svc.register_user("c", "c@x", "pw").await.unwrap();
        store
            .sessions()
            .create(user.id, "stale", "ua", "ip", Utc::now() - TimeDelta::hours(1))
            .await
            .unwrap();
        login_session(&svc, "c", "pw").await;

        let report = svc.cleanup_expired().await.unwrap();
        assert_eq!(report.sessions_removed, 1);
        assert_eq!(svc.list_sessions(user.id).await.unwrap().len(), 1);
    }
}
