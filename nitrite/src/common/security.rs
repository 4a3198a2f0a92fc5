use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::{ErrorKind, NitriteError, NitriteResult};
use crate::store::NitriteStore;

use super::{Value, USER_HASH, USER_MAP};

const INVALID_CREDENTIALS: &str = "Username or password is invalid";

/// Credential gate consulted while a database opens.
///
/// Credentials live in the reserved user map as `username -> {hash}`,
/// where `hash` is an Argon2 PHC string carrying its own salt.
#[derive(Clone)]
pub(crate) struct AuthService {
    inner: Arc<AuthServiceInner>,
}

impl AuthService {
    pub(crate) fn new(store: NitriteStore) -> Self {
        AuthService {
            inner: Arc::new(AuthServiceInner { store }),
        }
    }

    /// Checks the supplied credentials against the store.
    ///
    /// * `existing` - `false` when the store is being created by this open.
    ///
    /// A new store opened with a username and password becomes secured:
    /// the credential record is written before any other data. An
    /// existing store accepts credentials only if they match its record,
    /// and accepts no credentials only if it has no record. Empty strings
    /// count as absent.
    pub(crate) fn authenticate(
        &self,
        username: Option<&str>,
        password: Option<&str>,
        existing: bool,
    ) -> NitriteResult<()> {
        let username = username.filter(|u| !u.is_empty());
        let password = password.filter(|p| !p.is_empty());
        self.inner.authenticate(username, password, existing)
    }

    /// Sets a new password, verifying the old one when `update` is set.
    /// Without `update`, credentials may only be added to an unsecured
    /// store.
    pub(crate) fn add_or_update_password(
        &self,
        update: bool,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> NitriteResult<()> {
        self.inner
            .add_or_update_password(update, username, old_password, new_password)
    }
}

struct AuthServiceInner {
    store: NitriteStore,
}

impl AuthServiceInner {
    fn authenticate(
        &self,
        username: Option<&str>,
        password: Option<&str>,
        existing: bool,
    ) -> NitriteResult<()> {
        match (username, password) {
            (Some(u), Some(p)) => {
                if existing {
                    self.validate_user(u, p)
                } else {
                    self.save_user(u, p)
                }
            }
            (None, None) => {
                if existing && self.store.has_map(USER_MAP)? {
                    log::error!("{}: store is secured", INVALID_CREDENTIALS);
                    return Err(invalid_credentials());
                }
                Ok(())
            }
            _ => {
                log::error!("{}: both username and password are required", INVALID_CREDENTIALS);
                Err(invalid_credentials())
            }
        }
    }

    fn add_or_update_password(
        &self,
        update: bool,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> NitriteResult<()> {
        if username.is_empty() || new_password.is_empty() {
            log::error!("{}: empty username or password", INVALID_CREDENTIALS);
            return Err(invalid_credentials());
        }

        if update {
            self.validate_user(username, old_password)?;
        } else if self.store.has_map(USER_MAP)? {
            log::error!("Cannot add new credentials to a secured store");
            return Err(NitriteError::new(
                "Cannot add new credentials to a secured store",
                ErrorKind::SecurityError,
            ));
        }

        self.save_user(username, new_password)
    }

    fn save_user(&self, username: &str, password: &str) -> NitriteResult<()> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| {
                log::error!("Failed to hash password: {}", e);
                invalid_credentials()
            })?;

        let mut credential = BTreeMap::new();
        credential.insert(USER_HASH.to_string(), Value::String(hash.to_string()));

        let user_map = self.store.open_map(USER_MAP)?;
        user_map.put(Value::from(username), Value::Map(credential))
    }

    fn validate_user(&self, username: &str, password: &str) -> NitriteResult<()> {
        if !self.store.has_map(USER_MAP)? {
            log::error!("{}: store is not secured", INVALID_CREDENTIALS);
            return Err(invalid_credentials());
        }

        let user_map = self.store.open_map(USER_MAP)?;
        let credential = match user_map.get(&Value::from(username))? {
            Some(credential) => credential,
            None => {
                log::error!("{}: unknown user", INVALID_CREDENTIALS);
                return Err(invalid_credentials());
            }
        };

        let expected_hash = credential
            .as_map()
            .and_then(|c| c.get(USER_HASH))
            .and_then(|h| h.as_string())
            .ok_or_else(|| {
                log::error!("Credential record of {} is malformed", username);
                invalid_credentials()
            })?;

        let parsed_hash = PasswordHash::new(expected_hash).map_err(|e| {
            log::error!("Stored password hash is unreadable: {}", e);
            invalid_credentials()
        })?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| {
                log::error!("{}: password mismatch", INVALID_CREDENTIALS);
                invalid_credentials()
            })
    }
}

fn invalid_credentials() -> NitriteError {
    NitriteError::new(INVALID_CREDENTIALS, ErrorKind::SecurityError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_util::test_store;

    fn secured_store() -> (NitriteStore, AuthService) {
        let store = test_store();
        let auth = AuthService::new(store.clone());
        auth.authenticate(Some("u"), Some("p"), false).unwrap();
        (store, auth)
    }

    #[test]
    fn new_store_with_credentials_writes_single_record() {
        let (store, _) = secured_store();
        let user_map = store.open_map(USER_MAP).unwrap();
        assert_eq!(user_map.size().unwrap(), 1);
        let record = user_map.get(&Value::from("u")).unwrap().unwrap();
        let hash = record.as_map().unwrap().get(USER_HASH).unwrap();
        assert!(hash.as_string().unwrap().starts_with("$argon2"));
    }

    #[test]
    fn matching_credentials_pass() {
        let (_, auth) = secured_store();
        assert!(auth.authenticate(Some("u"), Some("p"), true).is_ok());
    }

    #[test]
    fn wrong_password_fails() {
        let (_, auth) = secured_store();
        let err = auth.authenticate(Some("u"), Some("wrong"), true).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::SecurityError);
    }

    #[test]
    fn unknown_user_fails() {
        let (_, auth) = secured_store();
        let err = auth.authenticate(Some("other"), Some("p"), true).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::SecurityError);
    }

    #[test]
    fn secured_store_without_credentials_fails() {
        let (_, auth) = secured_store();
        let err = auth.authenticate(None, None, true).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::SecurityError);
        assert!(auth.authenticate(Some(""), Some(""), true).is_err());
    }

    #[test]
    fn unsecured_store_with_credentials_fails() {
        let store = test_store();
        let auth = AuthService::new(store.clone());
        auth.authenticate(None, None, false).unwrap();

        let err = auth.authenticate(Some("u"), Some("p"), true).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::SecurityError);
        assert!(!store.has_map(USER_MAP).unwrap());
    }

    #[test]
    fn partial_credentials_fail() {
        let auth = AuthService::new(test_store());
        assert!(auth.authenticate(Some("u"), None, false).is_err());
        assert!(auth.authenticate(None, Some("p"), false).is_err());
        assert!(auth.authenticate(Some("u"), Some(""), false).is_err());
    }

    #[test]
    fn update_password_requires_old_password() {
        let (_, auth) = secured_store();
        assert!(auth.add_or_update_password(true, "u", "bad", "p2").is_err());
        auth.add_or_update_password(true, "u", "p", "p2").unwrap();
        assert!(auth.authenticate(Some("u"), Some("p2"), true).is_ok());
        assert!(auth.authenticate(Some("u"), Some("p"), true).is_err());
    }

    #[test]
    fn add_password_only_to_unsecured_store() {
        let (_, auth) = secured_store();
        let err = auth.add_or_update_password(false, "x", "", "y").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::SecurityError);

        let fresh = AuthService::new(test_store());
        fresh.add_or_update_password(false, "x", "", "y").unwrap();
        assert!(fresh.authenticate(Some("x"), Some("y"), true).is_ok());
    }
}
