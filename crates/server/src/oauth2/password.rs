//! Password grant verification against the user directory.
//!
//! The directory stores `md5(salt + password)` as lowercase hex. An `@` in
//! the identifier selects lookup by e-mail, otherwise by login name.

use crate::entity::user;
use crate::error::DirectoryError;
use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Which directory column an identifier is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginField {
    Login,
    Email,
}

impl LoginField {
    pub fn for_identifier(identifier: &str) -> Self {
        if identifier.contains('@') {
            LoginField::Email
        } else {
            LoginField::Login
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredentials {
    pub id: i64,
    pub password_hash: String,
}

/// Read access to the external user directory.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_credentials(
        &self,
        field: LoginField,
        identifier: &str,
    ) -> Result<Option<UserCredentials>, DirectoryError>;
}

/// Directory backed by the `users` table.
#[derive(Clone)]
pub struct DbUserDirectory {
    db: Arc<DatabaseConnection>,
}

impl DbUserDirectory {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for DbUserDirectory {
    #[tracing::instrument(skip(self, identifier))]
    async fn find_credentials(
        &self,
        field: LoginField,
        identifier: &str,
    ) -> Result<Option<UserCredentials>, DirectoryError> {
        let column = match field {
            LoginField::Login => user::Column::Login,
            LoginField::Email => user::Column::EMail,
        };
        let found = user::Entity::find()
            .filter(user::Column::Deleted.eq(false))
            .filter(column.eq(identifier))
            .one(self.db.as_ref())
            .await?;
        Ok(found.map(|u| UserCredentials {
            id: u.id,
            password_hash: u.password,
        }))
    }
}

/// Digest format the directory stores passwords in.
pub fn password_digest(salt: &str, password: &str) -> String {
    format!("{:x}", md5::compute(format!("{salt}{password}")))
}

#[derive(Clone)]
pub struct PasswordVerifier {
    directory: Arc<dyn UserDirectory>,
    salt: String,
}

impl PasswordVerifier {
    pub fn new(directory: Arc<dyn UserDirectory>, salt: impl Into<String>) -> Self {
        Self {
            directory,
            salt: salt.into(),
        }
    }

    /// Returns the matching user id, or `None` when nothing matches.
    #[tracing::instrument(skip(self, password))]
    pub async fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<i64>, DirectoryError> {
        if username.is_empty() || password.is_empty() {
            return Ok(None);
        }

        let field = LoginField::for_identifier(username);
        let Some(credentials) = self.directory.find_credentials(field, username).await? else {
            return Ok(None);
        };

        if credentials.password_hash.is_empty() {
            return Ok(None);
        }
        let supplied = password_digest(&self.salt, password);
        let stored = credentials.password_hash.to_ascii_lowercase();
        if bool::from(supplied.as_bytes().ct_eq(stored.as_bytes())) {
            Ok(Some(credentials.id))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeDirectory {
        users: Vec<(Option<&'static str>, Option<&'static str>, UserCredentials)>,
        calls: Mutex<Vec<(LoginField, String)>>,
    }

    #[async_trait]
    impl UserDirectory for FakeDirectory {
        async fn find_credentials(
            &self,
            field: LoginField,
            identifier: &str,
        ) -> Result<Option<UserCredentials>, DirectoryError> {
            self.calls
                .lock()
                .unwrap()
                .push((field, identifier.to_string()));
            Ok(self
                .users
                .iter()
                .find(|(login, email, _)| match field {
                    LoginField::Login => *login == Some(identifier),
                    LoginField::Email => *email == Some(identifier),
                })
                .map(|(_, _, c)| c.clone()))
        }
    }

    fn verifier() -> (PasswordVerifier, Arc<FakeDirectory>) {
        let directory = Arc::new(FakeDirectory {
            users: vec![(
                Some("tester"),
                Some("tester@example.com"),
                UserCredentials {
                    id: 7,
                    password_hash: password_digest("pepper", "hunter2"),
                },
            )],
            calls: Mutex::new(Vec::new()),
        });
        (PasswordVerifier::new(directory.clone(), "pepper"), directory)
    }

    #[test]
    fn digest_is_salted_md5_hex() {
        assert_eq!(
            password_digest("", "password"),
            "5f4dcc3b5aa765d61d8327deb882cf99"
        );
        assert_ne!(password_digest("a", "b"), password_digest("", "b"));
    }

    #[tokio::test]
    async fn matches_by_login_and_email() {
        let (verifier, directory) = verifier();
        assert_eq!(verifier.verify("tester", "hunter2").await.unwrap(), Some(7));
        assert_eq!(
            verifier.verify("tester@example.com", "hunter2").await.unwrap(),
            Some(7)
        );
        let calls = directory.calls.lock().unwrap();
        assert_eq!(calls[0].0, LoginField::Login);
        assert_eq!(calls[1].0, LoginField::Email);
    }

    #[tokio::test]
    async fn wrong_password_or_unknown_user_is_no_match() {
        let (verifier, _) = verifier();
        assert_eq!(verifier.verify("tester", "nope").await.unwrap(), None);
        assert_eq!(verifier.verify("ghost", "hunter2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn uppercase_stored_digest_matches() {
        let directory = Arc::new(FakeDirectory {
            users: vec![(
                Some("shouty"),
                None,
                UserCredentials {
                    id: 9,
                    password_hash: password_digest("pepper", "hunter2").to_ascii_uppercase(),
                },
            )],
            calls: Mutex::new(Vec::new()),
        });
        let verifier = PasswordVerifier::new(directory, "pepper");
        assert_eq!(verifier.verify("shouty", "hunter2").await.unwrap(), Some(9));
        assert_eq!(verifier.verify("shouty", "hunter3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_input_skips_directory() {
        let (verifier, directory) = verifier();
        assert_eq!(verifier.verify("", "hunter2").await.unwrap(), None);
        assert_eq!(verifier.verify("tester", "").await.unwrap(), None);
        assert!(directory.calls.lock().unwrap().is_empty());
    }
}
