use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct MemoryUserRepo {
    users: Mutex<HashMap<UserId, User>>,
}

impl MemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<UserId, User>>, AuthError> {
        self.users
            .lock()
            .map_err(|e| AuthError::StorageUnavailable(e.to_string()))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().map(|u| u.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seeds an account without a provider subject, as left by an older
    /// sign-in method.
    #[cfg(test)]
    pub fn insert_unlinked(
        &self,
        email: &str,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Option<UserId> {
        let mut users = self.lock().ok()?;
        let id = UserId::new_v4();
        users.insert(
            id,
            User {
                id,
                provider_subject: None,
                email: Some(email.to_string()),
                email_verified: false,
                created_at,
            },
        );
        Some(id)
    }
}

#[async_trait::async_trait]
impl UserRepo for MemoryUserRepo {
    async fn create(&self, user: NewUser) -> Result<User, CreateUserError> {
        let mut users = self.lock()?;
        let taken = users.values().any(|u| {
            u.provider_subject.as_deref() == Some(user.provider_subject.as_str())
                || (user.email.is_some() && u.email == user.email)
        });
        if taken {
            return Err(CreateUserError::Conflict);
        }
        let user = user.into_user();
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>, AuthError> {
        Ok(self.lock()?.get(&user_id).cloned())
    }

    async fn find_by_provider_subject(&self, subject: &str) -> Result<Option<User>, AuthError> {
        Ok(self
            .lock()?
            .values()
            .find(|u| u.provider_subject.as_deref() == Some(subject))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        Ok(self
            .lock()?
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn link_provider_subject(
        &self,
        user_id: UserId,
        subject: &str,
    ) -> Result<bool, AuthError> {
        let mut users = self.lock()?;
        if users
            .values()
            .any(|u| u.provider_subject.as_deref() == Some(subject))
        {
            return Ok(false);
        }
        match users.get_mut(&user_id) {
            Some(u) if u.provider_subject.is_none() => {
                u.provider_subject = Some(subject.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
