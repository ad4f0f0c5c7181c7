//! Operator authorization

use crate::error::{MarketError, MarketResult};
use crate::models::User;
use std::collections::HashSet;

/// Allow-list of operator usernames and emails, compared case-insensitively
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    allowed: HashSet<String>,
}

impl AdminPolicy {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = entries
            .into_iter()
            .map(|e| e.as_ref().trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { allowed }
    }

    /// Parse a comma-separated list such as `ADMIN_USERS=alice,ops@example.com`
    pub fn from_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn is_admin(&self, user: &User) -> bool {
        self.allowed.contains(&user.username.to_lowercase())
            || self.allowed.contains(&user.email.to_lowercase())
    }

    pub fn require_admin(&self, user: &User) -> MarketResult<()> {
        if self.is_admin(user) {
            Ok(())
        } else {
            Err(MarketError::Authorization(
                "administrator access required".to_string(),
            ))
        }
    }
}
