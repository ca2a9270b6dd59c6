use std::collections::HashMap;
use std::fs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auction::timeout::GlobalTimeout;
use crate::error::PreBidError;

/// Publisher account settings resolved once per auction before any bidder
/// dispatch.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Account {
    pub id: String,
    /// Price-bucket granularity for winner targeting keys: "low", "med" or
    /// "high". Defaults to "med".
    #[serde(default)]
    pub price_granularity: Option<String>,
}

#[async_trait]
pub trait ApplicationSettings: Send + Sync {
    async fn account_by_id(
        &self,
        account_id: &str,
        deadline: &GlobalTimeout,
    ) -> Result<Account, PreBidError>;
}

/// Accounts loaded from a JSON file at startup. A missing or unreadable file
/// yields an empty set, so every auction resolves to an unknown account.
pub struct FileApplicationSettings {
    accounts: HashMap<String, Account>,
}

impl FileApplicationSettings {
    pub fn from_file(path: &str) -> Self {
        let content = fs::read_to_string(path).unwrap_or_else(|_| "[]".to_string());
        let accounts: Vec<Account> = serde_json::from_str(&content).unwrap_or_default();
        Self {
            accounts: accounts
                .into_iter()
                .map(|account| (account.id.clone(), account))
                .collect(),
        }
    }
}

#[async_trait]
impl ApplicationSettings for FileApplicationSettings {
    async fn account_by_id(
        &self,
        account_id: &str,
        _deadline: &GlobalTimeout,
    ) -> Result<Account, PreBidError> {
        self.accounts
            .get(account_id)
            .cloned()
            .ok_or(PreBidError::UnknownAccount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[tokio::test]
    async fn missing_account_is_an_error() {
        let settings = FileApplicationSettings {
            accounts: HashMap::new(),
        };
        let deadline = GlobalTimeout::create(Duration::from_millis(100));
        assert_eq!(
            settings.account_by_id("nope", &deadline).await.unwrap_err(),
            PreBidError::UnknownAccount
        );
    }

    #[tokio::test]
    async fn known_account_resolves() {
        let mut accounts = HashMap::new();
        accounts.insert(
            "acct-1".to_string(),
            Account {
                id: "acct-1".to_string(),
                price_granularity: Some("low".to_string()),
            },
        );
        let settings = FileApplicationSettings { accounts };
        let deadline = GlobalTimeout::create(Duration::from_millis(100));
        let account = settings.account_by_id("acct-1", &deadline).await.unwrap();
        assert_eq!(account.price_granularity.as_deref(), Some("low"));
    }
}
