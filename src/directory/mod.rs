//! Participant directory and proxy account resolution.
//!
//! Both are traits so the state machine and obligation resolver can run
//! against the SQLite-backed [`RepositoryDirectory`] or a test double.

use crate::db::Repository;
use crate::domain::{AccountId, Currency, Participant, ParticipantAccount, ParticipantName};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Where a party's obligations in one currency are booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyAccountDetails {
    /// False when the party lives in another scheme behind a proxy
    pub in_scheme: bool,
    /// Own account when in scheme, the proxy's account otherwise
    pub account_id: Option<AccountId>,
}

#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    async fn get_by_name(&self, name: &ParticipantName)
        -> Result<Option<Participant>, DirectoryError>;

    async fn get_account_by_name_and_currency(
        &self,
        name: &ParticipantName,
        currency: &Currency,
    ) -> Result<Option<ParticipantAccount>, DirectoryError>;

    /// Proxy representing `name` when it belongs to another scheme.
    async fn get_fsp_proxy(
        &self,
        name: &ParticipantName,
    ) -> Result<Option<ParticipantName>, DirectoryError>;
}

#[async_trait]
pub trait ProxyAccountResolver: Send + Sync {
    async fn get_proxy_account_details(
        &self,
        name: &ParticipantName,
        currency: &Currency,
    ) -> Result<ProxyAccountDetails, DirectoryError>;
}

/// Directory backed by the participant tables.
#[derive(Clone)]
pub struct RepositoryDirectory {
    repo: Arc<Repository>,
}

impl RepositoryDirectory {
    pub fn new(repo: Arc<Repository>) -> Self {
        RepositoryDirectory { repo }
    }
}

#[async_trait]
impl ParticipantDirectory for RepositoryDirectory {
    async fn get_by_name(
        &self,
        name: &ParticipantName,
    ) -> Result<Option<Participant>, DirectoryError> {
        Ok(self.repo.get_participant_by_name(name).await?)
    }

    async fn get_account_by_name_and_currency(
        &self,
        name: &ParticipantName,
        currency: &Currency,
    ) -> Result<Option<ParticipantAccount>, DirectoryError> {
        Ok(self
            .repo
            .get_account_by_name_and_currency(name, currency)
            .await?)
    }

    async fn get_fsp_proxy(
        &self,
        name: &ParticipantName,
    ) -> Result<Option<ParticipantName>, DirectoryError> {
        if self.repo.get_participant_by_name(name).await?.is_some() {
            return Ok(None);
        }
        Ok(self.repo.get_external_participant_proxy(name).await?)
    }
}

#[async_trait]
impl ProxyAccountResolver for RepositoryDirectory {
    async fn get_proxy_account_details(
        &self,
        name: &ParticipantName,
        currency: &Currency,
    ) -> Result<ProxyAccountDetails, DirectoryError> {
        let (in_scheme, account_holder) = match self.get_fsp_proxy(name).await? {
            Some(proxy) => (false, proxy),
            None => (true, name.clone()),
        };
        let account = self
            .repo
            .get_account_by_name_and_currency(&account_holder, currency)
            .await?;
        Ok(ProxyAccountDetails {
            in_scheme,
            account_id: account.map(|a| a.account_id),
        })
    }
}
