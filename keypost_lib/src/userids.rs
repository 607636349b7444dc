/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Management of the `userid` collection: nonce issuance, challenge
//! verification, and the single-verified-address invariant.

use tracing::info;
use uuid::Uuid;

use crate::errors::{ServiceError, StoreError};
use crate::store::{Store, UserIdPatch, UserIdQuery};
use crate::types::{Email, UserIdBinding, UserIdDraft};

#[derive(Debug, Clone, Copy)]
pub struct UserIdService<'a> {
    store: &'a dyn Store,
}

impl<'a> UserIdService<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        UserIdService { store }
    }

    /// A fresh single-use challenge token.
    fn fresh_nonce() -> String {
        Uuid::new_v4().to_string()
    }

    /// Turns the parser's drafts into pending bindings owned by `key_id`,
    /// each with a fresh nonce, and persists them as one batch.
    #[tracing::instrument(skip(self, drafts))]
    pub async fn batch(&self, key_id: &str, drafts: Vec<UserIdDraft>) -> Result<Vec<UserIdBinding>, ServiceError> {
        let bindings: Vec<UserIdBinding> = drafts
            .into_iter()
            .map(|draft| UserIdBinding {
                key_id: key_id.to_string(),
                email: draft.email,
                name: draft.name,
                nonce: Some(Self::fresh_nonce()),
                verified: false,
            })
            .collect();
        self.store
            .insert_userids(bindings.clone())
            .await
            .map_err(|e| ServiceError::StoreFailure(e.to_string()))?;
        Ok(bindings)
    }

    /// Answers a challenge. The store performs the verified transition as
    /// one linearizable unit, so a nonce is consumed exactly once and at
    /// most one binding per email address stays verified.
    #[tracing::instrument(skip(self, nonce))]
    pub async fn verify(&self, key_id: &str, nonce: &str) -> Result<UserIdBinding, ServiceError> {
        let binding = match self.store.confirm_userid(key_id, nonce).await {
            Ok(binding) => binding,
            Err(StoreError::NotFound) => return Err(ServiceError::NotFound),
            Err(e) => return Err(ServiceError::StoreFailure(e.to_string())),
        };
        info!("verified <{}> on key {}", binding.email, binding.key_id);
        Ok(binding)
    }

    /// The first verified binding of the given key, if any. Decides
    /// public visibility of the key record.
    pub async fn get_verified(&self, key_id: &str) -> Result<Option<UserIdBinding>, ServiceError> {
        Ok(self
            .store
            .get_userid(UserIdQuery::by_key_id(key_id).verified(true))
            .await?)
    }

    /// The verified binding of the first listed email that has one. The
    /// single-verified-address invariant makes the result unique per
    /// email.
    pub async fn get_verified_by_emails(&self, emails: &[Email]) -> Result<Option<UserIdBinding>, ServiceError> {
        for email in emails {
            let found = self
                .store
                .get_userid(UserIdQuery::by_email(&email.get_email()).verified(true))
                .await?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Prepares the given bindings for a removal challenge: a fresh nonce
    /// and a cleared verified flag each, applied one binding at a time so
    /// every binding receives its own token.
    #[tracing::instrument(skip(self, bindings))]
    pub async fn reissue_for_removal(&self, bindings: &[UserIdBinding]) -> Result<Vec<UserIdBinding>, ServiceError> {
        let mut reissued = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let nonce = Self::fresh_nonce();
            let selector = UserIdQuery {
                key_id: Some(binding.key_id.clone()),
                email: Some(binding.email.get_email()),
                ..Default::default()
            };
            let patch = UserIdPatch {
                verified: Some(false),
                nonce: Some(Some(nonce.clone())),
            };
            match self.store.update_userids(selector, patch).await {
                Ok(_) => {}
                // Concurrently deleted; nothing left to challenge.
                Err(StoreError::NotFound) => continue,
                Err(e) => return Err(ServiceError::StoreFailure(e.to_string())),
            }
            reissued.push(UserIdBinding {
                nonce: Some(nonce),
                verified: false,
                ..binding.clone()
            });
        }
        Ok(reissued)
    }

    /// Deletes every binding of a key.
    pub async fn remove(&self, key_id: &str) -> Result<(), ServiceError> {
        Ok(self.store.delete_userids(UserIdQuery::by_key_id(key_id)).await?)
    }
}
