/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! A mutex-guarded in-memory store. Backs the service-level tests and
//! no-database development runs; every operation holds the single lock
//! for its whole duration, which trivially satisfies the linearizability
//! requirements of the trait.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::errors::StoreError;
use crate::store::{KeyQuery, Store, UserIdPatch, UserIdQuery};
use crate::types::{KeyRecord, UserIdBinding};

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    keys: Vec<StoredKey>,
    userids: Vec<UserIdBinding>,
}

#[derive(Debug)]
struct StoredKey {
    record: KeyRecord,
    submitted_at: DateTime<Utc>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key_matches(query: &KeyQuery, record: &KeyRecord) -> bool {
    if let Some(fingerprint) = &query.fingerprint {
        if &record.fingerprint != fingerprint {
            return false;
        }
    }
    if let Some(key_id) = &query.key_id {
        if &record.key_id != key_id {
            return false;
        }
    }
    if let Some(suffix) = &query.key_id_suffix {
        if !record.key_id.ends_with(suffix) {
            return false;
        }
    }
    true
}

fn userid_matches(query: &UserIdQuery, binding: &UserIdBinding) -> bool {
    if let Some(key_id) = &query.key_id {
        if &binding.key_id != key_id {
            return false;
        }
    }
    if let Some(email) = &query.email {
        if &binding.email.get_email() != email {
            return false;
        }
    }
    if let Some(nonce) = &query.nonce {
        if binding.nonce.as_deref() != Some(nonce.as_str()) {
            return false;
        }
    }
    if let Some(verified) = query.verified {
        if binding.verified != verified {
            return false;
        }
    }
    true
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_key(&self, record: KeyRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if inner
            .keys
            .iter()
            .any(|k| k.record.key_id == record.key_id || k.record.fingerprint == record.fingerprint)
        {
            return Err(StoreError::Duplicate);
        }
        inner.keys.push(StoredKey {
            record,
            submitted_at: Utc::now(),
        });
        Ok(())
    }

    async fn get_key(&self, query: KeyQuery) -> Result<Option<KeyRecord>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let mut matches = inner.keys.iter().filter(|k| key_matches(&query, &k.record));
        let first = matches.next().map(|k| k.record.clone());
        if first.is_some() && matches.next().is_some() {
            warn!("ambiguous key query {:?}, returning first hit", query);
        }
        Ok(first)
    }

    async fn delete_keys(&self, query: KeyQuery) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.keys.retain(|k| !key_matches(&query, &k.record));
        Ok(())
    }

    async fn insert_userids(&self, bindings: Vec<UserIdBinding>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.userids.extend(bindings);
        Ok(())
    }

    async fn get_userid(&self, query: UserIdQuery) -> Result<Option<UserIdBinding>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.userids.iter().find(|u| userid_matches(&query, u)).cloned())
    }

    async fn list_userids(&self, query: UserIdQuery) -> Result<Vec<UserIdBinding>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .userids
            .iter()
            .filter(|u| userid_matches(&query, u))
            .cloned()
            .collect())
    }

    async fn update_userids(&self, selector: UserIdQuery, patch: UserIdPatch) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let mut updated = 0;
        for binding in inner.userids.iter_mut().filter(|u| userid_matches(&selector, u)) {
            if let Some(verified) = patch.verified {
                binding.verified = verified;
            }
            if let Some(nonce) = &patch.nonce {
                binding.nonce = nonce.clone();
            }
            updated += 1;
        }
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(updated)
    }

    async fn delete_userids(&self, query: UserIdQuery) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.userids.retain(|u| !userid_matches(&query, u));
        Ok(())
    }

    async fn confirm_userid(&self, key_id: &str, nonce: &str) -> Result<UserIdBinding, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let position = inner
            .userids
            .iter()
            .position(|u| u.key_id == key_id && u.nonce.as_deref() == Some(nonce))
            .ok_or(StoreError::NotFound)?;
        let email = inner.userids[position].email.get_email();
        for binding in inner.userids.iter_mut() {
            if binding.verified && binding.email.get_email() == email {
                binding.verified = false;
            }
        }
        let binding = &mut inner.userids[position];
        binding.verified = true;
        binding.nonce = None;
        Ok(binding.clone())
    }

    async fn purge_unverified(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let victims: Vec<String> = inner
            .keys
            .iter()
            .filter(|k| {
                k.submitted_at < cutoff
                    && !inner
                        .userids
                        .iter()
                        .any(|u| u.verified && u.key_id == k.record.key_id)
            })
            .map(|k| k.record.key_id.clone())
            .collect();
        inner.keys.retain(|k| !victims.contains(&k.record.key_id));
        inner.userids.retain(|u| !victims.contains(&u.key_id));
        Ok(victims.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::types::Email;

    fn key(key_id: &str) -> KeyRecord {
        KeyRecord {
            fingerprint: format!("{:0>40}", key_id),
            key_id: key_id.to_string(),
            algorithm: "eddsa".to_string(),
            key_size: 256,
            created: Utc::now(),
            armored: "-----BEGIN PGP PUBLIC KEY BLOCK-----".to_string(),
        }
    }

    fn binding(key_id: &str, email: &str, nonce: Option<&str>, verified: bool) -> UserIdBinding {
        UserIdBinding {
            key_id: key_id.to_string(),
            email: Email::parse(email).unwrap(),
            name: String::new(),
            nonce: nonce.map(|n| n.to_string()),
            verified,
        }
    }

    #[tokio::test]
    async fn duplicate_key_id_is_rejected() {
        let store = MemoryStore::new();
        store.insert_key(key("AAAA000000000001")).await.unwrap();
        assert!(matches!(
            store.insert_key(key("AAAA000000000001")).await,
            Err(StoreError::Duplicate)
        ));
    }

    #[tokio::test]
    async fn suffix_query_finds_short_id() {
        let store = MemoryStore::new();
        store.insert_key(key("AAAA0000DEADBEEF")).await.unwrap();
        let found = store.get_key(KeyQuery::by_key_id_suffix("DEADBEEF")).await.unwrap();
        assert_eq!(found.unwrap().key_id, "AAAA0000DEADBEEF");
    }

    #[tokio::test]
    async fn update_with_empty_selection_fails() {
        let store = MemoryStore::new();
        let result = store
            .update_userids(
                UserIdQuery::by_key_id("AAAA000000000001"),
                UserIdPatch {
                    verified: Some(false),
                    nonce: None,
                },
            )
            .await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn update_with_empty_patch_reports_matches() {
        let store = MemoryStore::new();
        store
            .insert_userids(vec![binding("AAAA000000000001", "a@x.test", Some("n-1"), false)])
            .await
            .unwrap();

        let affected = store
            .update_userids(UserIdQuery::by_key_id("AAAA000000000001"), UserIdPatch::default())
            .await
            .unwrap();
        assert_eq!(affected, 1);

        // Nothing was written.
        let row = store
            .get_userid(UserIdQuery::by_key_id("AAAA000000000001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.nonce.as_deref(), Some("n-1"));
        assert!(!row.verified);
    }

    #[tokio::test]
    async fn confirm_consumes_nonce_and_clears_previous_winner() {
        let store = MemoryStore::new();
        store
            .insert_userids(vec![
                binding("AAAA000000000001", "a@x.test", None, true),
                binding("BBBB000000000002", "a@x.test", Some("nonce-b"), false),
            ])
            .await
            .unwrap();

        let confirmed = store.confirm_userid("BBBB000000000002", "nonce-b").await.unwrap();
        assert!(confirmed.verified);
        assert_eq!(confirmed.nonce, None);

        // The previous winner for the same address was cleared in the same step.
        let old = store
            .get_userid(UserIdQuery::by_key_id("AAAA000000000001"))
            .await
            .unwrap()
            .unwrap();
        assert!(!old.verified);

        // The nonce is single-use.
        assert!(matches!(
            store.confirm_userid("BBBB000000000002", "nonce-b").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn purge_spares_verified_and_recent_keys() {
        let store = MemoryStore::new();
        store.insert_key(key("AAAA000000000001")).await.unwrap();
        store.insert_key(key("BBBB000000000002")).await.unwrap();
        store
            .insert_userids(vec![
                binding("AAAA000000000001", "a@x.test", None, true),
                binding("BBBB000000000002", "b@x.test", Some("n"), false),
            ])
            .await
            .unwrap();

        // Nothing is old enough yet.
        let removed = store.purge_unverified(Utc::now() - Duration::days(14)).await.unwrap();
        assert_eq!(removed, 0);

        // With a future cutoff only the unverified key falls.
        let removed = store.purge_unverified(Utc::now() + Duration::days(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store
            .get_key(KeyQuery::by_key_id("AAAA000000000001"))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_key(KeyQuery::by_key_id("BBBB000000000002"))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_userid(UserIdQuery::by_key_id("BBBB000000000002"))
            .await
            .unwrap()
            .is_none());
    }
}
