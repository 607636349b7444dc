/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Typed persistence over the two collections `key` and `userid`.
//!
//! Queries are equality predicate maps; a `None` field does not
//! constrain the match. The trait is implemented by the Diesel/SQLite
//! store in the server binary and by [`memory::MemoryStore`].

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::StoreError;
use crate::types::{KeyRecord, UserIdBinding};

pub mod memory;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyQuery {
    pub fingerprint: Option<String>,
    pub key_id: Option<String>,
    /// Matches the trailing characters of the key id. Exists solely for
    /// 8-character HKP short ids.
    pub key_id_suffix: Option<String>,
}

impl KeyQuery {
    pub fn by_fingerprint(fingerprint: &str) -> Self {
        KeyQuery {
            fingerprint: Some(fingerprint.to_string()),
            ..Default::default()
        }
    }

    pub fn by_key_id(key_id: &str) -> Self {
        KeyQuery {
            key_id: Some(key_id.to_string()),
            ..Default::default()
        }
    }

    pub fn by_key_id_suffix(suffix: &str) -> Self {
        KeyQuery {
            key_id_suffix: Some(suffix.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserIdQuery {
    pub key_id: Option<String>,
    pub email: Option<String>,
    pub nonce: Option<String>,
    pub verified: Option<bool>,
}

impl UserIdQuery {
    pub fn by_key_id(key_id: &str) -> Self {
        UserIdQuery {
            key_id: Some(key_id.to_string()),
            ..Default::default()
        }
    }

    pub fn by_email(email: &str) -> Self {
        UserIdQuery {
            email: Some(email.to_string()),
            ..Default::default()
        }
    }

    pub fn by_nonce(key_id: &str, nonce: &str) -> Self {
        UserIdQuery {
            key_id: Some(key_id.to_string()),
            nonce: Some(nonce.to_string()),
            ..Default::default()
        }
    }

    pub fn verified(mut self, verified: bool) -> Self {
        self.verified = Some(verified);
        self
    }
}

/// Field updates applied to every binding matched by a selector.
#[derive(Debug, Clone, Default)]
pub struct UserIdPatch {
    pub verified: Option<bool>,
    /// `Some(None)` clears the nonce in the same update that changes the
    /// verification state.
    pub nonce: Option<Option<String>>,
}

#[async_trait]
pub trait Store: Debug + Send + Sync {
    /// Fails with [`StoreError::Duplicate`] when a record with the same
    /// key id or fingerprint exists.
    async fn insert_key(&self, record: KeyRecord) -> Result<(), StoreError>;

    /// Returns the first match, if any. Implementations log when an
    /// ambiguous suffix query hits more than one record.
    async fn get_key(&self, query: KeyQuery) -> Result<Option<KeyRecord>, StoreError>;

    /// Idempotent bulk removal.
    async fn delete_keys(&self, query: KeyQuery) -> Result<(), StoreError>;

    /// All-or-nothing batch insert; a partial write surfaces as
    /// [`StoreError::Failure`] and the caller compensates.
    async fn insert_userids(&self, bindings: Vec<UserIdBinding>) -> Result<(), StoreError>;

    async fn get_userid(&self, query: UserIdQuery) -> Result<Option<UserIdBinding>, StoreError>;

    async fn list_userids(&self, query: UserIdQuery) -> Result<Vec<UserIdBinding>, StoreError>;

    /// Applies the patch to every match in a single operation observable
    /// to concurrent readers. Fails with [`StoreError::NotFound`] when
    /// the selector matches nothing; an empty patch writes nothing but
    /// still reports the number of matches.
    async fn update_userids(&self, selector: UserIdQuery, patch: UserIdPatch) -> Result<usize, StoreError>;

    /// Idempotent bulk removal.
    async fn delete_userids(&self, query: UserIdQuery) -> Result<(), StoreError>;

    /// The verified transition, linearizable as one unit: consume the
    /// nonce of the binding matching `(key_id, nonce)`, mark it verified,
    /// and clear the verified flag of any other binding with the same
    /// email. Fails with [`StoreError::NotFound`] when the nonce does not
    /// match, including when it was concurrently consumed.
    async fn confirm_userid(&self, key_id: &str, nonce: &str) -> Result<UserIdBinding, StoreError>;

    /// Maintenance: removes keys submitted before `cutoff` that have no
    /// verified binding, along with their bindings. Returns the number of
    /// keys removed.
    async fn purge_unverified(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}
