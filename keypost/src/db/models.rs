/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

use chrono::{DateTime, NaiveDateTime, Utc};
use keypost_lib::errors::StoreError;
use keypost_lib::types::{Email, KeyRecord, UserIdBinding};

use crate::db::schema::{keys, userids};

#[derive(Queryable, Debug)]
pub struct KeyEntry {
    pub id: i32,
    pub fingerprint: String,
    pub key_id: String,
    pub algorithm: String,
    pub key_size: i32,
    pub created: NaiveDateTime,
    pub armored: String,
    pub submitted_at: NaiveDateTime,
}

impl From<KeyEntry> for KeyRecord {
    fn from(entry: KeyEntry) -> Self {
        KeyRecord {
            fingerprint: entry.fingerprint,
            key_id: entry.key_id,
            algorithm: entry.algorithm,
            key_size: entry.key_size as u32,
            created: DateTime::from_utc(entry.created, Utc),
            armored: entry.armored,
        }
    }
}

#[derive(Insertable, Debug)]
#[table_name = "keys"]
pub struct NewKeyEntry {
    pub fingerprint: String,
    pub key_id: String,
    pub algorithm: String,
    pub key_size: i32,
    pub created: NaiveDateTime,
    pub armored: String,
    pub submitted_at: NaiveDateTime,
}

impl NewKeyEntry {
    pub fn from_record(record: &KeyRecord) -> Self {
        NewKeyEntry {
            fingerprint: record.fingerprint.clone(),
            key_id: record.key_id.clone(),
            algorithm: record.algorithm.clone(),
            key_size: record.key_size as i32,
            created: record.created.naive_utc(),
            armored: record.armored.clone(),
            submitted_at: Utc::now().naive_utc(),
        }
    }
}

#[derive(Queryable, Debug)]
pub struct UserIdEntry {
    pub id: i32,
    pub key_id: String,
    pub email: String,
    pub name: String,
    pub nonce: Option<String>,
    pub verified: bool,
}

impl UserIdEntry {
    pub fn into_binding(self) -> Result<UserIdBinding, StoreError> {
        Ok(UserIdBinding {
            key_id: self.key_id,
            email: Email::parse(&self.email)
                .map_err(|_| StoreError::Failure(format!("stored email is unparseable: {}", self.email)))?,
            name: self.name,
            nonce: self.nonce,
            verified: self.verified,
        })
    }
}

#[derive(Insertable, Debug)]
#[table_name = "userids"]
pub struct NewUserIdEntry {
    pub key_id: String,
    pub email: String,
    pub name: String,
    pub nonce: Option<String>,
    pub verified: bool,
}

impl NewUserIdEntry {
    pub fn from_binding(binding: &UserIdBinding) -> Self {
        NewUserIdEntry {
            key_id: binding.key_id.clone(),
            email: binding.email.get_email(),
            name: binding.name.clone(),
            nonce: binding.nonce.clone(),
            verified: binding.verified,
        }
    }
}
