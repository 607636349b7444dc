/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! The Diesel/SQLite realization of the store interface. The verified
//! transition and batch writes run inside SQLite transactions; SQLite
//! serializes writers, which gives the linearizability the interface
//! demands.

use std::fmt::{Debug, Formatter};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::result::DatabaseErrorKind;
use diesel::sqlite::Sqlite;
use diesel::{
    BoolExpressionMethods, Connection, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl,
    TextExpressionMethods,
};
use keypost_lib::errors::StoreError;
use keypost_lib::store::{KeyQuery, Store, UserIdPatch, UserIdQuery};
use keypost_lib::types::{KeyRecord, UserIdBinding};
use tracing::{info, warn};

use crate::db::models::{KeyEntry, NewKeyEntry, NewUserIdEntry, UserIdEntry};
use crate::db::schema::{keys, userids};
use crate::db::KeypostDBConn;

embed_migrations!();

pub struct DieselSqliteStore {
    pub conn: KeypostDBConn,
}

impl Debug for DieselSqliteStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DieselSqliteStore")
    }
}

impl DieselSqliteStore {
    pub async fn migrate(&self) -> Result<(), StoreError> {
        self.conn
            .run(|connection| {
                info!("performing DB migrations");
                embedded_migrations::run_with_output(connection, &mut std::io::stdout())
                    .map_err(|e| StoreError::Failure(e.to_string()))
            })
            .await
    }
}

fn store_error(e: diesel::result::Error) -> StoreError {
    match e {
        diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => StoreError::Duplicate,
        diesel::result::Error::RollbackTransaction => {
            StoreError::Failure("batch write persisted fewer records than submitted".to_string())
        }
        other => StoreError::Failure(other.to_string()),
    }
}

fn select_keys(query: &KeyQuery) -> keys::BoxedQuery<'static, Sqlite> {
    let mut select = keys::table.into_boxed();
    if let Some(fingerprint) = &query.fingerprint {
        select = select.filter(keys::fingerprint.eq(fingerprint.clone()));
    }
    if let Some(key_id) = &query.key_id {
        select = select.filter(keys::key_id.eq(key_id.clone()));
    }
    if let Some(suffix) = &query.key_id_suffix {
        select = select.filter(keys::key_id.like(format!("%{}", suffix)));
    }
    select
}

fn select_userids(query: &UserIdQuery) -> userids::BoxedQuery<'static, Sqlite> {
    let mut select = userids::table.into_boxed();
    if let Some(key_id) = &query.key_id {
        select = select.filter(userids::key_id.eq(key_id.clone()));
    }
    if let Some(email) = &query.email {
        select = select.filter(userids::email.eq(email.clone()));
    }
    if let Some(nonce) = &query.nonce {
        select = select.filter(userids::nonce.eq(nonce.clone()));
    }
    if let Some(verified) = query.verified {
        select = select.filter(userids::verified.eq(verified));
    }
    select
}

fn into_bindings(entries: Vec<UserIdEntry>) -> Result<Vec<UserIdBinding>, StoreError> {
    entries.into_iter().map(UserIdEntry::into_binding).collect()
}

#[async_trait]
impl Store for DieselSqliteStore {
    async fn insert_key(&self, record: KeyRecord) -> Result<(), StoreError> {
        self.conn
            .run(move |connection| {
                diesel::insert_into(keys::table)
                    .values(NewKeyEntry::from_record(&record))
                    .execute(connection)
                    .map_err(store_error)?;
                Ok(())
            })
            .await
    }

    async fn get_key(&self, query: KeyQuery) -> Result<Option<KeyRecord>, StoreError> {
        self.conn
            .run(move |connection| {
                let entries: Vec<KeyEntry> = select_keys(&query)
                    .order(keys::id.asc())
                    .load(connection)
                    .map_err(store_error)?;
                if entries.len() > 1 {
                    warn!("ambiguous key query {:?}, returning first hit", query);
                }
                Ok(entries.into_iter().next().map(KeyRecord::from))
            })
            .await
    }

    async fn delete_keys(&self, query: KeyQuery) -> Result<(), StoreError> {
        self.conn
            .run(move |connection| {
                let entries: Vec<KeyEntry> = select_keys(&query).load(connection).map_err(store_error)?;
                let ids: Vec<i32> = entries.iter().map(|e| e.id).collect();
                diesel::delete(keys::table.filter(keys::id.eq_any(ids)))
                    .execute(connection)
                    .map_err(store_error)?;
                Ok(())
            })
            .await
    }

    async fn insert_userids(&self, bindings: Vec<UserIdBinding>) -> Result<(), StoreError> {
        self.conn
            .run(move |connection| {
                connection
                    .transaction::<_, diesel::result::Error, _>(|| {
                        let mut persisted = 0;
                        for binding in &bindings {
                            persisted += diesel::insert_into(userids::table)
                                .values(NewUserIdEntry::from_binding(binding))
                                .execute(connection)?;
                        }
                        if persisted != bindings.len() {
                            return Err(diesel::result::Error::RollbackTransaction);
                        }
                        Ok(())
                    })
                    .map_err(store_error)
            })
            .await
    }

    async fn get_userid(&self, query: UserIdQuery) -> Result<Option<UserIdBinding>, StoreError> {
        self.conn
            .run(move |connection| {
                let entry: Option<UserIdEntry> = select_userids(&query)
                    .order(userids::id.asc())
                    .first(connection)
                    .optional()
                    .map_err(store_error)?;
                entry.map(UserIdEntry::into_binding).transpose()
            })
            .await
    }

    async fn list_userids(&self, query: UserIdQuery) -> Result<Vec<UserIdBinding>, StoreError> {
        self.conn
            .run(move |connection| {
                let entries: Vec<UserIdEntry> = select_userids(&query)
                    .order(userids::id.asc())
                    .load(connection)
                    .map_err(store_error)?;
                into_bindings(entries)
            })
            .await
    }

    async fn update_userids(&self, selector: UserIdQuery, patch: UserIdPatch) -> Result<usize, StoreError> {
        self.conn
            .run(move |connection| {
                connection
                    .transaction::<usize, diesel::result::Error, _>(|| {
                        let entries: Vec<UserIdEntry> = select_userids(&selector).load(connection)?;
                        let ids: Vec<i32> = entries.iter().map(|e| e.id).collect();
                        let matched = ids.len();
                        if matched == 0 {
                            return Ok(0);
                        }
                        let target = userids::table.filter(userids::id.eq_any(ids));
                        let affected = match (patch.verified, patch.nonce.clone()) {
                            (Some(verified), Some(nonce)) => diesel::update(target)
                                .set((userids::verified.eq(verified), userids::nonce.eq(nonce)))
                                .execute(connection)?,
                            (Some(verified), None) => diesel::update(target)
                                .set(userids::verified.eq(verified))
                                .execute(connection)?,
                            (None, Some(nonce)) => diesel::update(target)
                                .set(userids::nonce.eq(nonce))
                                .execute(connection)?,
                            // An empty patch still reports how many rows
                            // the selector matched.
                            (None, None) => matched,
                        };
                        Ok(affected)
                    })
                    .map_err(store_error)
                    .and_then(|affected| {
                        if affected == 0 {
                            Err(StoreError::NotFound)
                        } else {
                            Ok(affected)
                        }
                    })
            })
            .await
    }

    async fn delete_userids(&self, query: UserIdQuery) -> Result<(), StoreError> {
        self.conn
            .run(move |connection| {
                let entries: Vec<UserIdEntry> = select_userids(&query).load(connection).map_err(store_error)?;
                let ids: Vec<i32> = entries.iter().map(|e| e.id).collect();
                diesel::delete(userids::table.filter(userids::id.eq_any(ids)))
                    .execute(connection)
                    .map_err(store_error)?;
                Ok(())
            })
            .await
    }

    async fn confirm_userid(&self, key_id: &str, nonce: &str) -> Result<UserIdBinding, StoreError> {
        let key_id = key_id.to_string();
        let nonce = nonce.to_string();
        self.conn
            .run(move |connection| {
                let confirmed: Option<UserIdEntry> = connection
                    .transaction::<_, diesel::result::Error, _>(|| {
                        let entry: Option<UserIdEntry> = userids::table
                            .filter(userids::key_id.eq(&key_id).and(userids::nonce.eq(&nonce)))
                            .first(connection)
                            .optional()?;
                        let entry = match entry {
                            Some(entry) => entry,
                            None => return Ok(None),
                        };
                        diesel::update(
                            userids::table
                                .filter(userids::email.eq(&entry.email).and(userids::verified.eq(true))),
                        )
                        .set(userids::verified.eq(false))
                        .execute(connection)?;
                        diesel::update(userids::table.filter(userids::id.eq(entry.id)))
                            .set((userids::verified.eq(true), userids::nonce.eq::<Option<String>>(None)))
                            .execute(connection)?;
                        userids::table.filter(userids::id.eq(entry.id)).first(connection).optional()
                    })
                    .map_err(store_error)?;
                confirmed
                    .ok_or(StoreError::NotFound)
                    .and_then(UserIdEntry::into_binding)
            })
            .await
    }

    async fn purge_unverified(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = cutoff.naive_utc();
        self.conn
            .run(move |connection| {
                connection
                    .transaction::<usize, diesel::result::Error, _>(|| {
                        let verified_owners: Vec<String> = userids::table
                            .filter(userids::verified.eq(true))
                            .select(userids::key_id)
                            .load(connection)?;
                        let victims: Vec<String> = keys::table
                            .filter(
                                keys::submitted_at
                                    .lt(cutoff)
                                    .and(keys::key_id.ne_all(verified_owners)),
                            )
                            .select(keys::key_id)
                            .load(connection)?;
                        diesel::delete(userids::table.filter(userids::key_id.eq_any(&victims)))
                            .execute(connection)?;
                        diesel::delete(keys::table.filter(keys::key_id.eq_any(&victims)))
                            .execute(connection)?;
                        Ok(victims.len())
                    })
                    .map_err(store_error)
            })
            .await
    }
}
