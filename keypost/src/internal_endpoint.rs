/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

use chrono::{Duration, Utc};
use keypost_lib::store::Store;
use rocket::http::Status;
use rocket::response::status;
use rocket::State;
use tracing::info;

use crate::db::diesel_sqlite::DieselSqliteStore;
use crate::db::KeypostDBConn;
use crate::holders::{InstanceSecretHolder, PurgeConfig};

/// Purges keys that stayed unverified past the configured age. Guarded
/// by the per-instance secret so only the maintenance loop can call it.
#[post("/internal/db_cleanup", data = "<secret>")]
#[tracing::instrument(skip(conn, secret, instance_secret))]
pub async fn db_cleanup(
    secret: String,
    conn: KeypostDBConn,
    purge_config: &State<PurgeConfig>,
    instance_secret: &State<InstanceSecretHolder>,
) -> Result<String, status::Custom<String>> {
    if instance_secret.inner().0 != secret {
        return Err(status::Custom(
            Status::Forbidden,
            "invalid instance secret".to_string(),
        ));
    }
    let store = DieselSqliteStore { conn };
    let cutoff = Utc::now() - Duration::days(purge_config.days);
    let removed = store
        .purge_unverified(cutoff)
        .await
        .map_err(|e| status::Custom(Status::InternalServerError, e.to_string()))?;
    info!("db cleanup removed {} unverified keys", removed);
    Ok(format!("removed {} unverified keys", removed))
}
