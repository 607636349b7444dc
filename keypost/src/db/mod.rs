/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

use rocket_sync_db_pools::database;

pub mod diesel_sqlite;
pub mod models;
pub mod schema;

#[database("keypost")]
pub struct KeypostDBConn(diesel::SqliteConnection);
