/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! The legacy HKP surface: `/pks/lookup` and `/pks/add`.

use keypost_lib::errors::ServiceError;
use keypost_lib::keys::{KeyService, PublishedKey};
use keypost_lib::types::LookupQuery;
use rocket::form::Form;
use rocket::http::{ContentType, Status};
use rocket::response::status;
use rocket::State;

use crate::db::diesel_sqlite::DieselSqliteStore;
use crate::db::KeypostDBConn;
use crate::error::ApiError;
use crate::holders::{ExternalURLHolder, MailerHolder};
use crate::locale::RequestLocale;

#[derive(FromForm, Debug)]
pub struct KeySubmission {
    keytext: String,
}

/// `POST /pks/add`: 201 on acceptance, 304 when the key is already
/// published with verified user IDs, 400 on parse failures.
#[post("/pks/add", data = "<submission>")]
#[tracing::instrument(skip(conn, submission))]
pub async fn add(
    conn: KeypostDBConn,
    mailer: &State<MailerHolder>,
    external_url: &State<ExternalURLHolder>,
    locale: RequestLocale,
    submission: Form<KeySubmission>,
) -> Result<status::Custom<String>, ApiError> {
    let store = DieselSqliteStore { conn };
    let service = KeyService::new(&store, mailer.inner().get_mailer());
    match service
        .submit(&submission.keytext, &external_url.0, locale.0)
        .await
    {
        Ok(()) => Ok(status::Custom(
            Status::Created,
            "Key accepted. Verification mails have been dispatched.".to_string(),
        )),
        Err(ServiceError::AlreadyExists) => Ok(status::Custom(Status::NotModified, String::new())),
        Err(e) => Err(e.into()),
    }
}

/// `GET /pks/lookup?op=get|index&search=`: armored certificate or a
/// machine-readable index, both restricted to verified user IDs.
#[get("/pks/lookup?<op>&<search>")]
#[tracing::instrument(skip(conn))]
pub async fn lookup(
    conn: KeypostDBConn,
    op: &str,
    search: &str,
) -> Result<(ContentType, String), ApiError> {
    let query = LookupQuery::from_search(search).map_err(ApiError::from)?;
    let store = DieselSqliteStore { conn };
    // Lookups never send mail.
    let mailer = keypost_lib::mailer::NoopMailer {};
    let service = KeyService::new(&store, &mailer);
    let published = service.get(query).await?;
    match op {
        "get" => Ok((ContentType::Plain, published.key.armored)),
        "index" | "vindex" => Ok((ContentType::Plain, render_index(&published))),
        other => Err(ServiceError::MalformedQuery(format!("unsupported operation: {}", other)).into()),
    }
}

/// One `info`/`pub`/`uid` block in the colon-separated HKP index format.
fn render_index(published: &PublishedKey) -> String {
    let mut out = String::new();
    out.push_str("info:1:1\n");
    out.push_str(&format!(
        "pub:{}:{}:{}:{}::\n",
        published.key.fingerprint,
        algorithm_code(&published.key.algorithm),
        published.key.key_size,
        published.key.created.timestamp()
    ));
    for binding in &published.user_ids {
        let uid = if binding.name.is_empty() {
            format!("<{}>", binding.email)
        } else {
            format!("{} <{}>", binding.name, binding.email)
        };
        out.push_str(&format!("uid:{}:::\n", escape_uid(&uid)));
    }
    out
}

/// RFC 4880 public key algorithm number for the index `pub` line.
fn algorithm_code(algorithm: &str) -> u8 {
    match algorithm {
        "rsa" => 1,
        "elgamal" => 16,
        "dsa" => 17,
        "ecdh" => 18,
        "ecdsa" => 19,
        "eddsa" => 22,
        _ => 0,
    }
}

fn escape_uid(uid: &str) -> String {
    uid.replace('%', "%25").replace(':', "%3A")
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use keypost_lib::types::{Email, KeyRecord, UserIdBinding};

    use super::*;

    #[test]
    fn index_format_lists_verified_uids() {
        let published = PublishedKey {
            key: KeyRecord {
                fingerprint: "0123456789ABCDEF0123456789ABCDEF01234567".to_string(),
                key_id: "89ABCDEF01234567".to_string(),
                algorithm: "eddsa".to_string(),
                key_size: 256,
                created: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                armored: String::new(),
            },
            user_ids: vec![UserIdBinding {
                key_id: "89ABCDEF01234567".to_string(),
                email: Email::parse("a@x.test").unwrap(),
                name: "Alice: Example".to_string(),
                nonce: None,
                verified: true,
            }],
        };
        let index = render_index(&published);
        let lines: Vec<&str> = index.lines().collect();
        assert_eq!(lines[0], "info:1:1");
        assert_eq!(
            lines[1],
            "pub:0123456789ABCDEF0123456789ABCDEF01234567:22:256:1700000000::"
        );
        assert_eq!(lines[2], "uid:Alice%3A Example <a@x.test>:::");
    }
}
