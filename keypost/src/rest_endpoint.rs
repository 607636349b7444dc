/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! The REST surface under `/api/v1/key`.

use chrono::{DateTime, Utc};
use keypost_lib::errors::ServiceError;
use keypost_lib::i18n::confirmation_text;
use keypost_lib::keys::{KeyService, PublishedKey, RemovalTarget};
use keypost_lib::mailer::{MailTemplate, NoopMailer};
use keypost_lib::types::{Email, LookupQuery};
use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::State;
use serde::{Deserialize, Serialize};

use crate::db::diesel_sqlite::DieselSqliteStore;
use crate::db::KeypostDBConn;
use crate::error::ApiError;
use crate::holders::{ExternalURLHolder, MailerHolder};
use crate::locale::RequestLocale;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct KeySubmitRequest {
    public_key_armored: String,
}

/// `POST /api/v1/key`: accepts a key for verification, 202.
#[post("/api/v1/key", data = "<submission>", format = "json")]
#[tracing::instrument(skip(conn, submission))]
pub async fn submit(
    conn: KeypostDBConn,
    mailer: &State<MailerHolder>,
    external_url: &State<ExternalURLHolder>,
    locale: RequestLocale,
    submission: Json<KeySubmitRequest>,
) -> Result<status::Custom<String>, ApiError> {
    let store = DieselSqliteStore { conn };
    let service = KeyService::new(&store, mailer.inner().get_mailer());
    service
        .submit(&submission.public_key_armored, &external_url.0, locale.0)
        .await?;
    Ok(status::Custom(
        Status::Accepted,
        "Verification mails have been dispatched.".to_string(),
    ))
}

#[derive(FromForm, Debug)]
pub struct ChallengeParams {
    #[field(name = "keyId")]
    key_id: String,
    nonce: String,
}

/// `GET /api/v1/key?op=verify`: answers a submission challenge and
/// renders a localized confirmation.
#[get("/api/v1/key?op=verify&<params..>")]
#[tracing::instrument(skip(conn, params))]
pub async fn verify(
    conn: KeypostDBConn,
    locale: RequestLocale,
    params: ChallengeParams,
) -> Result<String, ApiError> {
    let store = DieselSqliteStore { conn };
    let mailer = NoopMailer {};
    let service = KeyService::new(&store, &mailer);
    service.verify(&params.key_id, &params.nonce).await?;
    Ok(confirmation_text(MailTemplate::VerifyKey, locale.0).to_string())
}

/// `GET /api/v1/key?op=verifyRemove`: answers a removal challenge; the
/// key and all its bindings are deleted.
#[get("/api/v1/key?op=verifyRemove&<params..>")]
#[tracing::instrument(skip(conn, params))]
pub async fn verify_remove(
    conn: KeypostDBConn,
    locale: RequestLocale,
    params: ChallengeParams,
) -> Result<String, ApiError> {
    let store = DieselSqliteStore { conn };
    let mailer = NoopMailer {};
    let service = KeyService::new(&store, &mailer);
    service.verify_remove(&params.key_id, &params.nonce).await?;
    Ok(confirmation_text(MailTemplate::VerifyRemove, locale.0).to_string())
}

#[derive(FromForm, Debug)]
pub struct LookupParams {
    op: Option<String>,
    #[field(name = "keyId")]
    key_id: Option<String>,
    fingerprint: Option<String>,
    email: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserIdDetails {
    name: String,
    email: String,
    verified: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct KeyDetails {
    key_id: String,
    fingerprint: String,
    user_ids: Vec<UserIdDetails>,
    created: DateTime<Utc>,
    algorithm: String,
    key_size: u32,
    public_key_armored: String,
}

impl From<PublishedKey> for KeyDetails {
    fn from(published: PublishedKey) -> Self {
        KeyDetails {
            key_id: published.key.key_id,
            fingerprint: published.key.fingerprint,
            user_ids: published
                .user_ids
                .into_iter()
                .map(|binding| UserIdDetails {
                    name: binding.name,
                    email: binding.email.get_email(),
                    verified: binding.verified,
                })
                .collect(),
            created: published.key.created,
            algorithm: published.key.algorithm,
            key_size: published.key.key_size,
            public_key_armored: published.key.armored,
        }
    }
}

/// `GET /api/v1/key?keyId=|fingerprint=|email=`: JSON details of a
/// published key.
#[get("/api/v1/key?<params..>", rank = 3)]
#[tracing::instrument(skip(conn))]
pub async fn get_key(conn: KeypostDBConn, params: LookupParams) -> Result<Json<KeyDetails>, ApiError> {
    if let Some(op) = &params.op {
        return Err(ServiceError::MalformedQuery(format!("unsupported operation: {}", op)).into());
    }
    let query = match (&params.key_id, &params.fingerprint, &params.email) {
        (Some(key_id), None, None) => LookupQuery::from_key_id(key_id),
        (None, Some(fingerprint), None) => LookupQuery::from_fingerprint(fingerprint),
        (None, None, Some(email)) => Email::parse(email).map(LookupQuery::ByEmail),
        _ => Err(ServiceError::MalformedQuery(
            "exactly one of keyId, fingerprint or email is required".to_string(),
        )),
    }
    .map_err(ApiError::from)?;

    let store = DieselSqliteStore { conn };
    let mailer = NoopMailer {};
    let service = KeyService::new(&store, &mailer);
    let published = service.get(query).await?;
    Ok(Json(KeyDetails::from(published)))
}

#[derive(FromForm, Debug)]
pub struct DeleteParams {
    #[field(name = "keyId")]
    key_id: Option<String>,
    email: Option<String>,
}

/// `DELETE /api/v1/key?keyId=|email=`: requests removal, 202; the
/// targeted bindings lose their verified state immediately and receive
/// removal mails.
#[delete("/api/v1/key?<params..>")]
#[tracing::instrument(skip(conn))]
pub async fn delete_key(
    conn: KeypostDBConn,
    mailer: &State<MailerHolder>,
    external_url: &State<ExternalURLHolder>,
    locale: RequestLocale,
    params: DeleteParams,
) -> Result<status::Custom<String>, ApiError> {
    let target = match (&params.key_id, &params.email) {
        (Some(key_id), None) => {
            let key_id = key_id.trim().to_ascii_uppercase();
            if key_id.len() != 16 || !key_id.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ServiceError::MalformedQuery(format!(
                    "key id must be 16 hex characters: {}",
                    key_id
                ))
                .into());
            }
            RemovalTarget::ByKeyId(key_id)
        }
        (None, Some(email)) => RemovalTarget::ByEmail(Email::parse(email).map_err(ApiError::from)?),
        _ => {
            return Err(ServiceError::MalformedQuery(
                "exactly one of keyId or email is required".to_string(),
            )
            .into())
        }
    };
    let store = DieselSqliteStore { conn };
    let service = KeyService::new(&store, mailer.inner().get_mailer());
    service.request_remove(target, &external_url.0, locale.0).await?;
    Ok(status::Custom(
        Status::Accepted,
        "Removal mails have been dispatched.".to_string(),
    ))
}
