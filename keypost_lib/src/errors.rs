/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

use thiserror::Error;

/// Failure kinds surfaced by the store layer.
///
/// The store never self-heals; compensation on partial failure is the
/// calling service's responsibility.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("a record with the same natural key already exists")]
    Duplicate,
    #[error("no record matched the selector")]
    NotFound,
    #[error("store failure: {0}")]
    Failure(String),
}

/// Failure kinds surfaced by the domain services.
///
/// The HTTP adapters map these onto response statuses; the variants
/// correspond to the 400 family, 404, 304/409 and 500 respectively.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("input is not an ASCII-armored OpenPGP key block")]
    InvalidArmor,
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),
    #[error("{algorithm} primary key of {bits} bits is below the accepted minimum")]
    KeyTooShort { algorithm: String, bits: u32 },
    #[error("certificate contains no user ID with a usable email address")]
    NoUserIds,
    #[error("malformed query: {0}")]
    MalformedQuery(String),
    #[error("not found")]
    NotFound,
    #[error("a key with this key id and verified user IDs already exists")]
    AlreadyExists,
    #[error("store failure: {0}")]
    StoreFailure(String),
    #[error("mail delivery failed: {0}")]
    MailerFailure(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// True for the kinds caused by the submitted input rather than the
    /// server state.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ServiceError::InvalidArmor
                | ServiceError::InvalidCertificate(_)
                | ServiceError::KeyTooShort { .. }
                | ServiceError::NoUserIds
                | ServiceError::MalformedQuery(_)
        )
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate => ServiceError::AlreadyExists,
            StoreError::NotFound => ServiceError::NotFound,
            StoreError::Failure(msg) => ServiceError::StoreFailure(msg),
        }
    }
}
