/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::convert::TryFrom;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// A lowercased RFC-5322 addr-spec.
#[derive(Eq, PartialEq, Hash, Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email {
    localpart: String,
    domain: String,
}

impl Email {
    pub fn parse(email: &str) -> Result<Self, ServiceError> {
        let email = email.trim().to_lowercase();
        let mut parts = email.split('@');
        let localpart = parts
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| ServiceError::MalformedQuery(format!("invalid email address: {}", email)))?;
        let domain = parts
            .next()
            .filter(|d| d.contains('.') && !d.starts_with('.') && !d.ends_with('.'))
            .ok_or_else(|| ServiceError::MalformedQuery(format!("invalid email address: {}", email)))?;
        match parts.next() {
            Some(_) => Err(ServiceError::MalformedQuery(format!(
                "invalid email address: {}",
                email
            ))),
            None => Ok(Self {
                localpart: localpart.to_string(),
                domain: domain.to_string(),
            }),
        }
    }

    pub fn parse_option(email: &str) -> Option<Email> {
        Self::parse(email).ok()
    }

    pub fn get_domain(&self) -> &str {
        &self.domain
    }

    pub fn get_email(&self) -> String {
        self.localpart.clone() + "@" + self.get_domain()
    }
}

impl TryFrom<String> for Email {
    type Error = ServiceError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Email::parse(&s)
    }
}

impl From<Email> for String {
    fn from(e: Email) -> Self {
        e.to_string()
    }
}

impl Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.get_email())
    }
}

/// One accepted public certificate.
///
/// `armored` preserves the submitted bytes; lookups answer with exactly
/// this string, never with a re-serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRecord {
    /// Uppercase hex V4 fingerprint, 40 characters.
    pub fingerprint: String,
    /// Uppercase hex low-order 16 characters of the fingerprint.
    pub key_id: String,
    /// Symbolic algorithm name (rsa, dsa, elgamal, ecdh, ecdsa, eddsa).
    pub algorithm: String,
    /// Bit length of the primary key.
    pub key_size: u32,
    /// Creation instant of the primary key packet.
    pub created: DateTime<Utc>,
    /// The submitted ASCII-armored block, byte-preserved.
    pub armored: String,
}

/// Server-side record of one user ID and its verification state.
#[derive(Debug, Clone, PartialEq)]
pub struct UserIdBinding {
    pub key_id: String,
    pub email: Email,
    pub name: String,
    /// Single-use challenge token; `None` once consumed.
    pub nonce: Option<String>,
    pub verified: bool,
}

/// A user ID extracted by the parser, not yet bound to a key record.
#[derive(Debug, Clone, PartialEq)]
pub struct UserIdDraft {
    pub email: Email,
    pub name: String,
    /// Whether the self-signature binding this user ID passed the policy
    /// check. Absence does not reject the key; control of the address is
    /// proven by mail either way.
    pub binding_valid: bool,
}

/// Parser output: a key record plus the user IDs found on it.
#[derive(Debug, Clone)]
pub struct ParsedKey {
    pub key: KeyRecord,
    pub user_ids: Vec<UserIdDraft>,
}

/// A lookup target, decoded from either wire dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupQuery {
    /// Full 40-character fingerprint.
    ByFingerprint(String),
    /// 16-character key id, or an 8-character short id for HKP clients.
    ByKeyId(String),
    ByEmail(Email),
}

impl LookupQuery {
    /// Decodes an HKP `search` parameter: an email address, or a hex
    /// fingerprint / key id with optional `0x` prefix.
    pub fn from_search(search: &str) -> Result<Self, ServiceError> {
        if search.contains('@') {
            return Ok(LookupQuery::ByEmail(Email::parse(search)?));
        }
        let hex = search.trim().to_ascii_uppercase();
        let hex = hex.trim_start_matches("0X");
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ServiceError::MalformedQuery(format!(
                "expected an email address, fingerprint or key id: {}",
                search
            )));
        }
        match hex.len() {
            8 | 16 => Ok(LookupQuery::ByKeyId(hex.to_string())),
            40 => Ok(LookupQuery::ByFingerprint(hex.to_string())),
            other => Err(ServiceError::MalformedQuery(format!(
                "hex string of unexpected length {}",
                other
            ))),
        }
    }

    pub fn from_key_id(key_id: &str) -> Result<Self, ServiceError> {
        let hex = key_id.trim().to_ascii_uppercase();
        if !matches!(hex.len(), 8 | 16) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ServiceError::MalformedQuery(format!(
                "key id must be 8 or 16 hex characters: {}",
                key_id
            )));
        }
        Ok(LookupQuery::ByKeyId(hex))
    }

    pub fn from_fingerprint(fingerprint: &str) -> Result<Self, ServiceError> {
        let hex = fingerprint.trim().to_ascii_uppercase();
        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ServiceError::MalformedQuery(format!(
                "fingerprint must be 40 hex characters: {}",
                fingerprint
            )));
        }
        Ok(LookupQuery::ByFingerprint(hex))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_lowercased() {
        let email = Email::parse("Alice.Example@X.TEST").unwrap();
        assert_eq!(email.get_email(), "alice.example@x.test");
        assert_eq!(email.get_domain(), "x.test");
    }

    #[test]
    fn email_rejects_garbage() {
        assert!(Email::parse("no-at-sign").is_err());
        assert!(Email::parse("two@at@signs").is_err());
        assert!(Email::parse("@x.test").is_err());
        assert!(Email::parse("alice@nodot").is_err());
    }

    #[test]
    fn search_string_decoding() {
        assert_eq!(
            LookupQuery::from_search("0xDEADBEEFDEADBEEF").unwrap(),
            LookupQuery::ByKeyId("DEADBEEFDEADBEEF".to_string())
        );
        assert_eq!(
            LookupQuery::from_search("deadbeef").unwrap(),
            LookupQuery::ByKeyId("DEADBEEF".to_string())
        );
        assert!(matches!(
            LookupQuery::from_search("0123456789ABCDEF0123456789ABCDEF01234567").unwrap(),
            LookupQuery::ByFingerprint(_)
        ));
        assert!(matches!(
            LookupQuery::from_search("alice@x.test").unwrap(),
            LookupQuery::ByEmail(_)
        ));
        assert!(LookupQuery::from_search("0xZZZZ").is_err());
        assert!(LookupQuery::from_search("ABCDEF").is_err());
    }
}
