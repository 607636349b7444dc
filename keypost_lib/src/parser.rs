/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sequoia_openpgp::cert::{Cert, CertParser};
use sequoia_openpgp::parse::Parse;
use sequoia_openpgp::policy::StandardPolicy;
use sequoia_openpgp::types::PublicKeyAlgorithm;
use tracing::warn;

use crate::errors::ServiceError;
use crate::types::{Email, KeyRecord, ParsedKey, UserIdDraft};
use crate::utils::armor;

/// Minimum accepted bit length for factoring/discrete-log primary keys.
/// Elliptic-curve primaries pass regardless.
pub const MINIMUM_KEY_BITS: u32 = 2048;

/// Parses one armored public certificate into a key record and its
/// user-ID drafts.
///
/// Rejects input without an armor header, input that does not contain
/// exactly one certificate, certificates carrying secret key material,
/// primaries below the policy minimum, and certificates without a single
/// user ID holding a parseable email address.
#[tracing::instrument(skip(armored))]
pub fn parse_submission(armored: &str) -> Result<ParsedKey, ServiceError> {
    if !armor::is_armored(armored) {
        return Err(ServiceError::InvalidArmor);
    }

    let mut certs = CertParser::from_bytes(armored.as_bytes())
        .map_err(|_| ServiceError::InvalidArmor)?
        .collect::<Result<Vec<Cert>, _>>()
        .map_err(|e| ServiceError::InvalidCertificate(e.to_string()))?;
    let cert = match (certs.pop(), certs.is_empty()) {
        (Some(cert), true) => cert,
        (Some(_), false) => {
            return Err(ServiceError::InvalidCertificate(
                "expected exactly one certificate".to_string(),
            ))
        }
        (None, _) => return Err(ServiceError::InvalidArmor),
    };

    if cert.is_tsk() {
        return Err(ServiceError::InvalidCertificate(
            "certificate contains secret key material".to_string(),
        ));
    }

    let primary = cert.primary_key().key();
    let algorithm = algorithm_name(primary.pk_algo()).to_string();
    let key_size = primary.mpis().bits().unwrap_or(0) as u32;
    check_primary_strength(&algorithm, key_size)?;

    let user_ids = extract_user_ids(&cert);
    if user_ids.is_empty() {
        return Err(ServiceError::NoUserIds);
    }

    let key = KeyRecord {
        fingerprint: cert.fingerprint().to_hex(),
        key_id: cert.keyid().to_hex(),
        algorithm,
        key_size,
        created: DateTime::<Utc>::from(primary.creation_time()),
        armored: armored.to_string(),
    };
    Ok(ParsedKey { key, user_ids })
}

/// Splits each user-ID packet into display name and lowercased email,
/// skipping packets without a parseable addr-spec and deduplicating by
/// email with the first occurrence winning.
fn extract_user_ids(cert: &Cert) -> Vec<UserIdDraft> {
    let policy = StandardPolicy::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut drafts = vec![];
    for uida in cert.userids() {
        let email = match uida.userid().email_normalized() {
            Ok(Some(e)) => e,
            _ => continue,
        };
        let email = match Email::parse(&email) {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !seen.insert(email.get_email()) {
            continue;
        }
        let name = uida.userid().name().unwrap_or_default().unwrap_or_default();
        let binding_valid = uida.binding_signature(&policy, None).is_ok();
        if !binding_valid {
            warn!(
                "accepting user ID <{}> on {} without a valid binding signature",
                email,
                cert.fingerprint().to_hex()
            );
        }
        drafts.push(UserIdDraft {
            email,
            name,
            binding_valid,
        });
    }
    drafts
}

fn check_primary_strength(algorithm: &str, bits: u32) -> Result<(), ServiceError> {
    match algorithm {
        "rsa" | "dsa" | "elgamal" if bits < MINIMUM_KEY_BITS => Err(ServiceError::KeyTooShort {
            algorithm: algorithm.to_string(),
            bits,
        }),
        _ => Ok(()),
    }
}

fn algorithm_name(algo: PublicKeyAlgorithm) -> &'static str {
    #[allow(deprecated)]
    match algo {
        PublicKeyAlgorithm::RSAEncryptSign
        | PublicKeyAlgorithm::RSAEncrypt
        | PublicKeyAlgorithm::RSASign => "rsa",
        PublicKeyAlgorithm::DSA => "dsa",
        PublicKeyAlgorithm::ElGamalEncrypt | PublicKeyAlgorithm::ElGamalEncryptSign => "elgamal",
        PublicKeyAlgorithm::ECDH => "ecdh",
        PublicKeyAlgorithm::ECDSA => "ecdsa",
        PublicKeyAlgorithm::EdDSA => "eddsa",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use sequoia_openpgp::cert::CertBuilder;
    use sequoia_openpgp::serialize::SerializeInto;

    use super::*;

    fn armored_cert(user_ids: &[&str]) -> String {
        let mut builder = CertBuilder::new();
        for uid in user_ids {
            builder = builder.add_userid(*uid);
        }
        let (cert, _) = builder.generate().expect("cert generation");
        armor::export_armored_cert(&cert).expect("armor export")
    }

    #[test]
    fn accepts_a_plain_certificate() {
        let armored = armored_cert(&["Alice <Alice@X.test>"]);
        let parsed = parse_submission(&armored).unwrap();

        assert_eq!(parsed.key.fingerprint.len(), 40);
        assert_eq!(parsed.key.key_id.len(), 16);
        assert!(parsed.key.fingerprint.ends_with(&parsed.key.key_id));
        assert_eq!(parsed.key.algorithm, "eddsa");
        assert_eq!(parsed.key.armored, armored);
        assert_eq!(parsed.user_ids.len(), 1);
        assert_eq!(parsed.user_ids[0].email.get_email(), "alice@x.test");
        assert_eq!(parsed.user_ids[0].name, "Alice");
        assert!(parsed.user_ids[0].binding_valid);
    }

    #[test]
    fn deduplicates_by_email_keeping_first() {
        let armored = armored_cert(&[
            "Alice <a@x.test>",
            "Alice at work <a@x.test>",
            "Alice Alt <a.alt@x.test>",
        ]);
        let parsed = parse_submission(&armored).unwrap();
        let emails: Vec<String> = parsed.user_ids.iter().map(|u| u.email.get_email()).collect();
        assert_eq!(emails, vec!["a@x.test", "a.alt@x.test"]);
        assert_eq!(parsed.user_ids[0].name, "Alice");
    }

    #[test]
    fn rejects_unarmored_input() {
        assert!(matches!(parse_submission("not a key"), Err(ServiceError::InvalidArmor)));
    }

    #[test]
    fn rejects_truncated_armor() {
        let result = parse_submission("-----BEGIN PGP PUBLIC KEY BLOCK-----\n\ngarbage\n");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_certificate_without_user_ids() {
        let (cert, _) = CertBuilder::new().generate().unwrap();
        let armored = armor::export_armored_cert(&cert).unwrap();
        assert!(matches!(parse_submission(&armored), Err(ServiceError::NoUserIds)));
    }

    #[test]
    fn rejects_user_ids_without_email() {
        let (cert, _) = CertBuilder::new().add_userid("Just A Name").generate().unwrap();
        let armored = armor::export_armored_cert(&cert).unwrap();
        assert!(matches!(parse_submission(&armored), Err(ServiceError::NoUserIds)));
    }

    #[test]
    fn rejects_secret_key_material() {
        let (cert, _) = CertBuilder::new().add_userid("Alice <a@x.test>").generate().unwrap();
        let tsk = cert.as_tsk().armored().to_vec().unwrap();
        let armored = String::from_utf8(tsk).unwrap();
        assert!(matches!(
            parse_submission(&armored),
            Err(ServiceError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn rejects_multiple_certificates() {
        let (first, _) = CertBuilder::new().add_userid("Alice <a@x.test>").generate().unwrap();
        let (second, _) = CertBuilder::new().add_userid("Bob <b@x.test>").generate().unwrap();
        let combined = armor::export_armored_certs(&[first, second]).unwrap();
        assert!(matches!(
            parse_submission(&combined),
            Err(ServiceError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn short_factoring_keys_are_rejected() {
        assert!(matches!(
            check_primary_strength("rsa", 1024),
            Err(ServiceError::KeyTooShort { bits: 1024, .. })
        ));
        assert!(check_primary_strength("rsa", 2048).is_ok());
        assert!(check_primary_strength("dsa", 1024).is_err());
        // Curve identifiers are small by nature and always pass.
        assert!(check_primary_strength("eddsa", 256).is_ok());
        assert!(check_primary_strength("ecdsa", 256).is_ok());
    }
}
