/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! The orchestrator. All state lives in the store; this service
//! sequences parser, store, user-ID service and mailer per operation and
//! compensates for partial writes.

use tracing::{info, warn};

use crate::errors::{ServiceError, StoreError};
use crate::i18n::Locale;
use crate::mailer::{MailTemplate, Mailer};
use crate::parser;
use crate::store::{KeyQuery, Store, UserIdQuery};
use crate::types::{Email, KeyRecord, LookupQuery, UserIdBinding};
use crate::userids::UserIdService;

/// Target selector for a removal request.
#[derive(Debug, Clone)]
pub enum RemovalTarget {
    ByKeyId(String),
    ByEmail(Email),
}

/// A publicly visible key: the record plus its verified bindings.
#[derive(Debug, Clone)]
pub struct PublishedKey {
    pub key: KeyRecord,
    pub user_ids: Vec<UserIdBinding>,
}

pub struct KeyService<'a> {
    store: &'a dyn Store,
    user_ids: UserIdService<'a>,
    mailer: &'a dyn Mailer,
}

impl<'a> KeyService<'a> {
    pub fn new(store: &'a dyn Store, mailer: &'a dyn Mailer) -> Self {
        KeyService {
            store,
            user_ids: UserIdService::new(store),
            mailer,
        }
    }

    /// Accepts an armored certificate and challenges every contained
    /// email address.
    ///
    /// A key id that already exists with a verified binding is rejected;
    /// resubmitting a still-pending key replaces it and reissues all
    /// challenges. Partial store writes are compensated by deleting the
    /// key again; mail dispatch succeeds as long as one recipient could
    /// be reached.
    #[tracing::instrument(skip(self, armored))]
    pub async fn submit(&self, armored: &str, origin: &str, locale: Locale) -> Result<(), ServiceError> {
        let parsed = parser::parse_submission(armored)?;
        let key_id = parsed.key.key_id.clone();

        if let Some(existing) = self.store.get_key(KeyQuery::by_key_id(&key_id)).await? {
            if self.user_ids.get_verified(&existing.key_id).await?.is_some() {
                return Err(ServiceError::AlreadyExists);
            }
            // Still pending: replace wholesale, invalidating the old nonces.
            info!("replacing pending key {}", existing.key_id);
            self.user_ids.remove(&existing.key_id).await?;
            self.store.delete_keys(KeyQuery::by_key_id(&existing.key_id)).await?;
        }

        match self.store.insert_key(parsed.key).await {
            Ok(()) => {}
            // A concurrent submit of the same key id won the insert.
            Err(StoreError::Duplicate) => return Err(ServiceError::AlreadyExists),
            Err(e) => return Err(ServiceError::StoreFailure(e.to_string())),
        }

        let bindings = match self.user_ids.batch(&key_id, parsed.user_ids).await {
            Ok(bindings) => bindings,
            Err(e) => {
                self.compensate(&key_id).await;
                return Err(e);
            }
        };

        let mut dispatched = 0;
        for binding in &bindings {
            let nonce = binding.nonce.as_deref().unwrap_or_default();
            match self
                .mailer
                .send_verification(MailTemplate::VerifyKey, locale, &binding.email, &key_id, nonce, origin)
                .await
            {
                Ok(()) => dispatched += 1,
                Err(e) => warn!("verification mail to <{}> failed: {}", binding.email, e),
            }
        }
        if dispatched == 0 {
            self.compensate(&key_id).await;
            return Err(ServiceError::MailerFailure(
                "no verification mail could be dispatched".to_string(),
            ));
        }
        info!(
            "accepted key {} with {} pending user IDs, {} mails dispatched",
            key_id,
            bindings.len(),
            dispatched
        );
        Ok(())
    }

    /// Rolls a failed submit back to nothing persisted.
    async fn compensate(&self, key_id: &str) {
        if let Err(e) = self.user_ids.remove(key_id).await {
            warn!("compensation failed to delete bindings of {}: {}", key_id, e);
        }
        if let Err(e) = self.store.delete_keys(KeyQuery::by_key_id(key_id)).await {
            warn!("compensation failed to delete key {}: {}", key_id, e);
        }
    }

    /// Answers a submission challenge; the key becomes publicly visible
    /// with its first verified binding.
    #[tracing::instrument(skip(self, nonce))]
    pub async fn verify(&self, key_id: &str, nonce: &str) -> Result<(), ServiceError> {
        let key_id = key_id.trim().to_ascii_uppercase();
        self.user_ids.verify(&key_id, nonce).await.map(|_| ())
    }

    /// Resolves a lookup to a publicly visible key. Keys without a single
    /// verified binding are not queryable.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, query: LookupQuery) -> Result<PublishedKey, ServiceError> {
        let key = match query {
            LookupQuery::ByFingerprint(fingerprint) => {
                self.store.get_key(KeyQuery::by_fingerprint(&fingerprint)).await?
            }
            LookupQuery::ByKeyId(key_id) => match key_id.len() {
                16 => self.store.get_key(KeyQuery::by_key_id(&key_id)).await?,
                8 => self.store.get_key(KeyQuery::by_key_id_suffix(&key_id)).await?,
                _ => {
                    return Err(ServiceError::MalformedQuery(format!(
                        "key id must be 8 or 16 hex characters: {}",
                        key_id
                    )))
                }
            },
            LookupQuery::ByEmail(email) => {
                let binding = self.user_ids.get_verified_by_emails(&[email]).await?;
                match binding {
                    Some(binding) => self.store.get_key(KeyQuery::by_key_id(&binding.key_id)).await?,
                    None => None,
                }
            }
        };
        let key = key.ok_or(ServiceError::NotFound)?;

        let user_ids = self
            .store
            .list_userids(UserIdQuery::by_key_id(&key.key_id).verified(true))
            .await?;
        if user_ids.is_empty() {
            // Pending keys stay invisible.
            return Err(ServiceError::NotFound);
        }
        Ok(PublishedKey { key, user_ids })
    }

    /// Challenges the removal of a key, addressed either by key id or by
    /// one of its email addresses. Every targeted binding loses its
    /// verified state immediately and receives a removal mail with a
    /// fresh nonce.
    #[tracing::instrument(skip(self))]
    pub async fn request_remove(
        &self,
        target: RemovalTarget,
        origin: &str,
        locale: Locale,
    ) -> Result<(), ServiceError> {
        let bindings = match &target {
            RemovalTarget::ByKeyId(key_id) => {
                let key_id = key_id.trim().to_ascii_uppercase();
                self.store.list_userids(UserIdQuery::by_key_id(&key_id)).await?
            }
            RemovalTarget::ByEmail(email) => self.store.list_userids(UserIdQuery::by_email(&email.get_email())).await?,
        };
        if bindings.is_empty() {
            return Err(ServiceError::NotFound);
        }

        let reissued = self.user_ids.reissue_for_removal(&bindings).await?;
        let mut dispatched = 0;
        for binding in &reissued {
            let nonce = binding.nonce.as_deref().unwrap_or_default();
            match self
                .mailer
                .send_verification(
                    MailTemplate::VerifyRemove,
                    locale,
                    &binding.email,
                    &binding.key_id,
                    nonce,
                    origin,
                )
                .await
            {
                Ok(()) => dispatched += 1,
                Err(e) => warn!("removal mail to <{}> failed: {}", binding.email, e),
            }
        }
        if dispatched == 0 {
            return Err(ServiceError::MailerFailure(
                "no removal mail could be dispatched".to_string(),
            ));
        }
        Ok(())
    }

    /// Answers a removal challenge: deletes the key record and all its
    /// bindings. Afterwards the nonce, the key and every binding are
    /// gone, so repeating the call yields `NotFound`.
    #[tracing::instrument(skip(self, nonce))]
    pub async fn verify_remove(&self, key_id: &str, nonce: &str) -> Result<(), ServiceError> {
        let key_id = key_id.trim().to_ascii_uppercase();
        let binding = self
            .store
            .get_userid(UserIdQuery::by_nonce(&key_id, nonce))
            .await?
            .ok_or(ServiceError::NotFound)?;
        info!("removing key {} after confirmation by <{}>", key_id, binding.email);
        self.store.delete_keys(KeyQuery::by_key_id(&key_id)).await?;
        self.user_ids.remove(&key_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sequoia_openpgp::cert::CertBuilder;

    use super::*;
    use crate::mailer::test_support::RecordingMailer;
    use crate::store::memory::MemoryStore;
    use crate::utils::armor;

    const ORIGIN: &str = "https://keys.example";

    fn armored_cert(user_ids: &[&str]) -> String {
        let mut builder = CertBuilder::new();
        for uid in user_ids {
            builder = builder.add_userid(*uid);
        }
        let (cert, _) = builder.generate().expect("cert generation");
        armor::export_armored_cert(&cert).expect("armor export")
    }

    async fn submit(
        store: &MemoryStore,
        mailer: &RecordingMailer,
        armored: &str,
    ) -> Result<(), ServiceError> {
        KeyService::new(store, mailer)
            .submit(armored, ORIGIN, Locale::En)
            .await
    }

    #[tokio::test]
    async fn happy_path_submit_verify_lookup() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        let armored = armored_cert(&["Alice <a@x.test>", "Alice Alt <a.alt@x.test>"]);

        submit(&store, &mailer, &armored).await.unwrap();
        assert_eq!(mailer.sent_count(), 2);

        let service = KeyService::new(&store, &mailer);

        // Pending keys are invisible on every axis.
        let email_query = LookupQuery::ByEmail(Email::parse("a@x.test").unwrap());
        assert!(matches!(
            service.get(email_query.clone()).await,
            Err(ServiceError::NotFound)
        ));

        // Answer the challenge for the first address only.
        let sent = mailer.sent.lock().unwrap().clone();
        let challenge = sent.iter().find(|m| m.recipient == "a@x.test").unwrap().clone();
        service.verify(&challenge.key_id, &challenge.nonce).await.unwrap();

        let published = service.get(email_query).await.unwrap();
        // Byte-identical round trip of the armored block.
        assert_eq!(published.key.armored, armored);
        assert_eq!(published.user_ids.len(), 1);
        assert_eq!(published.user_ids[0].email.get_email(), "a@x.test");

        // The sibling address stays unpublished until its own link is used.
        assert!(matches!(
            service
                .get(LookupQuery::ByEmail(Email::parse("a.alt@x.test").unwrap()))
                .await,
            Err(ServiceError::NotFound)
        ));

        // Key id and fingerprint lookups see the key now, short id included.
        let by_key_id = service
            .get(LookupQuery::ByKeyId(challenge.key_id.clone()))
            .await
            .unwrap();
        assert_eq!(by_key_id.key.armored, armored);
        let short = challenge.key_id[8..].to_string();
        let by_short_id = service.get(LookupQuery::ByKeyId(short)).await.unwrap();
        assert_eq!(by_short_id.key.key_id, challenge.key_id);
        let by_fingerprint = service
            .get(LookupQuery::ByFingerprint(by_key_id.key.fingerprint.clone()))
            .await
            .unwrap();
        assert_eq!(by_fingerprint.key.key_id, challenge.key_id);
    }

    #[tokio::test]
    async fn email_collision_moves_the_address_to_the_new_key() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();

        let first = armored_cert(&["Alice <a@x.test>", "Alice Alt <a.alt@x.test>"]);
        submit(&store, &mailer, &first).await.unwrap();
        let service = KeyService::new(&store, &mailer);
        let sent = mailer.sent.lock().unwrap().clone();
        for mail in &sent {
            service.verify(&mail.key_id, &mail.nonce).await.unwrap();
        }
        let first_key_id = sent[0].key_id.clone();

        let second = armored_cert(&["Alice <a@x.test>"]);
        submit(&store, &mailer, &second).await.unwrap();
        let sent = mailer.sent.lock().unwrap().clone();
        let challenge = sent.last().unwrap().clone();
        assert_ne!(challenge.key_id, first_key_id);
        service.verify(&challenge.key_id, &challenge.nonce).await.unwrap();

        // The address now resolves to the new key.
        let winner = service
            .get(LookupQuery::ByEmail(Email::parse("a@x.test").unwrap()))
            .await
            .unwrap();
        assert_eq!(winner.key.key_id, challenge.key_id);

        // The first key survives through its other verified address only.
        let survivor = service
            .get(LookupQuery::ByEmail(Email::parse("a.alt@x.test").unwrap()))
            .await
            .unwrap();
        assert_eq!(survivor.key.key_id, first_key_id);
        assert_eq!(survivor.user_ids.len(), 1);
    }

    #[tokio::test]
    async fn resubmission_of_pending_key_replaces_it() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        let armored = armored_cert(&["Alice <a@x.test>"]);

        submit(&store, &mailer, &armored).await.unwrap();
        let old_nonce = mailer.sent.lock().unwrap()[0].nonce.clone();

        submit(&store, &mailer, &armored).await.unwrap();
        assert_eq!(mailer.sent_count(), 2);
        let new = mailer.sent.lock().unwrap().last().unwrap().clone();
        assert_ne!(new.nonce, old_nonce);

        // The replaced key's nonce is dead.
        let service = KeyService::new(&store, &mailer);
        assert!(matches!(
            service.verify(&new.key_id, &old_nonce).await,
            Err(ServiceError::NotFound)
        ));
        service.verify(&new.key_id, &new.nonce).await.unwrap();
    }

    #[tokio::test]
    async fn resubmission_of_verified_key_conflicts_without_mails() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        let armored = armored_cert(&["Alice <a@x.test>"]);

        submit(&store, &mailer, &armored).await.unwrap();
        let service = KeyService::new(&store, &mailer);
        let challenge = mailer.sent.lock().unwrap()[0].clone();
        service.verify(&challenge.key_id, &challenge.nonce).await.unwrap();

        assert!(matches!(
            submit(&store, &mailer, &armored).await,
            Err(ServiceError::AlreadyExists)
        ));
        // No new challenge mail against the verified address.
        assert_eq!(mailer.sent_count(), 1);
    }

    #[tokio::test]
    async fn removal_flow_deletes_the_whole_key() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        let armored = armored_cert(&["Alice <a@x.test>", "Alice Alt <a.alt@x.test>"]);

        submit(&store, &mailer, &armored).await.unwrap();
        let service = KeyService::new(&store, &mailer);
        for mail in mailer.sent.lock().unwrap().clone() {
            service.verify(&mail.key_id, &mail.nonce).await.unwrap();
        }

        let email_query = LookupQuery::ByEmail(Email::parse("a@x.test").unwrap());
        service.get(email_query.clone()).await.unwrap();

        service
            .request_remove(
                RemovalTarget::ByEmail(Email::parse("a@x.test").unwrap()),
                ORIGIN,
                Locale::En,
            )
            .await
            .unwrap();

        // Visibility is revoked the moment removal is requested.
        assert!(matches!(service.get(email_query.clone()).await, Err(ServiceError::NotFound)));

        let removal = mailer.sent.lock().unwrap().last().unwrap().clone();
        assert_eq!(removal.template, MailTemplate::VerifyRemove);
        service.verify_remove(&removal.key_id, &removal.nonce).await.unwrap();

        // The entire key is gone, sibling bindings included.
        assert!(matches!(
            service
                .get(LookupQuery::ByEmail(Email::parse("a.alt@x.test").unwrap()))
                .await,
            Err(ServiceError::NotFound)
        ));
        assert!(matches!(
            service.get(LookupQuery::ByKeyId(removal.key_id.clone())).await,
            Err(ServiceError::NotFound)
        ));

        // The removal nonce is single-use as well.
        assert!(matches!(
            service.verify_remove(&removal.key_id, &removal.nonce).await,
            Err(ServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn removal_of_unknown_target_is_not_found() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        let service = KeyService::new(&store, &mailer);
        assert!(matches!(
            service
                .request_remove(
                    RemovalTarget::ByEmail(Email::parse("ghost@x.test").unwrap()),
                    ORIGIN,
                    Locale::En
                )
                .await,
            Err(ServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn malformed_submission_leaves_no_state_and_no_mail() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();

        assert!(matches!(
            submit(&store, &mailer, "garbage").await,
            Err(ServiceError::InvalidArmor)
        ));
        assert_eq!(mailer.sent_count(), 0);
        assert!(store
            .list_userids(UserIdQuery::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn total_mailer_failure_rolls_the_submission_back() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::failing();
        let armored = armored_cert(&["Alice <a@x.test>", "Alice Alt <a.alt@x.test>"]);

        assert!(matches!(
            submit(&store, &mailer, &armored).await,
            Err(ServiceError::MailerFailure(_))
        ));

        // Compensation removed both the key and its bindings.
        let parsed = parser::parse_submission(&armored).unwrap();
        assert!(store
            .get_key(KeyQuery::by_key_id(&parsed.key.key_id))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .list_userids(UserIdQuery::by_key_id(&parsed.key.key_id))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn partial_mailer_failure_keeps_the_submission() {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::failing_first(1);
        let armored = armored_cert(&["Alice <a@x.test>", "Alice Alt <a.alt@x.test>"]);

        submit(&store, &mailer, &armored).await.unwrap();
        assert_eq!(mailer.sent_count(), 1);

        let parsed = parser::parse_submission(&armored).unwrap();
        assert_eq!(
            store
                .list_userids(UserIdQuery::by_key_id(&parsed.key.key_id))
                .await
                .unwrap()
                .len(),
            2
        );
    }
}
