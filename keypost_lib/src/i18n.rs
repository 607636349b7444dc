/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Locale negotiation and the localized texts used in mails and
//! confirmation pages.

use serde::Deserialize;

use crate::mailer::MailTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    En,
    De,
}

impl Locale {
    pub fn code(self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::De => "de",
        }
    }

    /// Accepts a bare language code or a full language tag ("de-DE").
    pub fn parse(tag: &str) -> Option<Locale> {
        let primary = tag.trim().split(|c| c == '-' || c == '_').next()?;
        match primary.to_ascii_lowercase().as_str() {
            "en" => Some(Locale::En),
            "de" => Some(Locale::De),
            _ => None,
        }
    }

    /// First match of the `Accept-Language` header against the enabled
    /// locales, in header order. Falls back to English.
    pub fn negotiate(accept_language: Option<&str>, enabled: &[Locale]) -> Locale {
        if let Some(header) = accept_language {
            for entry in header.split(',') {
                let tag = entry.split(';').next().unwrap_or("");
                if let Some(locale) = Locale::parse(tag) {
                    if enabled.contains(&locale) {
                        return locale;
                    }
                }
            }
        }
        Locale::En
    }
}

/// Subject and body of a challenge mail, with the confirmation link
/// embedded in the body.
pub fn mail_text(template: MailTemplate, locale: Locale, key_id: &str, url: &str) -> (String, String) {
    match (template, locale) {
        (MailTemplate::VerifyKey, Locale::En) => (
            "Verify your email address".to_string(),
            format!(
                "\
                A public key for this email address was uploaded to the keyserver.\n\
                Key ID: {}\n\
                \n\
                To publish the key for this address, confirm by opening this link:\n\
                {}\n\
                \n\
                If you did not upload the key, simply ignore this message.\n\
                ",
                key_id, url
            ),
        ),
        (MailTemplate::VerifyKey, Locale::De) => (
            "Bestätigen Sie Ihre E-Mail-Adresse".to_string(),
            format!(
                "\
                Ein öffentlicher Schlüssel für diese E-Mail-Adresse wurde auf den Keyserver hochgeladen.\n\
                Schlüssel-ID: {}\n\
                \n\
                Um den Schlüssel für diese Adresse zu veröffentlichen, bestätigen Sie über diesen Link:\n\
                {}\n\
                \n\
                Falls Sie den Schlüssel nicht hochgeladen haben, ignorieren Sie diese Nachricht einfach.\n\
                ",
                key_id, url
            ),
        ),
        (MailTemplate::VerifyRemove, Locale::En) => (
            "Confirm the removal of your key".to_string(),
            format!(
                "\
                The removal of the key with ID {} from the keyserver was requested.\n\
                \n\
                To delete the key and all its published addresses, confirm by opening this link:\n\
                {}\n\
                \n\
                If you did not request the removal, simply ignore this message.\n\
                ",
                key_id, url
            ),
        ),
        (MailTemplate::VerifyRemove, Locale::De) => (
            "Bestätigen Sie die Löschung Ihres Schlüssels".to_string(),
            format!(
                "\
                Die Löschung des Schlüssels mit der ID {} vom Keyserver wurde beantragt.\n\
                \n\
                Um den Schlüssel und alle veröffentlichten Adressen zu löschen, bestätigen Sie über diesen Link:\n\
                {}\n\
                \n\
                Falls Sie die Löschung nicht beantragt haben, ignorieren Sie diese Nachricht einfach.\n\
                ",
                key_id, url
            ),
        ),
    }
}

/// Body of the page shown after a successful verification step.
pub fn confirmation_text(template: MailTemplate, locale: Locale) -> &'static str {
    match (template, locale) {
        (MailTemplate::VerifyKey, Locale::En) => "Email address verified. The key is now published for this address.",
        (MailTemplate::VerifyKey, Locale::De) => {
            "E-Mail-Adresse bestätigt. Der Schlüssel ist für diese Adresse nun veröffentlicht."
        }
        (MailTemplate::VerifyRemove, Locale::En) => "Key removed from the keyserver.",
        (MailTemplate::VerifyRemove, Locale::De) => "Schlüssel vom Keyserver entfernt.",
    }
}
