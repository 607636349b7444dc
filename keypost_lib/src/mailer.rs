/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::fmt::{Debug, Formatter};
use std::str::FromStr;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use tracing::info;

use crate::errors::ServiceError;
use crate::i18n::{mail_text, Locale};
use crate::types::Email;

/// The two challenge mails the server sends. Every call delivers one
/// message; callers are responsible for not sending redundantly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailTemplate {
    VerifyKey,
    VerifyRemove,
}

impl MailTemplate {
    /// The `op` query parameter of the confirmation link.
    pub fn op(self) -> &'static str {
        match self {
            MailTemplate::VerifyKey => "verify",
            MailTemplate::VerifyRemove => "verifyRemove",
        }
    }
}

#[async_trait]
pub trait Mailer: Debug + Send + Sync {
    async fn send_verification(
        &self,
        template: MailTemplate,
        locale: Locale,
        recipient: &Email,
        key_id: &str,
        nonce: &str,
        origin: &str,
    ) -> Result<(), ServiceError>;
}

pub fn confirmation_url(template: MailTemplate, origin: &str, key_id: &str, nonce: &str) -> String {
    format!(
        "{}/api/v1/key?op={}&keyId={}&nonce={}",
        origin.trim_end_matches('/'),
        template.op(),
        key_id,
        nonce
    )
}

pub enum SmtpConnectionSecurity {
    None,
    Tls,
    StartTls,
}

pub struct SmtpMailer {
    connection: SmtpTransport,
    from: Mailbox,
}

impl Debug for SmtpMailer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SmtpMailer: from: {:?}", self.from)
    }
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        user: &str,
        pass: &str,
        port: u16,
        from: &str,
        connection_security: &SmtpConnectionSecurity,
    ) -> Self {
        let connection = match connection_security {
            SmtpConnectionSecurity::None => SmtpTransport::builder_dangerous(host),
            SmtpConnectionSecurity::Tls => SmtpTransport::relay(host).expect("SMTP relay setup failed"),
            SmtpConnectionSecurity::StartTls => {
                SmtpTransport::starttls_relay(host).expect("SMTP STARTTLS relay setup failed")
            }
        }
        .credentials(Credentials::new(user.to_string(), pass.to_string()))
        .port(port)
        .build();

        SmtpMailer {
            connection,
            from: Mailbox::new(None, Address::from_str(from).expect("invalid SMTP sender address")),
        }
    }

    fn send_mail(&self, recipient: &Email, subject: &str, body: &str) -> Result<(), ServiceError> {
        let to = Mailbox::new(
            None,
            Address::from_str(recipient.to_string().as_str())
                .map_err(|e| ServiceError::MailerFailure(e.to_string()))?,
        );
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| ServiceError::MailerFailure(e.to_string()))?;
        self.connection
            .send(&message)
            .map_err(|e| ServiceError::MailerFailure(e.to_string()))?;
        info!("sent mail: to=<{}> subject={}", recipient, subject);
        Ok(())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_verification(
        &self,
        template: MailTemplate,
        locale: Locale,
        recipient: &Email,
        key_id: &str,
        nonce: &str,
        origin: &str,
    ) -> Result<(), ServiceError> {
        let url = confirmation_url(template, origin, key_id, nonce);
        let (subject, body) = mail_text(template, locale, key_id, &url);
        self.send_mail(recipient, &subject, &body)
    }
}

/// Swallows every mail. Used when mail dispatch is disabled.
#[derive(Debug)]
pub struct NoopMailer {}

#[async_trait]
impl Mailer for NoopMailer {
    async fn send_verification(
        &self,
        _template: MailTemplate,
        _locale: Locale,
        _recipient: &Email,
        _key_id: &str,
        _nonce: &str,
        _origin: &str,
    ) -> Result<(), ServiceError> {
        Ok(())
    }
}
