use keypost_lib::i18n::Locale;
use keypost_lib::mailer::{Mailer, NoopMailer, SmtpMailer};

#[derive(Debug)]
pub struct ExternalURLHolder(pub(crate) String);

#[derive(Debug)]
pub struct InstanceSecretHolder(pub(crate) String);

/// Enabled locales, in configuration order.
#[derive(Debug)]
pub struct LocaleConfig(pub(crate) Vec<Locale>);

/// Age threshold after which unverified keys are purged.
#[derive(Debug)]
pub struct PurgeConfig {
    pub(crate) days: i64,
}

#[derive(Debug)]
pub struct CspConfig {
    pub(crate) enabled: bool,
}

#[derive(Debug)]
pub enum MailerHolder {
    NoopMailer(),
    SmtpMailer(SmtpMailer),
}

impl MailerHolder {
    pub(crate) fn get_mailer(&self) -> &dyn Mailer {
        if let MailerHolder::SmtpMailer(s) = self {
            s
        } else {
            &NoopMailer {}
        }
    }
}
