use keypost_lib::i18n::Locale;
use rocket::request::{FromRequest, Outcome};
use rocket::Request;

use crate::holders::LocaleConfig;

/// The locale negotiated from the `Accept-Language` header against the
/// enabled locales, falling back to English.
#[derive(Debug, Clone, Copy)]
pub struct RequestLocale(pub Locale);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestLocale {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let enabled = request
            .rocket()
            .state::<LocaleConfig>()
            .map(|config| config.0.as_slice())
            .unwrap_or(&[Locale::En]);
        let header = request.headers().get_one("Accept-Language");
        Outcome::Success(RequestLocale(Locale::negotiate(header, enabled)))
    }
}
