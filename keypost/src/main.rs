/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;
#[macro_use]
extern crate rocket;

use std::{thread, time};

use keypost_lib::i18n::Locale;
use keypost_lib::mailer::{SmtpConnectionSecurity, SmtpMailer};
use keypost_lib::utils::random::random_string;
use rocket::fairing::AdHoc;
use rocket::http::Header;
use rocket::{Build, Orbit, Rocket};
use tracing::{info, warn};

use crate::db::diesel_sqlite::DieselSqliteStore;
use crate::db::KeypostDBConn;
use crate::holders::{CspConfig, ExternalURLHolder, InstanceSecretHolder, LocaleConfig, MailerHolder, PurgeConfig};

mod db;
mod error;
mod hkp_endpoint;
mod holders;
mod internal_endpoint;
mod locale;
mod rest_endpoint;

#[launch]
async fn rocket() -> Rocket<Build> {
    tracing_subscriber::fmt::init();

    rocket::build()
        .mount(
            "/",
            routes![
                hkp_endpoint::add,
                hkp_endpoint::lookup,
                rest_endpoint::submit,
                rest_endpoint::verify,
                rest_endpoint::verify_remove,
                rest_endpoint::get_key,
                rest_endpoint::delete_key,
                internal_endpoint::db_cleanup,
            ],
        )
        .attach(KeypostDBConn::fairing())
        .attach(AdHoc::on_ignite(
            "Configuration: External Url",
            |rocket: Rocket<Build>| async move {
                let external_url: String = rocket
                    .figment()
                    .extract_inner("external_url")
                    .expect("Field external_url missing!");
                rocket.manage(ExternalURLHolder(external_url))
            },
        ))
        .attach(AdHoc::on_ignite(
            "Configuration: Mailer",
            |rocket: Rocket<Build>| async move {
                let figment = rocket.figment();
                let host: Result<String, _> = figment.extract_inner("smtp_host");
                let mailer = match host {
                    Err(_) => {
                        warn!("no smtp_host configured, mail dispatch is disabled");
                        MailerHolder::NoopMailer()
                    }
                    Ok(host) => {
                        let smtp_security = match figment.extract_inner("smtp_security").unwrap_or("tls") {
                            "tls" => SmtpConnectionSecurity::Tls,
                            "starttls" => SmtpConnectionSecurity::StartTls,
                            "none" => SmtpConnectionSecurity::None,
                            other => panic!(
                                "Unknown value for smtp_security: {}. Known values: tls, starttls, none.",
                                other
                            ),
                        };
                        let port: u16 = figment.extract_inner("smtp_port").unwrap();
                        let user: String = figment.extract_inner("smtp_user").unwrap();
                        let pass: String = figment.extract_inner("smtp_pass").unwrap();
                        let from: String = figment.extract_inner("smtp_from").unwrap();
                        MailerHolder::SmtpMailer(SmtpMailer::new(&host, &user, &pass, port, &from, &smtp_security))
                    }
                };
                rocket.manage(mailer)
            },
        ))
        .attach(AdHoc::on_ignite(
            "Configuration: Locales",
            |rocket: Rocket<Build>| async move {
                let codes: Vec<String> = rocket
                    .figment()
                    .extract_inner("locales")
                    .unwrap_or_else(|_| vec!["en".to_string(), "de".to_string()]);
                let locales: Vec<Locale> = codes
                    .iter()
                    .map(|code| Locale::parse(code).unwrap_or_else(|| panic!("Unknown locale: {}", code)))
                    .collect();
                rocket.manage(LocaleConfig(locales))
            },
        ))
        .attach(AdHoc::on_ignite(
            "Configuration: Purge",
            |rocket: Rocket<Build>| async move {
                let days: i64 = rocket.figment().extract_inner("purge_days").unwrap_or(14);
                rocket.manage(PurgeConfig { days })
            },
        ))
        .attach(AdHoc::on_ignite("Configuration: CSP", |rocket: Rocket<Build>| async move {
            let enabled: bool = rocket.figment().extract_inner("csp").unwrap_or(true);
            rocket.manage(CspConfig { enabled })
        }))
        .attach(AdHoc::on_response("CSP Header", |request, response| {
            Box::pin(async move {
                if let Some(csp) = request.rocket().state::<CspConfig>() {
                    if csp.enabled {
                        response.set_header(Header::new("Content-Security-Policy", "default-src 'self'"));
                    }
                }
            })
        }))
        .attach(AdHoc::on_ignite("Instance Secret", |rocket: Rocket<Build>| async move {
            rocket.manage(InstanceSecretHolder(random_string(32)))
        }))
        .attach(AdHoc::on_ignite("Migrations", |rocket: Rocket<Build>| async move {
            let conn = KeypostDBConn::get_one(&rocket)
                .await
                .expect("Failed to get db connection for migrations.");
            let store = DieselSqliteStore { conn };
            store.migrate().await.expect("DB Migrations failed!");
            rocket
        }))
        .attach(AdHoc::on_liftoff("Database Maintenance", |rocket: &Rocket<Orbit>| {
            Box::pin(async move {
                let port: u16 = rocket.figment().extract_inner("port").expect("Port missing!");
                let internal_secret = rocket.state::<InstanceSecretHolder>().unwrap().0.clone();

                thread::spawn(move || {
                    let url = format!("http://127.0.0.1:{}/internal/db_cleanup", port);
                    loop {
                        match reqwest::blocking::Client::new()
                            .post(url.as_str())
                            .body(internal_secret.clone())
                            .send()
                        {
                            Ok(_) => info!("database maintenance performed"),
                            Err(e) => warn!("database maintenance failed: {}", e),
                        };
                        thread::sleep(time::Duration::from_secs(60 * 60 * 12))
                    }
                });
            })
        }))
}
