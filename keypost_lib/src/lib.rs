/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! The public-key lifecycle engine of the Keypost keyserver.
//!
//! Submitted certificates are parsed into a [`types::KeyRecord`] plus one
//! [`types::UserIdBinding`] per email address, persisted through the
//! [`store::Store`] interface, and challenged by mail. Only user IDs whose
//! challenge has been answered are visible to lookups, and at most one
//! verified binding exists per email address across all keys.

pub mod errors;
pub mod i18n;
pub mod keys;
pub mod mailer;
pub mod parser;
pub mod store;
pub mod types;
pub mod userids;
pub mod utils;
