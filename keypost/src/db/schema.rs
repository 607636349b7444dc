/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

table! {
    keys (id) {
        id -> Integer,
        fingerprint -> Text,
        key_id -> Text,
        algorithm -> Text,
        key_size -> Integer,
        created -> Timestamp,
        armored -> Text,
        submitted_at -> Timestamp,
    }
}

table! {
    userids (id) {
        id -> Integer,
        key_id -> Text,
        email -> Text,
        name -> Text,
        nonce -> Nullable<Text>,
        verified -> Bool,
    }
}

allow_tables_to_appear_in_same_query!(keys, userids);
