/*
 * Copyright (c) 2026. Keypost Developers. Keypost Keyserver. GPL-3.0-only.
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::io::Write;

use anyhow::anyhow;
use sequoia_openpgp::armor::{Kind, Writer};
use sequoia_openpgp::cert::Cert;
use sequoia_openpgp::serialize::SerializeInto;
use sequoia_openpgp::PacketPile;

pub const ARMOR_HEADER: &str = "-----BEGIN PGP";

pub fn is_armored(input: &str) -> bool {
    input.trim_start().starts_with(ARMOR_HEADER)
}

pub fn export_armored_cert(cert: &Cert) -> Result<String, anyhow::Error> {
    let serialized = cert.armored().export_to_vec()?;
    String::from_utf8(serialized).map_err(|e| anyhow!(e))
}

/// Serializes several certificates into one armored block.
pub fn export_armored_certs(certs: &[Cert]) -> Result<String, anyhow::Error> {
    let mut collected_packets = Vec::new();
    for cert in certs {
        let mut packets = cert.clone().into_packets().collect();
        collected_packets.append(&mut packets);
    }

    let serialized = PacketPile::from(collected_packets).export_to_vec()?;

    let mut writer = Writer::new(Vec::new(), Kind::PublicKey)?;
    writer.write_all(serialized.as_slice())?;
    let serialized = writer.finalize()?;

    Ok(String::from_utf8(serialized)?)
}
