// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wire encodings shared by the IoT payload schemas: binary fields are
//! lowercase hex, timestamps are the RFC 3339 strings `chrono` already
//! produces for `DateTime<Utc>` via `serde`.

use data_encoding::HEXLOWER;
use serde::{Deserialize, Deserializer, Serializer};

/// `#[serde(with = "crate::codec::hex_bytes")]` for a `Vec<u8>` field that
/// must round-trip as lowercase hex on the wire.
pub mod hex_bytes {
    use super::{Deserialize, Deserializer, Serializer, HEXLOWER};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&HEXLOWER.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        HEXLOWER
            .decode(s.as_bytes())
            .map_err(|e| serde::de::Error::custom(format!("invalid hex: {e}")))
    }
}
