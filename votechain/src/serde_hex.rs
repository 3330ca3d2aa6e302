//! Hex encodings for use in `#[serde(with)]`

use serde::{de, ser, Deserialize, Deserializer, Serializer};

fn decode<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    hex::decode(s).map_err(de::Error::custom)
}

/// Arbitrary byte buffers
pub mod hex_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        decode(deserializer)
    }
}

/// Fixed 32 byte values (digests, scalars, compressed points)
pub mod hex_32 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let bytes = decode(deserializer)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| de::Error::invalid_length(bytes.len(), &"32 bytes"))
    }
}

/// RSA public keys, as hex encoded PKCS#1 DER
pub mod rsa_public_key_hex {
    use super::*;
    use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
    use rsa::RsaPublicKey;

    pub fn serialize<S: Serializer>(key: &RsaPublicKey, serializer: S) -> Result<S::Ok, S::Error> {
        let der = key.to_pkcs1_der().map_err(ser::Error::custom)?;
        serializer.serialize_str(&hex::encode(der.as_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<RsaPublicKey, D::Error> {
        let bytes = decode(deserializer)?;
        RsaPublicKey::from_pkcs1_der(&bytes).map_err(de::Error::custom)
    }
}

/// X25519 public keys used for custodian share transport
pub mod x25519_public_key_hex {
    use super::*;
    use x25519_dalek::PublicKey;

    pub fn serialize<S: Serializer>(key: &PublicKey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key.as_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PublicKey, D::Error> {
        let bytes = hex_32::deserialize(deserializer)?;
        Ok(PublicKey::from(bytes))
    }
}
