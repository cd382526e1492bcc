//! JSON envelope exchanged with clients. Binary fields travel as hex, a
//! leading `0x` is accepted on input.

use crate::utils::decode_hex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::ops::Deref;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl Deref for HexBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_hex(&s).map(HexBytes).map_err(de::Error::custom)
    }
}

/// Request and response body for every endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Handler-level challenge token; unrelated to the signing token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auth_data: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<HexBytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<HexBytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<HexBytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_key: Option<HexBytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_key: Option<HexBytes>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response: Vec<String>,
}

impl Message {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}
