use std::collections::BTreeMap;

use bytes::Bytes;

use crate::bencode::{decode, encode, Value};

use super::error::PeerError;

/// Extended message id `0` is reserved for the extension handshake.
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// The extension name for peer exchange (BEP-11).
pub const UT_PEX: &str = "ut_pex";

/// Our locally chosen id for incoming `ut_pex` messages.
pub const LOCAL_UT_PEX_ID: u8 = 1;

/// The extension handshake payload (BEP-10): a dictionary whose `m` key
/// maps extension names to the ids the sender wants to receive them under.
#[derive(Debug, Clone, Default)]
pub struct ExtensionHandshake {
    pub extensions: BTreeMap<String, u8>,
    pub client: Option<String>,
}

impl ExtensionHandshake {
    /// The handshake this engine sends: `ut_pex` under [`LOCAL_UT_PEX_ID`].
    pub fn ours() -> Self {
        let mut extensions = BTreeMap::new();
        extensions.insert(UT_PEX.to_string(), LOCAL_UT_PEX_ID);
        Self {
            extensions,
            client: Some(concat!("bitflood/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut m = BTreeMap::new();
        for (name, id) in &self.extensions {
            m.insert(
                Bytes::copy_from_slice(name.as_bytes()),
                Value::Int(*id as i64),
            );
        }

        let mut dict = BTreeMap::new();
        dict.insert(Bytes::from_static(b"m"), Value::Dict(m));
        if let Some(client) = &self.client {
            dict.insert(Bytes::from_static(b"v"), Value::string(client));
        }

        Bytes::from(encode(&Value::Dict(dict)))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PeerError> {
        let value =
            decode(payload).map_err(|_| PeerError::MalformedMessage("extension handshake"))?;
        if value.as_dict().is_none() {
            return Err(PeerError::MalformedMessage("extension handshake"));
        }

        let mut hs = Self::default();
        if let Some(m) = value.get(b"m").and_then(Value::as_dict) {
            for (name, id) in m {
                let (Ok(name), Some(id)) = (std::str::from_utf8(name), id.as_int()) else {
                    continue;
                };
                // id 0 means the extension is disabled
                if (1..=255).contains(&id) {
                    hs.extensions.insert(name.to_string(), id as u8);
                }
            }
        }
        hs.client = value.get(b"v").and_then(Value::as_str).map(String::from);
        Ok(hs)
    }

    /// The id the remote wants `ut_pex` messages delivered under.
    pub fn ut_pex_id(&self) -> Option<u8> {
        self.extensions.get(UT_PEX).copied()
    }
}
