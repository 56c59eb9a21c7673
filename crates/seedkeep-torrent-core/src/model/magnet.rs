//! Magnet URI interpretation.

use std::fmt::Write as _;

use seedkeep_events::InfoHash;
use url::Url;

use crate::error::{TorrentError, TorrentResult};
use crate::model::TrackerEntry;

const BTIH_PREFIX: &str = "urn:btih:";
const BASE32_HASH_LEN: usize = 32;

/// Fields of a magnet URI the orchestrator cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    /// Original URI, passed through to the engine untouched.
    pub uri: String,
    /// Exact topic decoded to an info hash.
    pub info_hash: InfoHash,
    /// Display name (`dn`), already percent-decoded.
    pub display_name: Option<String>,
    /// Tracker URLs (`tr`), in declaration order.
    pub trackers: Vec<TrackerEntry>,
}

impl MagnetLink {
    /// Parse a magnet URI.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::InvalidMagnet`] when the scheme is not `magnet`
    /// or no `urn:btih:` exact topic is present.
    pub fn parse(uri: &str) -> TorrentResult<Self> {
        let url = Url::parse(uri.trim()).map_err(|_| TorrentError::InvalidMagnet {
            reason: "unparseable",
        })?;
        if url.scheme() != "magnet" {
            return Err(TorrentError::InvalidMagnet { reason: "scheme" });
        }

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" if info_hash.is_none() => {
                    if let Some(topic) = value.strip_prefix(BTIH_PREFIX) {
                        info_hash = decode_btih(topic);
                    }
                }
                "dn" if display_name.is_none() => display_name = Some(value.into_owned()),
                "tr" => {
                    let tier = u8::try_from(trackers.len()).unwrap_or(u8::MAX);
                    trackers.push(TrackerEntry::new(value.into_owned(), tier));
                }
                _ => {}
            }
        }

        let info_hash = info_hash.ok_or(TorrentError::InvalidMagnet {
            reason: "missing btih exact topic",
        })?;
        Ok(Self {
            uri: uri.trim().to_string(),
            info_hash,
            display_name,
            trackers,
        })
    }
}

fn decode_btih(topic: &str) -> Option<InfoHash> {
    if topic.len() == BASE32_HASH_LEN {
        let bytes = decode_base32(topic)?;
        let mut hex = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            let _ = write!(hex, "{byte:02x}");
        }
        return hex.parse().ok();
    }
    topic.parse().ok()
}

fn decode_base32(input: &str) -> Option<Vec<u8>> {
    let mut buffer: u64 = 0;
    let mut bits = 0_u32;
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    for ch in input.chars() {
        let value = match ch.to_ascii_uppercase() {
            upper @ 'A'..='Z' => u64::from(upper) - u64::from('A'),
            digit @ '2'..='7' => u64::from(digit) - u64::from('2') + 26,
            _ => return None,
        };
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(u8::try_from((buffer >> bits) & 0xff).ok()?);
        }
    }
    Some(out)
}
