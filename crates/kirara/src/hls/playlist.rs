use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;

use crate::error::{KiraraError, KiraraResult};

static ATTRIBUTE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Z0-9-]+)=("[^"]*"|[^,]*)"#).unwrap());

/// A media playlist, with every URL already resolved against the playlist location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistDescriptor {
    /// `#EXT-X-MAP` of fragmented MP4 playlists.
    pub init_segment_url: Option<String>,
    pub encryption: Option<EncryptionDescriptor>,
    /// Media segments in playback order.
    pub segments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionDescriptor {
    pub key_url: String,
    pub iv: Option<[u8; 16]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantStream {
    pub url: String,
    pub bandwidth: u64,
    pub resolution: Option<(u32, u32)>,
}

/// Everything up to and including the final `/` of the playlist URL.
pub fn base_url(playlist_url: &str) -> &str {
    match playlist_url.rfind('/') {
        Some(index) => &playlist_url[..=index],
        None => "",
    }
}

/// Absolute references are kept as is, anything else is appended to `base`.
///
/// This is plain concatenation: `..` and root-relative references are not normalized.
pub fn resolve_url(reference: &str, base: &str) -> String {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        reference.to_string()
    } else {
        format!("{base}{reference}")
    }
}

fn parse_attributes(list: &str) -> HashMap<&str, &str> {
    ATTRIBUTE_REGEX
        .captures_iter(list)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str();
            let value = caps.get(2)?.as_str();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((key, value))
        })
        .collect()
}

fn parse_iv(iv: &str) -> KiraraResult<[u8; 16]> {
    let hex = iv
        .strip_prefix("0x")
        .or_else(|| iv.strip_prefix("0X"))
        .unwrap_or(iv);
    if hex.is_empty() || hex.len() > 32 {
        return Err(KiraraError::InvalidIv(iv.to_string()));
    }
    u128::from_str_radix(hex, 16)
        .map(u128::to_be_bytes)
        .map_err(|_| KiraraError::InvalidIv(iv.to_string()))
}

/// Parse a media playlist.
///
/// Only the first `METHOD=AES-128` key is used for the whole playlist. Key rotation
/// is not supported.
pub fn parse_playlist(content: &str, playlist_url: &str) -> KiraraResult<PlaylistDescriptor> {
    let base = base_url(playlist_url);
    let mut playlist = PlaylistDescriptor::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(attributes) = line.strip_prefix("#EXT-X-MAP:") {
            if playlist.init_segment_url.is_some() {
                continue;
            }
            if let Some(uri) = parse_attributes(attributes).get("URI") {
                playlist.init_segment_url = Some(resolve_url(uri, base));
            }
        } else if let Some(attributes) = line.strip_prefix("#EXT-X-KEY:") {
            let attributes = parse_attributes(attributes);
            if attributes.get("METHOD") != Some(&"AES-128") {
                continue;
            }
            if playlist.encryption.is_some() {
                log::warn!("Multiple AES-128 keys found. Only the first key will be used.");
                continue;
            }
            let Some(uri) = attributes.get("URI") else {
                log::warn!("Ignored AES-128 key without URI: {line}");
                continue;
            };
            let iv = attributes.get("IV").map(|iv| parse_iv(iv)).transpose()?;
            playlist.encryption = Some(EncryptionDescriptor {
                key_url: resolve_url(uri, base),
                iv,
            });
        } else if !line.starts_with('#') {
            playlist.segments.push(resolve_url(line, base));
        }
    }

    Ok(playlist)
}

pub fn is_master_playlist(content: &str) -> bool {
    content
        .lines()
        .any(|line| line.trim_start().starts_with("#EXT-X-STREAM-INF:"))
}

/// Parse the `#EXT-X-STREAM-INF` entries of a master playlist.
pub fn parse_master_playlist(content: &str, playlist_url: &str) -> Vec<VariantStream> {
    let base = base_url(playlist_url);
    let mut variants = Vec::new();
    let mut pending: Option<(u64, Option<(u32, u32)>)> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(attributes) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            let attributes = parse_attributes(attributes);
            let bandwidth = attributes
                .get("BANDWIDTH")
                .and_then(|b| b.parse().ok())
                .unwrap_or_default();
            let resolution = attributes.get("RESOLUTION").and_then(|r| {
                let (width, height) = r.split_once('x')?;
                Some((width.parse().ok()?, height.parse().ok()?))
            });
            pending = Some((bandwidth, resolution));
        } else if !line.starts_with('#') {
            if let Some((bandwidth, resolution)) = pending.take() {
                variants.push(VariantStream {
                    url: resolve_url(line, base),
                    bandwidth,
                    resolution,
                });
            }
        }
    }

    variants
}

/// Widest resolution first, then highest bandwidth.
pub fn select_best_variant(variants: &[VariantStream]) -> Option<&VariantStream> {
    variants.iter().max_by(|a, b| {
        let width_a = a.resolution.map(|r| r.0).unwrap_or_default();
        let width_b = b.resolution.map(|r| r.0).unwrap_or_default();
        width_a
            .cmp(&width_b)
            .then_with(|| a.bandwidth.cmp(&b.bandwidth))
    })
}
