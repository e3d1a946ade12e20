//! Decryption of megacloud `sources` payloads.
//!
//! The payload is base64 of three stacked layers. Each layer is keyed by the
//! derived key with the layer number appended and undoes, in order: a seeded
//! shift over printable ASCII, a columnar transposition and a seeded
//! substitution. The plaintext carries a 4-digit length prefix.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{CoreError, CoreResult};

const SERVICE: &str = "megacloud";
const LAYERS: u32 = 3;
const PRINTABLE_START: u8 = 32;
const PRINTABLE_LEN: usize = 95;
const MASK_31: u64 = 0x7FFF_FFFF;
const MASK_32: u64 = 0xFFFF_FFFF;
const MOD_63: u128 = 0x7FFF_FFFF_FFFF_FFFF;

fn printable() -> [u8; PRINTABLE_LEN] {
    let mut out = [0u8; PRINTABLE_LEN];
    for (b, slot) in (PRINTABLE_START..).zip(out.iter_mut()) {
        *slot = b;
    }
    out
}

fn printable_index(b: u8) -> Option<usize> {
    (PRINTABLE_START..PRINTABLE_START + 95)
        .contains(&b)
        .then(|| usize::from(b - PRINTABLE_START))
}

struct Lcg(u64);

impl Lcg {
    fn seeded(key: &[u8]) -> Self {
        let seed = key
            .iter()
            .fold(0u64, |h, &b| (h * 31 + u64::from(b)) & MASK_32);
        Self(seed)
    }

    fn next(&mut self, n: usize) -> usize {
        self.0 = (self.0 * 1_103_515_245 + 12345) & MASK_31;
        if n == 0 {
            return 0;
        }
        usize::try_from(self.0 % n as u64).unwrap_or(0)
    }
}

/// Derives the layer key from the published key and the page's client token.
pub(super) fn derive_key(megacloud_key: &str, client_key: &str) -> Vec<u8> {
    let mut temp: Vec<u8> = megacloud_key
        .bytes()
        .chain(client_key.bytes())
        .collect();

    // h' = h*31 + (h<<7) - h + c, reduced mod 2^63-1 as we go.
    let hash = temp
        .iter()
        .fold(0u128, |h, &b| (h * 158 + u128::from(b)) % MOD_63);
    let hash = u64::try_from(hash).unwrap_or(0);

    for b in &mut temp {
        *b ^= 247;
    }

    if !temp.is_empty() {
        let len = temp.len() as u64;
        let pivot = usize::try_from(hash % len).unwrap_or(0).saturating_add(5).min(temp.len());
        temp.rotate_left(pivot);
    }

    let reversed_client: Vec<u8> = client_key.bytes().rev().collect();
    let mut out = Vec::with_capacity(temp.len() + reversed_client.len());
    for i in 0..temp.len().max(reversed_client.len()) {
        if let Some(&b) = temp.get(i) {
            out.push(b);
        }
        if let Some(&b) = reversed_client.get(i) {
            out.push(b);
        }
    }

    let max_len = 96 + usize::try_from(hash % 33).unwrap_or(0);
    out.truncate(max_len);

    for b in &mut out {
        *b = *b % 95 + PRINTABLE_START;
    }
    out
}

fn seeded_shuffle(key: &[u8]) -> [u8; PRINTABLE_LEN] {
    let mut rng = Lcg::seeded(key);
    let mut table = printable();
    for i in (1..PRINTABLE_LEN).rev() {
        let j = rng.next(i + 1);
        table.swap(i, j);
    }
    table
}

fn columnar(src: &[u8], key: &[u8]) -> Vec<u8> {
    if src.is_empty() || key.is_empty() {
        return src.to_vec();
    }
    let cols = key.len();
    let rows = src.len().div_ceil(cols);
    let mut matrix = vec![b' '; rows * cols];

    let mut order: Vec<(u8, usize)> = key.iter().copied().zip(0..).collect();
    order.sort_by_key(|&(ch, _)| ch);

    let mut input = src.iter();
    'outer: for (_, col) in order {
        for row in 0..rows {
            let Some(&b) = input.next() else {
                break 'outer;
            };
            matrix[row * cols + col] = b;
        }
    }
    matrix
}

fn reverse_layer(data: &[u8], layer_key: &[u8]) -> Vec<u8> {
    let table = printable();
    let mut rng = Lcg::seeded(layer_key);

    let shifted: Vec<u8> = data
        .iter()
        .map(|&c| match printable_index(c) {
            Some(idx) => {
                let shift = rng.next(PRINTABLE_LEN);
                table[(idx + PRINTABLE_LEN - shift) % PRINTABLE_LEN]
            }
            None => c,
        })
        .collect();

    let transposed = columnar(&shifted, layer_key);

    let substitution = seeded_shuffle(layer_key);
    let mut reverse = [None::<u8>; 256];
    for (i, &from) in substitution.iter().enumerate() {
        reverse[usize::from(from)] = Some(table[i]);
    }

    transposed
        .into_iter()
        .map(|c| reverse[usize::from(c)].unwrap_or(c))
        .collect()
}

/// Decrypts a base64 `sources` payload into the playlist URL.
pub fn decrypt(src: &str, client_key: &str, megacloud_key: &str) -> CoreResult<String> {
    let key = derive_key(megacloud_key, client_key);

    let mut data = STANDARD
        .decode(src.trim())
        .map_err(|e| CoreError::parse(SERVICE, e))?;

    for layer in (1..=LAYERS).rev() {
        let mut layer_key = key.clone();
        layer_key.extend_from_slice(layer.to_string().as_bytes());
        data = reverse_layer(&data, &layer_key);
    }

    if data.len() < 4 {
        return Err(CoreError::parse(SERVICE, "decrypted data too short"));
    }
    let prefix = std::str::from_utf8(&data[..4]).map_err(|e| CoreError::parse(SERVICE, e))?;
    let len: usize = prefix
        .parse()
        .map_err(|_| CoreError::parse(SERVICE, "invalid length prefix"))?;
    let body = data
        .get(4..4 + len)
        .ok_or_else(|| CoreError::parse(SERVICE, "length prefix exceeds data"))?;

    String::from_utf8(body.to_vec()).map_err(|e| CoreError::parse(SERVICE, e))
}

/// Strips JSON string quoting around a raw `sources` value.
pub fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();
    let quoted = trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')));
    if !quoted {
        return trimmed.to_string();
    }
    serde_json::from_str::<String>(trimmed)
        .unwrap_or_else(|_| trimmed[1..trimmed.len() - 1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columnar_fills_columns_in_key_order() {
        assert_eq!(columnar(b"abcdef", b"ba"), b"daebfc".to_vec());
        assert_eq!(columnar(b"abc", b"ab"), b"acb ".to_vec());
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut table = seeded_shuffle(b"some key");
        table.sort_unstable();
        assert_eq!(table, printable());
    }

    #[test]
    fn derived_key_is_printable_and_bounded() {
        let key = derive_key("megacloud-published-key", "client-token-1234567890");
        assert!(!key.is_empty());
        assert!(key.len() <= 96 + 32);
        assert!(key.iter().all(|b| (32..127).contains(b)));
    }

    #[test]
    fn derived_key_is_deterministic() {
        assert_eq!(derive_key("a", "b"), derive_key("a", "b"));
        assert_ne!(derive_key("a", "b"), derive_key("a", "c"));
    }

    #[test]
    fn invalid_base64_is_a_parse_error() {
        assert!(matches!(
            decrypt("!!!", "c", "m"),
            Err(CoreError::Parse { .. })
        ));
    }

    #[test]
    fn unquote_handles_json_strings() {
        assert_eq!(unquote(r#""abc\/def""#), "abc/def");
        assert_eq!(unquote("'abc'"), "abc");
        assert_eq!(unquote("plain"), "plain");
    }
}
