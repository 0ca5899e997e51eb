//! Unit Conversion Utilities
//!
//! Bitcoin amounts are integer satoshis everywhere in the core; these helpers
//! convert user-entered BTC strings without going through floating point.

/// Satoshis per Bitcoin
pub const SATS_PER_BTC: u64 = 100_000_000;

const BTC_DECIMALS: usize = 8;

/// Convert satoshis to BTC string (e.g., "0.00100000")
pub fn sats_to_btc_string(sats: u64) -> String {
    format!("{}.{:08}", sats / SATS_PER_BTC, sats % SATS_PER_BTC)
}

/// Convert satoshis to human-readable string
/// e.g., 100000 -> "100,000 sats (0.00100000 BTC)"
pub fn sats_to_display(sats: u64) -> String {
    format!("{} sats ({} BTC)", format_with_commas(sats), sats_to_btc_string(sats))
}

/// Parse a decimal BTC amount ("0.001", "1", ".5") into satoshis.
///
/// Returns `None` for negative values, more than 8 fractional digits, or
/// amounts that overflow `u64`.
pub fn parse_btc(s: &str) -> Option<u64> {
    let s = s.trim();
    let (whole, frac) = match s.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (s, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.len() > BTC_DECIMALS
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !frac.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let whole_sats = if whole.is_empty() {
        0
    } else {
        whole.parse::<u64>().ok()?.checked_mul(SATS_PER_BTC)?
    };
    let frac_sats = if frac.is_empty() {
        0
    } else {
        format!("{:0<width$}", frac, width = BTC_DECIMALS).parse::<u64>().ok()?
    };

    whole_sats.checked_add(frac_sats)
}

/// Parse satoshi amount from string
pub fn parse_sats(s: &str) -> Option<u64> {
    s.trim().replace([',', '_'], "").parse().ok()
}

fn format_with_commas(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);

    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result
}
