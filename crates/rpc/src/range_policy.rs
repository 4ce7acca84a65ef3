//! Retry-range policy for oversized historical queries.
//!
//! When a provider rejects a block range, its error body often names a range
//! it would accept; parsing that avoids a blind halving cascade. Parsing is
//! best-effort by design: any failure degrades to bisection, never to a
//! propagated error.

/// Extracts a provider-suggested `[safe_start, safe_end]` from an error body.
///
/// Recognizes the bracketed-pair form used by Alchemy ("this block range
/// should work: [0x64, 0x1388]") with hex or decimal bounds, digit group
/// separators tolerated.
pub fn parse_suggested_range(message: &str) -> Option<(u64, u64)> {
    let open = message.find('[')?;
    let close = message[open..].find(']')? + open;
    let inner = &message[open + 1..close];

    let (first, second) = inner.split_once(',')?;
    let start = parse_block_number(first)?;
    let end = parse_block_number(second)?;

    (start <= end).then_some((start, end))
}

fn parse_block_number(raw: &str) -> Option<u64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|&c| c != '_' && c != ',' && !c.is_whitespace())
        .collect();

    if let Some(hex) = cleaned.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else {
        cleaned.parse().ok()
    }
}

/// Plans the sub-ranges to retry after a range-too-large rejection of
/// `[from, to]`.
///
/// Preference order: the provider-suggested prefix, then bisection, then a
/// ten-way split for oversized-response bodies. Returns an empty plan when
/// the range is a single block and cannot shrink further.
pub fn plan_range_split(error_message: &str, from: u64, to: u64) -> Vec<(u64, u64)> {
    debug_assert!(from <= to);

    if let Some((start, end)) = parse_suggested_range(error_message) {
        // Only usable if it is a strict prefix of what we asked for.
        let end = end.min(to);
        if start == from && end < to {
            return vec![(from, end), (end + 1, to)];
        }
    }

    if from == to {
        return Vec::new();
    }

    let lower = error_message.to_lowercase();
    if lower.contains("response size") || lower.contains("150mb") {
        return split_even(from, to, 10);
    }

    let mid = from + (to - from) / 2;
    vec![(from, mid), (mid + 1, to)]
}

fn split_even(from: u64, to: u64, parts: u64) -> Vec<(u64, u64)> {
    let total = to - from + 1;
    let parts = parts.min(total);
    let base = total / parts;
    let remainder = total % parts;

    let mut ranges = Vec::with_capacity(parts as usize);
    let mut cursor = from;
    for index in 0..parts {
        let size = base + u64::from(index < remainder);
        ranges.push((cursor, cursor + size - 1));
        cursor += size;
    }
    ranges
}
