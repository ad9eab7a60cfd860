//! Byte and UTF-8 utilities shared by the grammar compiler and the matcher.
//!
//! Codepoint ranges in the grammar IR are lowered to byte ranges at the
//! standard UTF-8 boundaries: 1-byte `0x00-0x7F`,
//! 2-byte `0xC280-0xDFBF`, 3-byte `0xE08080-0xEFBFBF`, 4-byte
//! `0xF0808080-0xF7BFBFBF`. Everything here operates on raw `u32` codepoints,
//! not `char`, since grammar character classes may reference surrogate-free
//! but otherwise arbitrary ranges up to `0x10FFFF`.
/// Inclusive boundaries of the four UTF-8 encoding lengths, as codepoints.
pub const MAX_CODEPOINT: u32 = 0x10FFFF;
const ONE_BYTE_MAX: u32 = 0x7F;
const TWO_BYTE_MAX: u32 = 0x7FF;
const THREE_BYTE_MAX: u32 = 0xFFFF;

/// A contiguous byte-range edge: `low..=high` at one position of a UTF-8
/// encoding. `RangeGroup`s are emitted in sequence; concatenating one byte
/// from each group spells out a valid encoded codepoint in the original
/// range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub low: u8,
    pub high: u8,
}

impl ByteRange {
    pub const fn new(low: u8, high: u8) -> Self {
        Self { low, high }
    }
}

/// One alternative encoding of a codepoint range: a sequence of byte ranges,
/// one per UTF-8 byte position, that must be matched in order.
pub type EncodedSequence = Vec<ByteRange>;

/// Decompose a single inclusive codepoint range `[low, high]` into the list
/// of byte-range sequences that exactly recognise it in UTF-8.
///
/// The range is first split at every UTF-8-length boundary and at every
/// leading-byte change, then each resulting sub-range is encoded
/// independently. This mirrors the construction used by `CharacterClass`
/// lowering in the grammar FSM builder.
pub fn codepoint_range_to_utf8_sequences(low: u32, high: u32) -> Vec<EncodedSequence> {
    debug_assert!(low <= high);
    debug_assert!(high <= MAX_CODEPOINT);
    let mut out = Vec::new();
    for (sub_low, sub_high) in split_at_length_boundaries(low, high) {
        split_by_leading_byte(sub_low, sub_high, &mut out);
    }
    out
}

fn split_at_length_boundaries(low: u32, high: u32) -> Vec<(u32, u32)> {
    let boundaries = [ONE_BYTE_MAX, TWO_BYTE_MAX, THREE_BYTE_MAX, MAX_CODEPOINT];
    let mut out = Vec::new();
    let mut cur = low;
    for &b in &boundaries {
        if cur > high {
            break;
        }
        if b >= cur {
            let end = b.min(high);
            out.push((cur, end));
            cur = end + 1;
        }
    }
    out
}

/// Within one UTF-8 length class, split further at every point where the
/// leading byte (and hence the number of free bits in it) would change, so
/// each emitted sequence has a single, fixed leading byte range whose tail
/// bytes vary independently.
fn split_by_leading_byte(low: u32, high: u32, out: &mut Vec<EncodedSequence>) {
    let len = utf8_len(low);
    debug_assert_eq!(len, utf8_len(high));
    if len == 1 {
        out.push(vec![ByteRange::new(low as u8, high as u8)]);
        return;
    }
    // Encode low and high fully, then walk from the least significant byte
    // towards the most significant one, peeling off maximal ranges the way
    // a odometer carries: this is the classic UTF-8 range-splitting
    // algorithm (as used by re2/utf8ranges).
    let low_bytes = encode(low, len);
    let high_bytes = encode(high, len);
    emit_ranges(&low_bytes, &high_bytes, 0, out, &mut Vec::with_capacity(len));
}

fn emit_ranges(
    low: &[u8],
    high: &[u8],
    pos: usize,
    out: &mut Vec<EncodedSequence>,
    prefix: &mut Vec<ByteRange>,
) {
    let len = low.len();
    if pos == len {
        out.push(prefix.clone());
        return;
    }
    if low[pos] == high[pos] {
        prefix.push(ByteRange::new(low[pos], low[pos]));
        emit_ranges(low, high, pos + 1, out, prefix);
        prefix.pop();
        return;
    }
    let is_last = pos == len - 1;
    if is_last {
        prefix.push(ByteRange::new(low[pos], high[pos]));
        emit_ranges(low, high, pos + 1, out, prefix);
        prefix.pop();
        return;
    }
    let cont_min = 0x80u8;
    let cont_max = 0xBFu8;
    // low[pos]..=low[pos] with the remaining bytes ranging [low_tail, max]
    {
        prefix.push(ByteRange::new(low[pos], low[pos]));
        let all_cont_max: Vec<u8> = std::iter::repeat(cont_max).take(len - pos - 1).collect();
        emit_ranges(&low[pos + 1..], &all_cont_max, 0, out, prefix);
        prefix.pop();
    }
    // strictly between low[pos] and high[pos]: full continuation-byte range
    if high[pos] - low[pos] >= 2 {
        prefix.push(ByteRange::new(low[pos] + 1, high[pos] - 1));
        let all_cont: Vec<ByteRange> = (0..len - pos - 1)
            .map(|_| ByteRange::new(cont_min, cont_max))
            .collect();
        let mut full = prefix.clone();
        full.extend(all_cont);
        out.push(full);
        prefix.pop();
    }
    // high[pos]..=high[pos] with the remaining bytes ranging [min, high_tail]
    {
        prefix.push(ByteRange::new(high[pos], high[pos]));
        let all_cont_min: Vec<u8> = std::iter::repeat(cont_min).take(len - pos - 1).collect();
        emit_ranges(&all_cont_min, &high[pos + 1..], 0, out, prefix);
        prefix.pop();
    }
}

fn utf8_len(codepoint: u32) -> usize {
    match codepoint {
        0..=0x7F => 1,
        0x80..=0x7FF => 2,
        0x800..=0xFFFF => 3,
        _ => 4,
    }
}

fn encode(codepoint: u32, len: usize) -> Vec<u8> {
    let mut buf = [0u8; 4];
    let s = char::from_u32(codepoint)
        .unwrap_or('\u{FFFD}')
        .encode_utf8(&mut buf);
    debug_assert_eq!(s.len(), len);
    s.as_bytes().to_vec()
}

/// True iff `b` is a valid UTF-8 continuation byte (`10xxxxxx`).
#[inline]
pub fn is_continuation_byte(b: u8) -> bool {
    (0x80..=0xBF).contains(&b)
}

/// Number of bytes in the UTF-8 encoding that starts with `first_byte`, or
/// `None` if `first_byte` cannot start a valid encoding (a continuation byte
/// or `0xF8..=0xFF`).
#[inline]
pub fn utf8_sequence_len(first_byte: u8) -> Option<usize> {
    match first_byte {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

/// Decode a JS-style escape sequence starting right after the backslash.
/// Returns the decoded bytes (UTF-8 encoded) and the number of *source*
/// characters consumed (not counting the backslash itself).
pub fn decode_escape(rest: &str) -> Option<(Vec<u8>, usize)> {
    let mut chars = rest.chars();
    let c = chars.next()?;
    let simple = |ch: char| {
        let mut b = [0u8; 4];
        ch.encode_utf8(&mut b).as_bytes().to_vec()
    };
    match c {
        'n' => Some((simple('\n'), 1)),
        'r' => Some((simple('\r'), 1)),
        't' => Some((simple('\t'), 1)),
        '\\' => Some((simple('\\'), 1)),
        '"' => Some((simple('"'), 1)),
        '\'' => Some((simple('\''), 1)),
        '/' => Some((simple('/'), 1)),
        'b' => Some((simple('\u{8}'), 1)),
        'f' => Some((simple('\u{C}'), 1)),
        'x' => {
            let hex: String = rest.chars().skip(1).take(2).collect();
            if hex.len() != 2 {
                return None;
            }
            let v = u32::from_str_radix(&hex, 16).ok()?;
            Some((simple(char::from_u32(v)?), 3))
        }
        'u' => {
            let hex: String = rest.chars().skip(1).take(4).collect();
            if hex.len() != 4 {
                return None;
            }
            let v = u32::from_str_radix(&hex, 16).ok()?;
            Some((simple(char::from_u32(v)?), 5))
        }
        'U' => {
            let hex: String = rest.chars().skip(1).take(8).collect();
            if hex.len() != 8 {
                return None;
            }
            let v = u32::from_str_radix(&hex, 16).ok()?;
            Some((simple(char::from_u32(v)?), 9))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(seqs: &[EncodedSequence], bytes: &[u8]) -> bool {
        seqs.iter().any(|seq| {
            seq.len() == bytes.len()
                && seq
                    .iter()
                    .zip(bytes.iter())
                    .all(|(r, &b)| r.low <= b && b <= r.high)
        })
    }

    #[test]
    fn ascii_range_is_single_byte() {
        let seqs = codepoint_range_to_utf8_sequences('a' as u32, 'z' as u32);
        assert_eq!(seqs.len(), 1);
        assert!(matches(&seqs, b"m"));
        assert!(!matches(&seqs, b"A"));
    }

    #[test]
    fn every_codepoint_in_range_is_recognised() {
        let seqs = codepoint_range_to_utf8_sequences(0x80, 0x900);
        for cp in [0x80u32, 0x7FF, 0x800, 0x900] {
            let ch = char::from_u32(cp).unwrap();
            let mut buf = [0u8; 4];
            let encoded = ch.encode_utf8(&mut buf).as_bytes();
            assert!(matches(&seqs, encoded), "codepoint {cp:#x} not matched");
        }
        let out_of_range = char::from_u32(0x901).unwrap();
        let mut buf = [0u8; 4];
        let encoded = out_of_range.encode_utf8(&mut buf).as_bytes();
        assert!(!matches(&seqs, encoded));
    }

    #[test]
    fn four_byte_range_round_trips() {
        let seqs = codepoint_range_to_utf8_sequences(0x10000, 0x10FFFF);
        for cp in [0x10000u32, 0x1F600, 0x10FFFF] {
            let ch = char::from_u32(cp).unwrap();
            let mut buf = [0u8; 4];
            let encoded = ch.encode_utf8(&mut buf).as_bytes();
            assert!(matches(&seqs, encoded));
        }
    }

    #[test]
    fn continuation_byte_predicate() {
        assert!(is_continuation_byte(0x80));
        assert!(is_continuation_byte(0xBF));
        assert!(!is_continuation_byte(0x7F));
        assert!(!is_continuation_byte(0xC0));
    }

    #[test]
    fn decode_common_escapes() {
        assert_eq!(decode_escape("n").unwrap().0, b"\n");
        assert_eq!(decode_escape("u00AB").unwrap().0, "«".as_bytes());
        assert_eq!(decode_escape("xAB").unwrap().0, "\u{AB}".as_bytes());
    }
}
