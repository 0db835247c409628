//! Marker search and output decoding for console transcripts.

/// Locate the first occurrence of `marker` in `haystack`, returning its byte offset.
pub fn find_marker(haystack: &[u8], marker: &[u8]) -> Option<usize> {
    if marker.is_empty() || haystack.len() < marker.len() {
        return None;
    }
    haystack
        .windows(marker.len())
        .position(|window| window == marker)
}

/// Decode captured console bytes into text.
///
/// Invalid UTF-8 is replaced with U+FFFD instead of failing, since serial consoles
/// regularly emit partial or garbage bytes during boot.
pub fn decode_output(bytes: &[u8], strip_ansi: bool) -> String {
    if strip_ansi {
        let cleaned = strip_ansi_escapes::strip(bytes);
        String::from_utf8_lossy(&cleaned).into_owned()
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Exact, case-sensitive substring check used to grade command output.
pub fn output_contains(output: &str, expected: &str) -> bool {
    output.contains(expected)
}
