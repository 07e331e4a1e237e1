//! Query text normalization shared by cache keys and backends.

/// Trims the text and collapses every run of whitespace into one space.
///
/// Case is preserved: embedding models are case-sensitive and lowercasing
/// would let differently-embedded queries share a cache entry.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
