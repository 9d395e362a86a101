//! Language-code normalization.

/// Normalize a language code to the form the translator workers expect:
/// lowercase, with any BCP-47 region suffix (`-` or `_` separated) removed.
///
/// `"EN"` becomes `"en"`, `"fr-CA"` becomes `"fr"`, `"pt_BR"` becomes
/// `"pt"`. No further validation happens here; unknown codes are forwarded
/// to the worker, which is authoritative.
pub fn normalize(code: &str) -> String {
    let lower = code.trim().to_lowercase();
    match lower.find(['-', '_']) {
        Some(idx) => lower[..idx].to_string(),
        None => lower,
    }
}
