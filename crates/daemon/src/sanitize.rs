//! Filesystem-safe naming for mirror folders.

/// Characters that are replaced with `_` in folder names.
pub const FORBIDDEN_CHARS: &[char] = &['/', ':', '*', '?', '"', '<', '>', '|'];

/// Turns arbitrary catalog text into a name usable as a single path component.
///
/// Non-ASCII characters are dropped, each forbidden character becomes `_`,
/// and surrounding whitespace is trimmed.
pub fn sanitize(text: &str) -> String {
    let replaced: String = text
        .chars()
        .filter(|c| c.is_ascii())
        .map(|c| if FORBIDDEN_CHARS.contains(&c) { '_' } else { c })
        .collect();
    replaced.trim().to_string()
}
