//! Permalink generation
//!
//! Turns a file path or a title into a stable, URL-safe identifier. Latin
//! letters are folded to ASCII, CJK text is kept as written, and everything
//! else collapses into single hyphens.
//!
//! ```text
//! "docs/中文 English Mixed.md"  ->  "docs/中文-english-mixed"
//! "test/Über File.md"           ->  "test/uber-file"
//! ```

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Fallback when a path or title normalizes to nothing
pub const UNTITLED_PERMALINK: &str = "untitled";

/// Generate a permalink from a relative file path or title
///
/// Each `/`-separated segment is normalized on its own. The extension of the
/// last segment is dropped and segments that normalize to nothing are removed.
pub fn generate_permalink(path_or_title: &str) -> String {
    let normalized = path_or_title.replace('\\', "/");
    let mut segments: Vec<&str> = normalized.split('/').collect();

    if let Some(last) = segments.last_mut() {
        *last = strip_extension(last);
    }

    segments
        .into_iter()
        .map(normalize_segment)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Sanitize a title for use as an on-disk file name
///
/// Same normalization as [`generate_permalink`], but slashes are treated as
/// word breaks instead of directory separators and dots are not extensions.
pub fn sanitize_filename(title: &str) -> String {
    title
        .split(['/', '\\'])
        .map(normalize_segment)
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Drop a trailing `.ext`; a leading dot does not start an extension
fn strip_extension(segment: &str) -> &str {
    match segment.rfind('.') {
        Some(idx) if idx > 0 => &segment[..idx],
        _ => segment,
    }
}

/// Han ideographs, kana and Hangul are kept verbatim
pub(crate) fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4e00}'..='\u{9fff}'   // CJK unified ideographs
        | '\u{3400}'..='\u{4dbf}' // CJK extension A
        | '\u{3040}'..='\u{309f}' // Hiragana
        | '\u{30a0}'..='\u{30ff}' // Katakana
        | '\u{1100}'..='\u{11ff}' // Hangul jamo
        | '\u{ac00}'..='\u{d7af}' // Hangul syllables
    )
}

/// Latin letters that carry no canonical decomposition
fn latin_special(c: char) -> Option<&'static str> {
    Some(match c {
        'ø' => "o",
        'Ø' => "O",
        'æ' => "ae",
        'Æ' => "AE",
        'œ' => "oe",
        'Œ' => "OE",
        'ß' => "ss",
        'đ' | 'ð' => "d",
        'Đ' | 'Ð' => "D",
        'ł' => "l",
        'Ł' => "L",
        'þ' => "th",
        'Þ' => "Th",
        'ı' => "i",
        _ => return None,
    })
}

fn is_apostrophe(c: char) -> bool {
    matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '`')
}

/// Fold one segment to ASCII where possible, keeping other scripts intact
fn transliterate(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());

    for c in segment.chars() {
        // Apostrophes vanish before boundaries are computed: "Jürgen's" -> "jurgens"
        if is_apostrophe(c) || is_combining_mark(c) {
            continue;
        } else if c.is_ascii() || is_cjk(c) {
            out.push(c);
        } else if let Some(ascii) = latin_special(c) {
            out.push_str(ascii);
        } else {
            let decomposed: String = std::iter::once(c).nfkd().collect();
            if decomposed.chars().any(|d| d.is_ascii()) {
                out.extend(decomposed.chars().filter(|d| d.is_ascii() && !is_apostrophe(*d)));
            } else if c.is_alphanumeric() {
                // Non-Latin script without an ASCII form (Cyrillic, Greek, ...)
                out.push(c);
            } else {
                out.push('-');
            }
        }
    }

    out
}

/// Hyphens at script changes and camelCase humps
fn insert_boundaries(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);

    for (i, &c) in chars.iter().enumerate() {
        if let Some(&prev) = i.checked_sub(1).and_then(|p| chars.get(p)) {
            let script_change = (is_cjk(prev) && c.is_ascii_alphanumeric())
                || (prev.is_ascii_alphanumeric() && is_cjk(c));
            let camel_hump = (prev.is_ascii_lowercase() || prev.is_ascii_digit()) && c.is_ascii_uppercase();
            if script_change || camel_hump {
                out.push('-');
            }
        }
        out.push(c);
    }

    out
}

fn normalize_segment(segment: &str) -> String {
    let text = insert_boundaries(&transliterate(segment));

    let mut cleaned = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            c if c.is_ascii_alphanumeric() => cleaned.push(c.to_ascii_lowercase()),
            c if is_cjk(c) => cleaned.push(c),
            c if !c.is_ascii() && c.is_alphanumeric() => cleaned.push(c),
            _ => cleaned.push('-'),
        }
    }

    // Collapse hyphen runs and drop hyphens between two ideographs
    let chars: Vec<char> = cleaned.chars().collect();
    let mut out = String::with_capacity(cleaned.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == '-' {
            if out.ends_with('-') {
                continue;
            }
            let prev_cjk = out.chars().last().is_some_and(is_cjk);
            let next = chars[i + 1..].iter().find(|&&n| n != '-');
            if prev_cjk && next.is_some_and(|&n| is_cjk(n)) {
                continue;
            }
        }
        out.push(c);
    }

    out.trim_matches('-').to_string()
}
