//! Text normalisation shared by deduplication, filtering and parsing.
//!
//! Everything here is pure and allocation-light; no function touches the network.

use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Minimum digit count for a phone number to act as a dedup key.
pub const MIN_PHONE_KEY_DIGITS: usize = 8;

/// Folds accents to base Latin letters and lowercases: "Farmácia São João" -> "farmacia sao joao".
pub fn fold_accents(input: &str) -> String {
    input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Lowercased, accent-folded, with every run of non-alphanumerics collapsed to one space.
pub fn normalize_name(input: &str) -> String {
    let folded = fold_accents(input);
    let mut out = String::with_capacity(folded.len());
    let mut pending_space = false;
    for c in folded.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Normalised name with its words sorted; `None` for names with fewer than two words.
pub fn word_bag_key(input: &str) -> Option<String> {
    let normalized = normalize_name(input);
    let mut words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    if words.len() < 2 {
        return None;
    }
    words.sort_unstable();
    Some(words.join(" "))
}

/// Digits only, for comparing phones written in different formats.
pub fn phone_digits(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Digit-only phone key, absent when too short to be a real number.
pub fn phone_key(input: &str) -> Option<String> {
    let digits = phone_digits(input);
    (digits.len() >= MIN_PHONE_KEY_DIGITS).then_some(digits)
}

fn location_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s,\-]+").expect("location separator pattern"))
}

/// Splits "Campinas, SP" into ("Campinas", "SP").
///
/// The state is only recognised as a trailing two-letter token; otherwise the whole
/// string is the city and the state is empty.
pub fn parse_location(location: &str) -> (String, String) {
    let tokens: Vec<&str> = location_separator()
        .split(location.trim())
        .filter(|t| !t.is_empty())
        .collect();

    match tokens.split_last() {
        Some((last, rest))
            if !rest.is_empty()
                && last.chars().count() == 2
                && last.chars().all(|c| c.is_alphabetic()) =>
        {
            (rest.join(" "), last.to_uppercase())
        }
        _ => (tokens.join(" "), String::new()),
    }
}

/// Accent- and case-insensitive equality for place names.
pub fn same_place(a: &str, b: &str) -> bool {
    normalize_name(a) == normalize_name(b)
}

fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
        )
        .expect("email pattern")
    })
}

/// Validates an email scraped from a provider, rejecting obvious placeholders.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    let fake_patterns = ["999999", "111111", "000000", "123456789"];
    if let Some(pattern) = fake_patterns.iter().find(|p| email.contains(*p)) {
        tracing::debug!("Discarding placeholder email (pattern '{}'): {}", pattern, email);
        return false;
    }

    // Image names and similar assets routinely match naive email regexes in scraped HTML.
    let lower = email.to_ascii_lowercase();
    if [".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg"]
        .iter()
        .any(|ext| lower.ends_with(ext))
    {
        return false;
    }

    email_pattern().is_match(email)
}

/// Normalises a Brazilian phone number to E.164 (`+5511987654321`).
///
/// Returns `None` when the number does not parse as a valid BR number.
pub fn normalize_br_phone(raw: &str) -> Option<String> {
    if raw.trim().is_empty() || phone_digits(raw).len() < MIN_PHONE_KEY_DIGITS {
        return None;
    }

    match phonenumber::parse(Some(CountryId::BR), raw) {
        Ok(number) if phonenumber::is_valid(&number) => {
            Some(number.format().mode(Mode::E164).to_string())
        }
        Ok(_) => {
            tracing::debug!("Invalid BR phone number: {}", raw);
            None
        }
        Err(e) => {
            tracing::debug!("Failed to parse BR phone '{}': {:?}", raw, e);
            None
        }
    }
}

/// Provider phones are stored as E.164 when valid, verbatim (trimmed) otherwise.
pub fn clean_phone(raw: &str) -> String {
    normalize_br_phone(raw).unwrap_or_else(|| raw.trim().to_string())
}
