//! Brazilian business registry identifier (CNPJ) parsing and formatting.

use regex::Regex;
use std::sync::OnceLock;

fn formatted_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}").expect("formatted CNPJ pattern is valid")
    })
}

fn bare_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{14}").expect("bare CNPJ pattern is valid"))
}

/// A check-digit-valid identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryId {
    digits: String,
}

impl RegistryId {
    /// Accepts formatted or bare input; `None` unless it is 14 digits with valid check digits.
    pub fn parse(raw: &str) -> Option<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        is_valid(&digits).then_some(Self { digits })
    }

    pub fn digits(&self) -> &str {
        &self.digits
    }

    /// `XX.XXX.XXX/XXXX-XX`
    pub fn formatted(&self) -> String {
        let d = &self.digits;
        format!(
            "{}.{}.{}/{}-{}",
            &d[0..2],
            &d[2..5],
            &d[5..8],
            &d[8..12],
            &d[12..14]
        )
    }
}

fn check_digit(digits: &[u32], first_weight: u32) -> u32 {
    let mut weight = first_weight;
    let mut sum = 0;
    for d in digits {
        sum += d * weight;
        weight = if weight == 2 { 9 } else { weight - 1 };
    }
    let rest = 11 - (sum % 11);
    if rest >= 10 {
        0
    } else {
        rest
    }
}

/// Validates a bare 14-digit string, rejecting all-same-digit sequences.
pub fn is_valid(digits: &str) -> bool {
    if digits.len() != 14 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let values: Vec<u32> = digits.bytes().map(|b| u32::from(b - b'0')).collect();
    if values.iter().all(|v| *v == values[0]) {
        return false;
    }
    check_digit(&values[..12], 5) == values[12] && check_digit(&values[..13], 6) == values[13]
}

/// First valid identifier in free text, preferring the formatted spelling.
pub fn extract_registry_id(text: &str) -> Option<RegistryId> {
    [formatted_pattern(), bare_pattern()]
        .into_iter()
        .flat_map(|re| re.find_iter(text))
        .find_map(|m| RegistryId::parse(m.as_str()))
}
