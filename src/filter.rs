//! Lead filters applied around enrichment.
//!
//! All three filters fail open: a lead is only dropped on positive evidence that it
//! belongs elsewhere, never because a field is missing.

use crate::catalog::{expected_prefixes, name_hint_prefixes, prefixes_overlap};
use crate::models::{CategoryMatch, Lead};
use crate::normalize::same_place;

/// Drops leads whose name clearly names a different category than the query.
///
/// Returns the kept leads and how many were discarded.
pub fn by_name_relevance(leads: Vec<Lead>, query: &str) -> (Vec<Lead>, usize) {
    let expected = expected_prefixes(query);
    if expected.is_empty() {
        return (leads, 0);
    }

    let before = leads.len();
    let kept: Vec<Lead> = leads
        .into_iter()
        .filter(|lead| {
            let hinted = name_hint_prefixes(&lead.name);
            let keep = hinted.is_empty() || prefixes_overlap(expected, &hinted);
            if !keep {
                tracing::debug!(name = %lead.name, ?hinted, "Name indicates another category");
            }
            keep
        })
        .collect();
    let discarded = before - kept.len();
    (kept, discarded)
}

/// Drops leads whose registry municipality disagrees with the requested location.
pub fn by_location(leads: Vec<Lead>, city: &str, state: &str) -> (Vec<Lead>, usize) {
    if city.trim().is_empty() {
        return (leads, 0);
    }
    let wanted_state = state.trim().to_uppercase();

    let before = leads.len();
    let kept: Vec<Lead> = leads
        .into_iter()
        .filter(|lead| {
            if lead.resolved_municipality.is_empty() {
                return true;
            }
            if !same_place(&lead.resolved_municipality, city) {
                return false;
            }
            let lead_state = lead.resolved_state.trim().to_uppercase();
            wanted_state.is_empty() || lead_state.is_empty() || lead_state == wanted_state
        })
        .collect();
    let discarded = before - kept.len();
    (kept, discarded)
}

/// Resolves a category code against the compatible set.
pub fn classify(category_code: &str, compatible_codes: &[String]) -> CategoryMatch {
    let code: String = category_code.chars().filter(|c| c.is_ascii_digit()).collect();
    if code.is_empty() || compatible_codes.is_empty() {
        return CategoryMatch::Unknown;
    }
    if compatible_codes.iter().any(|prefix| code.starts_with(prefix.as_str())) {
        CategoryMatch::Compatible
    } else {
        CategoryMatch::Incompatible
    }
}

/// Drops registry-identified leads whose category is incompatible with the query.
///
/// Leads without a registry identifier are always kept. Leads still marked unknown are
/// classified here from their category code first.
pub fn by_category(leads: Vec<Lead>, compatible_codes: &[String]) -> (Vec<Lead>, usize) {
    let before = leads.len();
    let kept: Vec<Lead> = leads
        .into_iter()
        .filter_map(|mut lead| {
            if lead.registry_id.is_empty() {
                return Some(lead);
            }
            if lead.category_match.is_unknown() {
                lead.category_match = classify(&lead.category_code, compatible_codes);
            }
            (lead.category_match != CategoryMatch::Incompatible).then_some(lead)
        })
        .collect();
    let discarded = before - kept.len();
    (kept, discarded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> Lead {
        Lead::new(name, "test")
    }

    #[test]
    fn name_relevance_drops_only_clear_mismatches() {
        let leads = vec![
            named("Restaurante Sabor Caseiro"),
            named("Farmácia Popular"),
            named("Casa do Zé"),
        ];
        let (kept, discarded) = by_name_relevance(leads, "restaurante");
        assert_eq!(discarded, 1);
        let names: Vec<_> = kept.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Restaurante Sabor Caseiro", "Casa do Zé"]);
    }

    #[test]
    fn name_relevance_keeps_everything_for_unknown_queries() {
        let (kept, discarded) =
            by_name_relevance(vec![named("Farmácia Popular")], "coisas aleatorias");
        assert_eq!((kept.len(), discarded), (1, 0));
    }

    #[test]
    fn location_filter_fails_open_and_checks_state() {
        let mut same = named("A");
        same.resolved_municipality = "SÃO PAULO".into();
        same.resolved_state = "SP".into();
        let mut other_city = named("B");
        other_city.resolved_municipality = "Santos".into();
        let mut other_state = named("C");
        other_state.resolved_municipality = "São Paulo".into();
        other_state.resolved_state = "RJ".into();
        let unresolved = named("D");

        let (kept, discarded) = by_location(
            vec![same, other_city, other_state, unresolved],
            "Sao Paulo",
            "sp",
        );
        assert_eq!(discarded, 2);
        let names: Vec<_> = kept.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["A", "D"]);
    }

    #[test]
    fn pharmacy_code_dropped_for_restaurant_codes_unless_unregistered() {
        let codes = vec!["5611".to_string()];
        let mut registered = named("Drogaria Um");
        registered.registry_id = "11.222.333/0001-81".into();
        registered.category_code = "4771".into();
        let mut unregistered = named("Drogaria Dois");
        unregistered.category_code = "4771".into();

        let (kept, discarded) = by_category(vec![registered, unregistered], &codes);
        assert_eq!(discarded, 1);
        assert_eq!(kept[0].name, "Drogaria Dois");
    }

    #[test]
    fn category_filter_without_codes_keeps_all() {
        let mut lead = named("Qualquer");
        lead.registry_id = "11.222.333/0001-81".into();
        lead.category_code = "4771-0/01".into();
        let (kept, discarded) = by_category(vec![lead], &[]);
        assert_eq!((kept.len(), discarded), (1, 0));
        assert_eq!(kept[0].category_match, CategoryMatch::Unknown);
    }

    #[test]
    fn classify_strips_punctuation() {
        let codes = vec!["5611".to_string()];
        assert_eq!(classify("56.11-2-01", &codes), CategoryMatch::Compatible);
        assert_eq!(classify("4771-7/01", &codes), CategoryMatch::Incompatible);
        assert_eq!(classify("", &codes), CategoryMatch::Unknown);
    }
}
