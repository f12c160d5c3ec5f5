//! Reconciles provider candidates into canonical leads.
//!
//! Candidates are matched on three keys, strongest first: digit-only phone, normalised
//! name, and sorted word bag. Records live in an arena; the key index points into it.
//! When one candidate bridges two existing records (phone matches one, name matches
//! another) both collapse into a single record, so running the engine on its own
//! output never finds anything left to merge.

use std::collections::HashMap;

use crate::models::Lead;
use crate::normalize::{normalize_name, phone_digits, phone_key, word_bag_key};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MatchKey {
    Phone(String),
    Name(String),
    WordBag(String),
}

/// Keys in probe order. Absent keys are skipped.
fn keys_of(lead: &Lead) -> Vec<MatchKey> {
    let mut keys = Vec::with_capacity(3);
    if let Some(phone) = phone_key(&lead.phone) {
        keys.push(MatchKey::Phone(phone));
    }
    let name = normalize_name(&lead.name);
    if !name.is_empty() {
        keys.push(MatchKey::Name(name));
    }
    if let Some(bag) = word_bag_key(&lead.name) {
        keys.push(MatchKey::WordBag(bag));
    }
    keys
}

#[derive(Default)]
struct Deduplicator {
    arena: Vec<Option<Lead>>,
    index: HashMap<MatchKey, usize>,
}

impl Deduplicator {
    fn add(&mut self, candidate: Lead) {
        let candidate_keys = keys_of(&candidate);

        let mut matched: Vec<usize> = Vec::new();
        for key in &candidate_keys {
            if let Some(&slot) = self.index.get(key) {
                if !matched.contains(&slot) {
                    matched.push(slot);
                }
            }
        }

        let Some((&primary, others)) = matched.split_first() else {
            let slot = self.arena.len();
            for key in candidate_keys {
                self.index.insert(key, slot);
            }
            self.arena.push(Some(candidate));
            return;
        };

        let mut touched_keys = candidate_keys;
        if let Some(canonical) = self.arena[primary].as_mut() {
            absorb(canonical, candidate);
        }

        // The candidate linked several records: fold the later ones into the first match.
        for &slot in others {
            if let Some(other) = self.arena[slot].take() {
                touched_keys.extend(keys_of(&other));
                if let Some(canonical) = self.arena[primary].as_mut() {
                    absorb(canonical, other);
                }
                for target in self.index.values_mut() {
                    if *target == slot {
                        *target = primary;
                    }
                }
            }
        }

        if let Some(canonical) = self.arena[primary].as_ref() {
            touched_keys.extend(keys_of(canonical));
        }
        for key in touched_keys {
            self.index.insert(key, primary);
        }
    }

    fn finish(self) -> Vec<Lead> {
        self.arena.into_iter().flatten().collect()
    }
}

/// Merges `incoming` into `canonical` in place.
///
/// A strictly higher-scoring incoming record takes over the canonical identity; on a
/// tie the record seen first keeps it. Either way the loser's non-empty fields fill
/// the winner's gaps and provenance is the union of both.
fn absorb(canonical: &mut Lead, incoming: Lead) {
    let loser = if incoming.quality_score() > canonical.quality_score() {
        let previous = std::mem::replace(canonical, incoming);
        let winner_sources = std::mem::replace(&mut canonical.sources, previous.sources.clone());
        canonical.add_sources(&winner_sources);
        previous
    } else {
        canonical.add_sources(&incoming.sources);
        incoming
    };
    fill_empty(canonical, loser);
}

fn fill(target: &mut String, value: String) {
    if target.is_empty() && !value.is_empty() {
        *target = value;
    }
}

fn fill_empty(target: &mut Lead, other: Lead) {
    absorb_phone(target, other.phone);
    absorb_phone(target, other.phone2);

    fill(&mut target.address, other.address);
    fill(&mut target.city, other.city);
    fill(&mut target.state, other.state);
    fill(&mut target.category, other.category);
    fill(&mut target.website, other.website);
    fill(&mut target.email, other.email);
    fill(&mut target.rating, other.rating);
    fill(&mut target.registry_id, other.registry_id);
    fill(&mut target.legal_name, other.legal_name);
    fill(&mut target.trade_name, other.trade_name);
    fill(&mut target.registry_status, other.registry_status);
    fill(&mut target.category_code, other.category_code);
    fill(&mut target.category_desc, other.category_desc);
    fill(&mut target.resolved_municipality, other.resolved_municipality);
    fill(&mut target.resolved_state, other.resolved_state);
    fill(&mut target.social_handle, other.social_handle);
    fill(&mut target.follower_count, other.follower_count);
    if target.partners.is_empty() {
        target.partners = other.partners;
    }
    if target.category_match.is_unknown() {
        target.category_match = other.category_match;
    }
}

/// Places a phone in the first free slot unless it is already known.
///
/// A lead has two phone slots. Once both hold distinct numbers any further number is
/// dropped; this is the one field a merge can lose.
fn absorb_phone(target: &mut Lead, phone: String) {
    if phone.is_empty() {
        return;
    }
    let digits = phone_digits(&phone);
    let known = |existing: &str| !existing.is_empty() && phone_digits(existing) == digits;
    if known(&target.phone) || known(&target.phone2) {
        return;
    }
    if target.phone.is_empty() {
        target.phone = phone;
    } else if target.phone2.is_empty() {
        target.phone2 = phone;
    } else {
        tracing::debug!(lead = %target.name, dropped = %phone, "Both phone slots taken, extra phone dropped");
    }
}

/// Collapses duplicate candidates into canonical leads.
///
/// Output order follows the first appearance of each canonical record.
pub fn deduplicate(leads: Vec<Lead>) -> Vec<Lead> {
    let input = leads.len();
    let mut engine = Deduplicator::default();
    for lead in leads {
        engine.add(lead);
    }
    let out = engine.finish();
    tracing::debug!(input, output = out.len(), "Deduplicated candidates");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(name: &str, phone: &str, source: &str) -> Lead {
        Lead {
            phone: phone.to_string(),
            ..Lead::new(name, source)
        }
    }

    #[test]
    fn reordered_names_merge_and_phone_bearer_wins() {
        let merged = deduplicate(vec![
            lead("Loja ABC", "(11) 91234-5678", "guia"),
            lead("ABC Loja", "", "bing"),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "Loja ABC");
        assert_eq!(merged[0].sources, vec!["guia", "bing"]);

        // Reverse arrival: the phone-bearing record still wins the identity.
        let merged = deduplicate(vec![
            lead("ABC Loja", "", "bing"),
            lead("Loja ABC", "(11) 91234-5678", "guia"),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "Loja ABC");
        assert_eq!(merged[0].phone, "(11) 91234-5678");
        assert!(merged[0].sources.contains(&"bing".to_string()));
        assert!(merged[0].sources.contains(&"guia".to_string()));
    }

    #[test]
    fn phone_match_beats_different_names() {
        let merged = deduplicate(vec![
            lead("Pizzaria Bella", "11 3333-4444", "overpass"),
            lead("Bella Pizzas e Massas", "(11) 3333-4444", "mojeek"),
        ]);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn short_phones_never_merge() {
        let merged = deduplicate(vec![lead("Alpha", "1234", "a"), lead("Beta", "1234", "b")]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn second_distinct_phone_goes_to_phone2() {
        let mut first = lead("Mercado Bom Preço", "(19) 3251-0000", "a");
        first.address = "Rua X, 1".into();
        let second = lead("Mercado Bom Preço", "(19) 99876-1111", "b");

        let merged = deduplicate(vec![first, second]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].phone, "(19) 3251-0000");
        assert_eq!(merged[0].phone2, "(19) 99876-1111");
    }

    #[test]
    fn third_distinct_phone_is_dropped() {
        let mut first = lead("Mercado Bom Preço", "(19) 3251-0000", "a");
        first.phone2 = "(19) 99876-1111".into();
        let second = lead("Mercado Bom Preço", "(19) 3251-2222", "b");

        let merged = deduplicate(vec![first, second]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].phone, "(19) 3251-0000");
        assert_eq!(merged[0].phone2, "(19) 99876-1111");
        assert_eq!(merged[0].sources, vec!["a", "b"]);
    }

    #[test]
    fn swap_keeps_loser_fields() {
        let mut weak = lead("Auto Center Silva", "", "a");
        weak.website = "https://silva.example".into();
        let mut strong = lead("Auto Center Silva", "(11) 4000-1000", "b");
        strong.address = "Av. Brasil, 200".into();

        let merged = deduplicate(vec![weak, strong]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].address, "Av. Brasil, 200");
        assert_eq!(merged[0].website, "https://silva.example");
        assert_eq!(merged[0].sources, vec!["a", "b"]);
    }

    #[test]
    fn bridging_candidate_collapses_two_records() {
        let merged = deduplicate(vec![
            lead("Padaria Sol", "(11) 90000-0001", "a"),
            lead("Doces Lua", "", "b"),
            lead("Doces Lua", "(11) 90000-0001", "c"),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.clone(), deduplicate(merged));
    }

    #[test]
    fn equal_scores_keep_first_seen() {
        let merged = deduplicate(vec![
            lead("Farmácia Central", "", "a"),
            lead("Farmacia Central", "", "b"),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "Farmácia Central");
    }
}
