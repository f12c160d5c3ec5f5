/// Property-based tests using proptest
/// Invariants of the deduplication engine and the normalisation helpers it relies on
use proptest::prelude::*;
use rust_lead_api::dedup::deduplicate;
use rust_lead_api::models::{CategoryMatch, Lead};
use rust_lead_api::normalize::{normalize_name, phone_digits, phone_key, word_bag_key};

fn optional(value: &'static str) -> impl Strategy<Value = String> {
    prop::sample::select(vec!["", value]).prop_map(str::to_string)
}

/// Small vocabularies so generated candidates collide often
fn candidate() -> impl Strategy<Value = Lead> {
    let names = prop::sample::select(vec![
        "Padaria Sol",
        "Sol Padaria",
        "padaria  sol",
        "Padaria Lua",
        "Restaurante Bom Sabor",
        "Bom Sabor Restaurante",
        "Farmácia Central",
        "Farmacia Central",
        "Mercado",
    ]);
    let phones = prop::sample::select(vec![
        "",
        "",
        "(19) 3232-1234",
        "1932321234",
        "(19) 99876-5432",
        "11 4004-0000",
        "123",
    ]);
    let second_phones = prop::sample::select(vec!["", "", "(19) 3030-7777", "(11) 98888-0000"]);
    let addresses = prop::sample::select(vec!["", "", "Rua A, 10", "Av. Brasil, 200"]);
    let sources = prop::sample::select(vec!["overpass", "duckduckgo", "bing", "mojeek", "geoapify"]);
    let contact = (names, phones, second_phones, addresses, sources);

    let listing = (
        optional("Campinas"),
        optional("SP"),
        optional("padaria"),
        optional("https://sol.com.br"),
        optional("contato@sol.com.br"),
        optional("4.5"),
    );
    let registry = (
        optional("11.222.333/0001-81"),
        optional("PADARIA SOL LTDA"),
        optional("Padaria Sol"),
        optional("ATIVA"),
        optional("1091102"),
        optional("Fabricação de produtos de panificação"),
        optional("Campinas"),
        optional("SP"),
        prop::sample::select(vec![Vec::new(), vec!["Maria Souza".to_string()]]),
        prop::sample::select(vec![
            CategoryMatch::Unknown,
            CategoryMatch::Compatible,
            CategoryMatch::Incompatible,
        ]),
    );
    let social = (optional("padariasol"), optional("1.200"));

    (contact, listing, registry, social).prop_map(
        |((name, phone, phone2, address, source), listing, registry, social)| {
            let mut lead = Lead::new(name, source);
            lead.phone = phone.to_string();
            // A second phone only ever accompanies a first one
            if !phone.is_empty() {
                lead.phone2 = phone2.to_string();
            }
            lead.address = address.to_string();
            (lead.city, lead.state, lead.category, lead.website, lead.email, lead.rating) = listing;
            (
                lead.registry_id,
                lead.legal_name,
                lead.trade_name,
                lead.registry_status,
                lead.category_code,
                lead.category_desc,
                lead.resolved_municipality,
                lead.resolved_state,
                lead.partners,
                lead.category_match,
            ) = registry;
            (lead.social_handle, lead.follower_count) = social;
            lead
        },
    )
}

/// Every single-valued text field except the phones, labelled for failure messages
fn text_fields(lead: &Lead) -> Vec<(&'static str, &str)> {
    vec![
        ("address", lead.address.as_str()),
        ("city", lead.city.as_str()),
        ("state", lead.state.as_str()),
        ("category", lead.category.as_str()),
        ("website", lead.website.as_str()),
        ("email", lead.email.as_str()),
        ("rating", lead.rating.as_str()),
        ("registry_id", lead.registry_id.as_str()),
        ("legal_name", lead.legal_name.as_str()),
        ("trade_name", lead.trade_name.as_str()),
        ("registry_status", lead.registry_status.as_str()),
        ("category_code", lead.category_code.as_str()),
        ("category_desc", lead.category_desc.as_str()),
        ("resolved_municipality", lead.resolved_municipality.as_str()),
        ("resolved_state", lead.resolved_state.as_str()),
        ("social_handle", lead.social_handle.as_str()),
        ("follower_count", lead.follower_count.as_str()),
    ]
}

fn distinct_phones(leads: &[Lead]) -> Vec<String> {
    let mut phones: Vec<String> = leads
        .iter()
        .flat_map(|l| [&l.phone, &l.phone2])
        .filter(|p| !p.is_empty())
        .map(|p| phone_digits(p))
        .collect();
    phones.sort();
    phones.dedup();
    phones
}

/// Group signature of a canonical record: its word bag, or the name itself for one-word names
fn signature(lead: &Lead) -> (String, Vec<String>) {
    let key = word_bag_key(&lead.name).unwrap_or_else(|| normalize_name(&lead.name));
    let mut sources = lead.sources.clone();
    sources.sort();
    (key, sources)
}

fn canonical_set(leads: Vec<Lead>) -> Vec<(String, Vec<String>)> {
    let mut set: Vec<_> = deduplicate(leads).iter().map(signature).collect();
    set.sort();
    set
}

/// Same input in two orders, with phones stripped so no cross-business phone collisions exist
fn permuted_without_phones() -> impl Strategy<Value = (Vec<Lead>, Vec<Lead>)> {
    prop::collection::vec(candidate(), 0..20).prop_flat_map(|leads| {
        let leads: Vec<Lead> = leads
            .into_iter()
            .map(|mut l| {
                l.phone.clear();
                l.phone2.clear();
                l
            })
            .collect();
        (Just(leads.clone()), Just(leads).prop_shuffle())
    })
}

proptest! {
    #[test]
    fn dedup_is_order_invariant((original, shuffled) in permuted_without_phones()) {
        prop_assert_eq!(canonical_set(original), canonical_set(shuffled));
    }

    #[test]
    fn dedup_is_idempotent(leads in prop::collection::vec(candidate(), 0..30)) {
        let once = deduplicate(leads);
        let twice = deduplicate(once.clone());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn dedup_never_grows_and_keeps_every_provider(leads in prop::collection::vec(candidate(), 0..30)) {
        let input_sources: Vec<String> = leads.iter().flat_map(|l| l.sources.clone()).collect();
        let input_len = leads.len();
        let out = deduplicate(leads);

        prop_assert!(out.len() <= input_len);
        for source in input_sources {
            prop_assert!(out.iter().any(|l| l.sources.contains(&source)));
        }
    }

    #[test]
    fn dedup_leaves_no_shared_keys(leads in prop::collection::vec(candidate(), 0..30)) {
        let out = deduplicate(leads);
        for (i, a) in out.iter().enumerate() {
            for b in out.iter().skip(i + 1) {
                prop_assert_ne!(normalize_name(&a.name), normalize_name(&b.name));
                if let (Some(x), Some(y)) = (word_bag_key(&a.name), word_bag_key(&b.name)) {
                    prop_assert_ne!(x, y);
                }
                if let (Some(x), Some(y)) = (phone_key(&a.phone), phone_key(&b.phone)) {
                    prop_assert_ne!(x, y);
                }
            }
        }
    }

    #[test]
    fn merged_pair_keeps_every_non_empty_field(a in candidate(), mut b in candidate()) {
        // Same name forces a merge regardless of phones
        b.name = a.name.clone();
        let inputs = [a.clone(), b.clone()];

        let out = deduplicate(vec![a, b]);
        prop_assert_eq!(out.len(), 1);
        let merged = &out[0];

        for input in &inputs {
            for ((field, value), (_, kept)) in text_fields(input).into_iter().zip(text_fields(merged)) {
                prop_assert!(value.is_empty() || !kept.is_empty(), "{} lost in merge", field);
            }
            if !input.partners.is_empty() {
                prop_assert!(!merged.partners.is_empty());
            }
            if !input.category_match.is_unknown() {
                prop_assert!(!merged.category_match.is_unknown());
            }
            for source in &input.sources {
                prop_assert!(merged.sources.contains(source));
            }
        }

        // Two phone slots: every number survives while they suffice
        let seen = distinct_phones(&inputs);
        let kept = distinct_phones(std::slice::from_ref(merged));
        if seen.len() <= 2 {
            prop_assert_eq!(kept, seen);
        } else {
            prop_assert_eq!(kept.len(), 2);
            prop_assert!(kept.iter().all(|p| seen.contains(p)));
        }
    }

    #[test]
    fn normalize_name_never_panics(name in "\\PC*") {
        let _ = normalize_name(&name);
        let _ = word_bag_key(&name);
    }

    #[test]
    fn phone_key_is_digits_only(phone in "\\PC*") {
        if let Some(key) = phone_key(&phone) {
            prop_assert!(key.chars().all(|c| c.is_ascii_digit()));
        }
    }
}

#[test]
fn reordered_names_collapse_into_one_record() {
    let mut first = Lead::new("Padaria Sol", "overpass");
    first.address = "Rua A, 10".into();
    let mut second = Lead::new("Sol Padaria", "bing");
    second.phone = "(19) 3232-1234".into();

    let out = deduplicate(vec![first, second]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].phone, "(19) 3232-1234");
    assert_eq!(out[0].address, "Rua A, 10");
    assert_eq!(out[0].name, "Sol Padaria");
    assert_eq!(out[0].source_label(), "overpass+bing");
}
