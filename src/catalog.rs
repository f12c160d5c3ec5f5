//! Static keyword tables mapping business vocabulary to category-code prefixes.
//!
//! Keys are stored already normalised (lowercase ASCII, single spaces). A key ending
//! in `*` is a stem: its last word matches any word starting with it.

use crate::normalize::normalize_name;

type Table = &'static [(&'static str, &'static [&'static str])];

/// Query keyword -> expected category-code prefixes.
pub static QUERY_CATEGORIES: Table = &[
    // Vestuario / moda
    ("loja de roupas", &["4781", "1412", "1411", "4642", "4644"]),
    ("moda feminina", &["4781", "1412"]),
    ("moda masculina", &["4781", "1411"]),
    ("boutique", &["4781", "1412", "1411"]),
    ("confeccao", &["1412", "1411", "1413"]),
    ("brecho", &["4781"]),
    ("multimarcas", &["4781"]),
    // Alimentacao
    ("restaurante", &["5611", "5612"]),
    ("lanchonete", &["5611"]),
    ("pizzaria", &["5611"]),
    ("padaria", &["1091", "4721"]),
    ("bar", &["5611", "5612"]),
    ("cafeteria", &["5612"]),
    ("sorveteria", &["5611", "1053"]),
    ("acougue", &["4722"]),
    ("mercearia", &["4712"]),
    ("supermercado", &["4711"]),
    ("mercado", &["4711", "4712"]),
    ("hortifruti", &["4724"]),
    ("quitanda", &["4724"]),
    ("delicatessen", &["4721"]),
    ("emporio", &["4721"]),
    // Saude e beleza
    ("farmacia", &["4771"]),
    ("drogaria", &["4771"]),
    ("clinica", &["8630", "8621", "8622"]),
    ("clinica medica", &["8630"]),
    ("dentista", &["8630"]),
    ("psicologo", &["8630"]),
    ("academia", &["9313"]),
    ("salao de beleza", &["9602"]),
    ("barbearia", &["9602"]),
    ("estetica", &["9602"]),
    ("spa", &["9609"]),
    ("optica", &["4774"]),
    ("veterinario", &["7500"]),
    ("pet shop", &["4789", "7500"]),
    // Automotivo
    ("oficina", &["4520"]),
    ("mecanica", &["4520"]),
    ("funilaria", &["4520"]),
    ("borracharia", &["4530"]),
    ("auto pecas", &["4541", "4542"]),
    ("autopecas", &["4541", "4542"]),
    ("lavagem", &["4520"]),
    ("estacionamento", &["5223"]),
    ("concessionaria", &["4511"]),
    ("locadora", &["7711"]),
    // Construcao e casa
    ("construcao", &["4120", "4399"]),
    ("materiais de construcao", &["4744"]),
    ("ferragens", &["4744"]),
    ("eletrica", &["4321", "4742"]),
    ("encanamento", &["4322"]),
    ("pintura", &["4330"]),
    ("marcenaria", &["1610", "1622"]),
    ("moveis", &["4754", "3101", "3102", "3103"]),
    ("decoracao", &["4759", "7490"]),
    ("arquitetura", &["7111"]),
    ("engenharia", &["7112"]),
    ("imobiliaria", &["6811", "6821"]),
    ("condominio", &["8110"]),
    // Educacao
    ("escola", &["8511", "8512", "8513"]),
    ("creche", &["8511"]),
    ("faculdade", &["8530"]),
    ("universidade", &["8530"]),
    ("curso", &["8599"]),
    ("escola de idiomas", &["8599"]),
    ("escola de musica", &["8599"]),
    // Tecnologia e servicos
    ("ti", &["6201", "6202", "6209"]),
    ("software", &["6201"]),
    ("informatica", &["4751", "9521"]),
    ("internet", &["6110", "6120"]),
    ("telecomunicacoes", &["6110"]),
    ("consultoria", &["7020", "6920"]),
    ("contabilidade", &["6920"]),
    ("advocacia", &["6911"]),
    ("seguranca", &["8011", "8012"]),
    // Turismo e lazer
    ("hotel", &["5510"]),
    ("pousada", &["5510"]),
    ("agencia de viagens", &["7911", "7912"]),
    ("academia de danca", &["9313"]),
    ("academia de natacao", &["9313"]),
    ("cinema", &["5914"]),
    ("teatro", &["9001"]),
    ("quadra esportiva", &["9313"]),
    // Logistica e transporte
    ("transportadora", &["4930", "4921", "4922"]),
    ("motoboy", &["5320"]),
    ("courier", &["5310", "5320"]),
    ("armazem", &["5211"]),
    ("logistica", &["5229"]),
    // Outros varejos
    ("papelaria", &["4761"]),
    ("livraria", &["4761"]),
    ("floricultura", &["4789"]),
    ("joalheria", &["4783"]),
    ("relojoaria", &["4783"]),
    ("brinquedos", &["4763"]),
    ("eletrodomesticos", &["4753"]),
    ("eletronicos", &["4752", "4753"]),
    ("celular", &["4752"]),
    ("instrumentos musicais", &["4756"]),
    ("artigos religiosos", &["4789"]),
];

/// Business-name keyword -> category-code prefixes it implies.
pub static NAME_HINTS: Table = &[
    ("restaurante", &["5611"]),
    ("churrascaria", &["5611"]),
    ("lanchonete", &["5611"]),
    ("pizzaria", &["5611"]),
    ("hamburgueria", &["5611"]),
    ("padaria", &["1091", "4721"]),
    ("confeitaria", &["1091"]),
    ("sorveteria", &["1053", "5611"]),
    ("acougue", &["4722"]),
    ("abatedouro", &["1012", "1013"]),
    ("frigorifico", &["1013"]),
    ("peixaria", &["4723"]),
    ("hortifruti", &["4724"]),
    ("bar", &["5611"]),
    ("boteco", &["5611"]),
    ("lancheria", &["5611"]),
    ("rotisseria", &["4721"]),
    ("mercearia", &["4712"]),
    ("supermercado", &["4711"]),
    ("farmacia", &["4771"]),
    ("drogaria", &["4771"]),
    ("clinica", &["8630"]),
    ("hospital", &["8610"]),
    ("laboratorio", &["8640"]),
    ("dentista", &["8630"]),
    ("odontologia", &["8630"]),
    ("veterinari*", &["7500"]),
    ("pet shop", &["7500", "4789"]),
    ("petshop", &["7500", "4789"]),
    ("caminhoes", &["4511", "4512"]),
    ("caminhao", &["4511"]),
    ("veiculos", &["4511"]),
    ("automoveis", &["4511"]),
    ("concessionar*", &["4511"]),
    ("oficina", &["4520"]),
    ("mecanica", &["4520"]),
    ("borracharia", &["4530"]),
    ("transportadora", &["4930"]),
    ("motoboy", &["5320"]),
    ("locadora de", &["7711"]),
    ("salao", &["9602"]),
    ("barbearia", &["9602"]),
    ("estetica", &["9602"]),
    ("cabeleirei*", &["9602"]),
    ("construcao", &["4120"]),
    ("construtora", &["4120"]),
    ("madeireira", &["1610"]),
    ("serraria", &["1610"]),
    ("marmoraria", &["2391"]),
    ("materiais de construcao", &["4744"]),
    ("hotel", &["5510"]),
    ("pousada", &["5510"]),
    ("motel", &["5510"]),
    ("hostel", &["5510"]),
    ("grafica", &["1811", "1812"]),
    ("graficas", &["1811", "1812"]),
    ("tipografia", &["1811"]),
    ("escola", &["8511", "8512", "8513"]),
    ("colegio", &["8512"]),
    ("faculdade", &["8530"]),
    ("universidade", &["8530"]),
    ("agropecuaria", &["4612", "4623"]),
    ("fazenda", &["0111"]),
    ("granja", &["0155"]),
    ("armazem", &["5211"]),
    ("deposito", &["5211"]),
];

/// True when `keyword` occurs in `tokens` as a contiguous run of whole words.
fn phrase_matches(tokens: &[&str], keyword: &str) -> bool {
    let (keyword, stem) = match keyword.strip_suffix('*') {
        Some(k) => (k, true),
        None => (keyword, false),
    };
    let wanted: Vec<&str> = keyword.split(' ').collect();
    if wanted.is_empty() || wanted.len() > tokens.len() {
        return false;
    }
    let last = wanted.len() - 1;
    tokens.windows(wanted.len()).any(|window| {
        window.iter().zip(&wanted).enumerate().all(|(i, (have, want))| {
            if stem && i == last {
                have.starts_with(want)
            } else {
                have == want
            }
        })
    })
}

fn tokens(normalized: &str) -> Vec<&str> {
    normalized.split(' ').filter(|t| !t.is_empty()).collect()
}

/// Expected prefixes for a free-text query; empty when the query type is unknown.
///
/// Exact key match wins, then the longest key found inside the query, then the first
/// key that contains the whole query.
pub fn expected_prefixes(query: &str) -> &'static [&'static str] {
    let normalized = normalize_name(query);
    if normalized.is_empty() {
        return &[];
    }
    if let Some((_, prefixes)) = QUERY_CATEGORIES.iter().find(|(key, _)| *key == normalized) {
        return *prefixes;
    }

    let query_tokens = tokens(&normalized);
    if let Some((_, prefixes)) = QUERY_CATEGORIES
        .iter()
        .filter(|(key, _)| phrase_matches(&query_tokens, key))
        .max_by_key(|(key, _)| key.len())
    {
        return *prefixes;
    }

    QUERY_CATEGORIES
        .iter()
        .find(|(key, _)| phrase_matches(&tokens(key), &normalized))
        .map(|(_, prefixes)| *prefixes)
        .unwrap_or(&[])
}

/// Owned copy of [`expected_prefixes`], used as the static fallback code set.
pub fn static_compatible_codes(query: &str) -> Vec<String> {
    expected_prefixes(query)
        .iter()
        .map(|p| p.to_string())
        .collect()
}

/// Every prefix implied by keywords in a business name, deduplicated.
pub fn name_hint_prefixes(name: &str) -> Vec<&'static str> {
    let normalized = normalize_name(name);
    let name_tokens = tokens(&normalized);
    let mut out: Vec<&'static str> = Vec::new();
    for (keyword, prefixes) in NAME_HINTS {
        if phrase_matches(&name_tokens, keyword) {
            for prefix in prefixes.iter().copied() {
                if !out.contains(&prefix) {
                    out.push(prefix);
                }
            }
        }
    }
    out
}

/// Two prefix sets overlap when any member of one is a prefix of a member of the other.
pub fn prefixes_overlap<A: AsRef<str>, B: AsRef<str>>(a: &[A], b: &[B]) -> bool {
    a.iter().any(|x| {
        b.iter().any(|y| {
            let (x, y) = (x.as_ref(), y.as_ref());
            x.starts_with(y) || y.starts_with(x)
        })
    })
}

/// Query keywords for the reference-table lookup: words of 3+ letters, stop words removed.
pub fn query_keywords(query: &str) -> Vec<String> {
    const STOPWORDS: &[&str] = &["de", "do", "da", "e", "em", "a", "o", "as", "os", "dos", "das"];
    normalize_name(query)
        .split(' ')
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_lookup_prefers_exact_then_longest() {
        assert_eq!(expected_prefixes("Restaurante"), &["5611", "5612"]);
        assert_eq!(expected_prefixes("farmácia"), &["4771"]);
        assert_eq!(expected_prefixes("materiais de construção"), &["4744"]);
        assert_eq!(expected_prefixes("melhor clinica medica"), &["8630"]);
    }

    #[test]
    fn query_lookup_matches_whole_words_only() {
        // "ti" must not fire inside "estetica" or "quitanda".
        assert_eq!(expected_prefixes("estética"), &["9602"]);
        assert!(expected_prefixes("xyzzy plumbus").is_empty());
    }

    #[test]
    fn query_contained_in_longer_key() {
        assert_eq!(expected_prefixes("salao"), &["9602"]);
    }

    #[test]
    fn name_hints_respect_word_boundaries_and_stems() {
        assert_eq!(name_hint_prefixes("Bar do Zé"), vec!["5611"]);
        assert_eq!(name_hint_prefixes("Barbearia do Zé"), vec!["9602"]);
        assert_eq!(name_hint_prefixes("Clínica Veterinária Amigo"), vec!["8630", "7500"]);
        assert!(name_hint_prefixes("Loja Azul").is_empty());
    }

    #[test]
    fn overlap_is_mutual_prefix() {
        assert!(prefixes_overlap(&["56"], &["5611"]));
        assert!(prefixes_overlap(&["5611"], &["56"]));
        assert!(!prefixes_overlap(&["4771"], &["5611", "5612"]));
    }

    #[test]
    fn keywords_drop_stopwords() {
        assert_eq!(
            query_keywords("Loja de Roupas"),
            vec!["loja".to_string(), "roupas".to_string()]
        );
    }
}
