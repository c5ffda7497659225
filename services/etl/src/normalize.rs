//! Country-name normalization.
//!
//! The survey export, the IMF spreadsheet and the World Bank feed each spell
//! countries their own way. Every raw label is folded to a canonical key
//! (trimmed, lowercased, single-spaced) and then looked up in a static alias
//! table that maps colloquial and alternate spellings onto the World Bank
//! spelling. A lookup miss keeps the folded label, so a spelling that is
//! neither canonical nor aliased silently becomes its own country. Extend
//! the table whenever the per-source key diagnostics show a fragment.

use std::collections::BTreeMap;
use std::sync::OnceLock;

/// `(alternate spelling, World Bank spelling)`, both already folded.
const ALIASES: &[(&str, &str)] = &[
    // Survey (Numbeo-style) short forms
    ("russia", "russian federation"),
    ("south korea", "korea, rep."),
    ("north korea", "korea, dem. people's rep."),
    ("iran", "iran, islamic rep."),
    ("egypt", "egypt, arab rep."),
    ("venezuela", "venezuela, rb"),
    ("yemen", "yemen, rep."),
    ("syria", "syrian arab republic"),
    ("turkey", "turkiye"),
    ("slovakia", "slovak republic"),
    ("kyrgyzstan", "kyrgyz republic"),
    ("laos", "lao pdr"),
    ("vietnam", "viet nam"),
    ("czech republic", "czechia"),
    ("hong kong", "hong kong sar, china"),
    ("hong kong (china)", "hong kong sar, china"),
    ("macao (china)", "macao sar, china"),
    ("macau", "macao sar, china"),
    ("kosovo (disputed territory)", "kosovo"),
    ("palestine", "west bank and gaza"),
    ("ivory coast", "cote d'ivoire"),
    ("brunei", "brunei darussalam"),
    ("cape verde", "cabo verde"),
    ("gambia", "gambia, the"),
    ("the gambia", "gambia, the"),
    ("bahamas", "bahamas, the"),
    ("the bahamas", "bahamas, the"),
    ("democratic republic of the congo", "congo, dem. rep."),
    ("dr congo", "congo, dem. rep."),
    ("republic of the congo", "congo, rep."),
    ("micronesia", "micronesia, fed. sts."),
    ("saint lucia", "st. lucia"),
    ("saint kitts and nevis", "st. kitts and nevis"),
    ("saint vincent and the grenadines", "st. vincent and the grenadines"),
    ("swaziland", "eswatini"),
    ("macedonia", "north macedonia"),
    ("east timor", "timor-leste"),
    ("burma", "myanmar"),
    ("bosnia-herzegovina", "bosnia and herzegovina"),
    ("usa", "united states"),
    ("united states of america", "united states"),
    ("uk", "united kingdom"),
    ("great britain", "united kingdom"),
    // IMF spellings
    ("china, people's republic of", "china"),
    ("korea, republic of", "korea, rep."),
    ("taiwan province of china", "taiwan"),
    ("türkiye", "turkiye"),
    ("türkiye, republic of", "turkiye"),
    ("hong kong sar", "hong kong sar, china"),
    ("macao sar", "macao sar, china"),
    ("lao p.d.r.", "lao pdr"),
    ("congo, dem. rep. of the", "congo, dem. rep."),
    ("congo, republic of", "congo, rep."),
    ("micronesia, fed. states of", "micronesia, fed. sts."),
    ("são tomé and príncipe", "sao tome and principe"),
    ("côte d'ivoire", "cote d'ivoire"),
    ("curaçao", "curacao"),
    ("moldova, republic of", "moldova"),
    ("aruba, kingdom of the netherlands", "aruba"),
];

static BUILTIN: OnceLock<AliasTable> = OnceLock::new();

/// Lookup table from folded alternate spellings to canonical keys.
#[derive(Debug, Clone)]
pub struct AliasTable {
    entries: BTreeMap<String, String>,
}

impl AliasTable {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let entries = pairs
            .iter()
            .map(|(alias, canonical)| (fold(alias), fold(canonical)))
            .collect();
        Self { entries }
    }

    /// The table shipped with the pipeline.
    pub fn builtin() -> &'static AliasTable {
        BUILTIN.get_or_init(|| AliasTable::new(ALIASES))
    }

    /// Canonical key for a raw label: folded, then aliased if an entry exists.
    pub fn resolve(&self, raw: &str) -> String {
        let folded = fold(raw);
        match self.entries.get(&folded) {
            Some(canonical) => canonical.clone(),
            None => folded,
        }
    }

    pub fn get(&self, folded: &str) -> Option<&str> {
        self.entries.get(folded).map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(a, c)| (a.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Trim, lowercase and collapse internal whitespace runs to one space.
pub fn fold(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical country key for a raw label using the built-in alias table.
pub fn normalize(raw: &str) -> String {
    AliasTable::builtin().resolve(raw)
}

/// Missing labels stay missing.
pub fn normalize_opt(raw: Option<&str>) -> Option<String> {
    raw.map(normalize)
}
