//! State-Hash Function (C1, spec §4.4).
//!
//! Pure, deterministic fingerprint of a player-progress node. No I/O, no
//! async — every other component treats this as a library function.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Extra inputs mixed into the *legacy* hash variant (spec §4.4, §9):
/// non-transient story variables (`sv_` prefix) and sorted non-transient
/// global flags (key `gf`). "Transient" means the name/flag starts with
/// `_`.
#[derive(Debug, Clone, Default)]
pub struct LegacyExtras {
    pub story_variables: HashMap<String, Value>,
    pub global_flags: Vec<String>,
}

/// An implementer must pick one hash variant and stick with it for a given
/// story's scene cache (spec §9) — mixing variants silently forks the
/// cache. `StatsOnly` is the canonical choice for new stories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashVariant {
    StatsOnly,
    Legacy,
}

/// Canonical stats-only hash (spec §4.4 steps 1-4, reference behavior for
/// new code per §9).
pub fn hash_stats_only(previous_hash: &str, core_stats: &HashMap<String, i64>) -> String {
    let mut fields: BTreeMap<String, Value> = BTreeMap::new();
    fields.insert("_ph".to_string(), Value::String(previous_hash.to_string()));
    for (name, value) in core_stats {
        fields.insert(format!("cs_{name}"), Value::from(*value));
    }
    digest(fields)
}

/// Legacy hash: stats-only fields plus non-transient story variables
/// (`sv_<name>`) and a sorted, comma-joined `gf` key of non-transient
/// global flags. Kept for bit-compatible reads of hashes stored before the
/// canonical variant was adopted; new stories must not use this.
pub fn hash_legacy(
    previous_hash: &str,
    core_stats: &HashMap<String, i64>,
    extras: &LegacyExtras,
) -> String {
    let mut fields: BTreeMap<String, Value> = BTreeMap::new();
    fields.insert("_ph".to_string(), Value::String(previous_hash.to_string()));
    for (name, value) in core_stats {
        fields.insert(format!("cs_{name}"), Value::from(*value));
    }
    for (name, value) in &extras.story_variables {
        if name.starts_with('_') {
            continue;
        }
        fields.insert(format!("sv_{name}"), value.clone());
    }
    let mut flags: Vec<&String> = extras.global_flags.iter().filter(|f| !f.starts_with('_')).collect();
    flags.sort();
    if !flags.is_empty() {
        let joined = flags.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",");
        fields.insert("gf".to_string(), Value::String(joined));
    }
    digest(fields)
}

pub fn hash(variant: HashVariant, previous_hash: &str, core_stats: &HashMap<String, i64>) -> String {
    match variant {
        HashVariant::StatsOnly => hash_stats_only(previous_hash, core_stats),
        HashVariant::Legacy => hash_legacy(previous_hash, core_stats, &LegacyExtras::default()),
    }
}

/// Serialize the sorted field map as a canonical, whitespace-free JSON
/// object and SHA-256 the UTF-8 bytes (spec §4.4 steps 2-4).
fn digest(fields: BTreeMap<String, Value>) -> String {
    // serde_json::Map without the `preserve_order` feature is itself a
    // sorted BTreeMap, so inserting in key order and serializing produces
    // exactly `{"key1":v1,"key2":v2,...}` with no whitespace.
    let mut map = Map::new();
    for (k, v) in fields {
        map.insert(k, v);
    }
    let canonical = serde_json::to_string(&Value::Object(map)).expect("map of scalars never fails to serialize");

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(pairs: &[(&str, i64)]) -> HashMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn is_64_char_lowercase_hex() {
        let h = hash_stats_only("init", &stats(&[("hp", 50)]));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn key_order_does_not_affect_the_hash() {
        let a = hash_stats_only("init", &stats(&[("hp", 50), ("morale", 40)]));
        let b = hash_stats_only("init", &stats(&[("morale", 40), ("hp", 50)]));
        assert_eq!(a, b);
    }

    #[test]
    fn different_previous_hash_changes_the_result() {
        let a = hash_stats_only("init", &stats(&[("hp", 50)]));
        let b = hash_stats_only("deadbeef", &stats(&[("hp", 50)]));
        assert_ne!(a, b);
    }

    #[test]
    fn different_stat_value_changes_the_result() {
        let a = hash_stats_only("init", &stats(&[("hp", 50)]));
        let b = hash_stats_only("init", &stats(&[("hp", 51)]));
        assert_ne!(a, b);
    }

    #[test]
    fn legacy_variant_excludes_transient_names_and_flags() {
        let mut extras = LegacyExtras::default();
        extras.story_variables.insert("_scratch".into(), Value::from(1));
        extras.story_variables.insert("visited_cave".into(), Value::from(true));
        extras.global_flags = vec!["_internal".into(), "met_npc".into(), "alpha".into()];

        let with_transient = hash_legacy("init", &stats(&[("hp", 50)]), &extras);

        extras.story_variables.remove("_scratch");
        extras.global_flags.retain(|f| !f.starts_with('_'));
        let without_transient = hash_legacy("init", &stats(&[("hp", 50)]), &extras);

        assert_eq!(with_transient, without_transient, "transient entries must not affect the hash");
    }

    #[test]
    fn stats_only_and_legacy_diverge_when_extras_present() {
        let mut extras = LegacyExtras::default();
        extras.story_variables.insert("visited_cave".into(), Value::from(true));

        let canonical = hash_stats_only("init", &stats(&[("hp", 50)]));
        let legacy = hash_legacy("init", &stats(&[("hp", 50)]), &extras);
        assert_ne!(canonical, legacy, "mixing variants must fork the cache, which is exactly why only one may be used");
    }

    proptest::proptest! {
        #[test]
        fn hash_is_order_independent_for_any_stat_multiset(
            hp in 0i64..100,
            morale in 0i64..100,
            gold in 0i64..1000,
        ) {
            let a = stats(&[("hp", hp), ("morale", morale), ("gold", gold)]);
            let b = stats(&[("gold", gold), ("hp", hp), ("morale", morale)]);
            proptest::prop_assert_eq!(hash_stats_only("init", &a), hash_stats_only("init", &b));
        }
    }
}
