//! Embedded wordlists for session-string generation.
//!
//! `adjective-noun-noun`, each drawn independently from 100-entry lists,
//! gives 100 * 100 * 100 = 1,000,000 combinations — meeting the 10^6 floor
//! from the wire protocol's session-string section.

pub const ADJECTIVES: [&str; 100] = [
    "swift", "quiet", "bold", "gentle", "bright", "crimson", "silver", "golden", "amber", "azure",
    "frozen", "blazing", "silent", "rapid", "lucky", "hidden", "noble", "rustic", "sleepy", "fierce",
    "calm", "dusty", "misty", "rough", "smooth", "tall", "tiny", "vast", "young", "ancient",
    "brave", "clever", "eager", "fuzzy", "gleaming", "hollow", "icy", "jolly", "keen", "lively",
    "mellow", "nimble", "odd", "plain", "quick", "rare", "shy", "stark", "tame", "urban",
    "vivid", "wary", "zesty", "arid", "brisk", "cozy", "dapper", "earnest", "faint", "glossy",
    "humble", "idle", "jagged", "kindly", "lean", "mighty", "nifty", "orderly", "placid", "quaint",
    "radiant", "somber", "thirsty", "upbeat", "wild", "yellow", "zealous", "bashful", "chilly", "daring",
    "elegant", "fond", "grand", "honest", "inky", "jovial", "kinetic", "lofty", "muted", "neat",
    "opaque", "proud", "rugged", "solar", "tidy", "unruly", "windy", "wry", "zany", "alpine",
];

pub const NOUNS: [&str; 100] = [
    "river", "canyon", "meadow", "harbor", "forest", "summit", "valley", "ridge", "island", "prairie",
    "glacier", "desert", "orchard", "lagoon", "tundra", "plateau", "delta", "grove", "reef", "marsh",
    "falcon", "otter", "heron", "badger", "lynx", "raven", "wolf", "sparrow", "beaver", "fox",
    "lantern", "compass", "anchor", "beacon", "ladder", "kettle", "mirror", "anvil", "chisel", "willow",
    "cedar", "maple", "birch", "aspen", "juniper", "cypress", "alder", "hazel", "poplar", "comet",
    "meteor", "nebula", "aurora", "eclipse", "zenith", "horizon", "galaxy", "crescent", "orbit", "pebble",
    "boulder", "dune", "cove", "fjord", "cliff", "cavern", "geyser", "mesa", "atoll", "drummer",
    "tailor", "weaver", "carver", "miller", "farmer", "sailor", "ranger", "scholar", "herald", "trumpet",
    "satchel", "buckle", "thimble", "spindle", "tankard", "quiver", "mallet", "bellows", "thunder", "breeze",
    "drizzle", "frost", "tide", "current", "gust", "shade", "glow", "canopy", "thicket", "foothill",
];

/// Draw a fresh `adjective-noun-noun` candidate. Collision handling (retry
/// against the registry, `Exhausted` after a bounded number of attempts)
/// lives in `session_registry`, not here.
pub fn random_session_string() -> String {
    use rand::seq::SliceRandom;
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).unwrap();
    let noun_a = NOUNS.choose(&mut rng).unwrap();
    let noun_b = NOUNS.choose(&mut rng).unwrap();
    format!("{adjective}-{noun_a}-{noun_b}")
}

/// `^[a-z]+-[a-z]+-[a-z]+$`, <= 47 chars, no leading/trailing hyphen.
pub fn is_well_formed(s: &str) -> bool {
    if s.is_empty() || s.len() > 47 {
        return false;
    }
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 3 {
        return false;
    }
    parts
        .iter()
        .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wordlists_have_no_duplicates() {
        use std::collections::HashSet;
        assert_eq!(ADJECTIVES.iter().collect::<HashSet<_>>().len(), 100);
        assert_eq!(NOUNS.iter().collect::<HashSet<_>>().len(), 100);
    }

    #[test]
    fn generated_strings_match_the_grammar() {
        for _ in 0..50 {
            let s = random_session_string();
            assert!(is_well_formed(&s), "{s} did not match the grammar");
        }
    }

    #[test]
    fn grammar_rejects_malformed_strings() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("-leading-hyphen-x"));
        assert!(!is_well_formed("trailing-hyphen-"));
        assert!(!is_well_formed("Upper-Case-Nope"));
        assert!(!is_well_formed("only-two"));
        assert!(!is_well_formed("has-a-digit1"));
        assert!(!is_well_formed(&"x".repeat(48)));
    }

    #[test]
    fn grammar_accepts_canonical_example() {
        assert!(is_well_formed("swift-river-canyon"));
    }
}
