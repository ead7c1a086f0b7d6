//! DMX universe / start address extraction from free text.
//!
//! ArtNet nodes have no standard field for the patch of the fixture behind
//! them, so installers write it into the long name. The default pattern set
//! covers the common conventions; more can be added from configuration.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Largest valid ArtNet port-address (15 bits).
pub const MAX_UNIVERSE: u16 = 32767;

/// Highest DMX slot.
pub const MAX_ADDRESS: u16 = 512;

const DEFAULT_PATTERNS: &[&str] = &[
    r"\bDMX\b\s*:?\s*(?P<address>\d+)\s*,?\s*Universe\s*:?\s*(?P<universe>\d+)",
    r"Univ(?:erse)?\.?\s*:?\s*(?P<universe>\d+)\s*,?\s*Addr(?:ess)?\.?\s*:?\s*(?P<address>\d+)",
];

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("Invalid pattern '{pattern}': {source}")]
    Invalid {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Pattern '{pattern}' lacks the named group '{group}'")]
    MissingGroup { pattern: String, group: &'static str },
}

/// Ordered set of case-insensitive patterns, each with `universe` and
/// `address` named groups.
#[derive(Debug, Clone)]
pub struct AddressPatterns {
    patterns: Vec<Regex>,
}

impl AddressPatterns {
    /// The built-in conventions only.
    pub fn builtin() -> Self {
        let patterns = DEFAULT_PATTERNS
            .iter()
            .filter_map(|p| compile(p).ok())
            .collect();
        Self { patterns }
    }

    /// Built-ins followed by `extra`, in the given order.
    pub fn with_extra<S: AsRef<str>>(extra: &[S]) -> Result<Self, PatternError> {
        let mut set = Self::builtin();
        for pattern in extra {
            set.patterns.push(compile(pattern.as_ref())?);
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The well-formed `(universe, address)` that starts earliest in `text`,
    /// whichever pattern found it. Matches starting at the same offset go to
    /// the pattern listed first.
    pub fn extract(&self, text: &str) -> Option<(u16, u16)> {
        self.patterns
            .iter()
            .filter_map(|re| {
                re.captures_iter(text).find_map(|caps| {
                    let universe: u16 = caps.name("universe")?.as_str().parse().ok()?;
                    let address: u16 = caps.name("address")?.as_str().parse().ok()?;
                    let start = caps.get(0)?.start();
                    is_well_formed(universe, address).then_some((start, (universe, address)))
                })
            })
            .min_by_key(|(start, _)| *start)
            .map(|(_, found)| found)
    }
}

impl Default for AddressPatterns {
    fn default() -> Self {
        Self::builtin()
    }
}

fn compile(pattern: &str) -> Result<Regex, PatternError> {
    let re = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| PatternError::Invalid {
            pattern: pattern.to_string(),
            source,
        })?;
    for group in ["universe", "address"] {
        if !re.capture_names().flatten().any(|name| name == group) {
            return Err(PatternError::MissingGroup {
                pattern: pattern.to_string(),
                group,
            });
        }
    }
    Ok(re)
}

fn is_well_formed(universe: u16, address: u16) -> bool {
    (1..=MAX_ADDRESS).contains(&address) && universe <= MAX_UNIVERSE
}

/// Extract with the built-in pattern set.
pub fn extract_address_universe(text: &str) -> Option<(u16, u16)> {
    static BUILTIN: OnceLock<AddressPatterns> = OnceLock::new();
    BUILTIN.get_or_init(AddressPatterns::builtin).extract(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_patterns_compile() {
        assert_eq!(AddressPatterns::builtin().len(), DEFAULT_PATTERNS.len());
    }

    #[test]
    fn test_universe_address_forms() {
        assert_eq!(extract_address_universe("Universe 3 Address 120"), Some((3, 120)));
        assert_eq!(extract_address_universe("univ: 3, addr: 120"), Some((3, 120)));
        assert_eq!(extract_address_universe("Spot UNIVERSE:0 ADDRESS:1"), Some((0, 1)));
    }

    #[test]
    fn test_dmx_universe_form() {
        assert_eq!(extract_address_universe("DMX: 120 Universe: 3"), Some((3, 120)));
        assert_eq!(
            extract_address_universe("Robin 600 LEDWash DMX:101 Universe:2"),
            Some((2, 101))
        );
    }

    #[test]
    fn test_dmx_must_stand_alone() {
        assert_eq!(extract_address_universe("ArtNet DMX512 Universe 1"), None);
        assert_eq!(extract_address_universe("DMX512 node Universe 1 Address 7"), Some((1, 7)));
        assert_eq!(extract_address_universe("Node (DMX 9, Universe 1)"), Some((1, 9)));
    }

    #[test]
    fn test_earliest_match_wins() {
        assert_eq!(
            extract_address_universe("Universe 1 Address 2 / DMX: 5 Universe: 6"),
            Some((1, 2))
        );
        assert_eq!(
            extract_address_universe("DMX: 5 Universe: 6 / Universe 1 Address 2"),
            Some((6, 5))
        );
    }

    #[test]
    fn test_no_match() {
        assert_eq!(extract_address_universe("Fixture A"), None);
        assert_eq!(extract_address_universe(""), None);
    }

    #[test]
    fn test_out_of_range_values_skipped() {
        assert_eq!(extract_address_universe("Universe 1 Address 0"), None);
        assert_eq!(extract_address_universe("Universe 1 Address 513"), None);
        assert_eq!(extract_address_universe("Universe 40000 Address 1"), None);
        // A later well-formed match still wins.
        assert_eq!(
            extract_address_universe("Universe 1 Address 999 / Universe 2 Address 5"),
            Some((2, 5))
        );
    }

    #[test]
    fn test_extra_patterns() {
        let set = AddressPatterns::with_extra(&[r"U(?P<universe>\d+)/(?P<address>\d+)"]).unwrap();
        assert_eq!(set.extract("Wash u4/17"), Some((4, 17)));
        assert_eq!(set.extract("Universe 1 Address 2 u4/17"), Some((1, 2)));
        assert_eq!(set.extract("u4/17 Universe 1 Address 2"), Some((4, 17)));
    }

    #[test]
    fn test_invalid_extra_patterns() {
        assert!(matches!(
            AddressPatterns::with_extra(&["(unclosed"]),
            Err(PatternError::Invalid { .. })
        ));
        assert!(matches!(
            AddressPatterns::with_extra(&[r"(?P<universe>\d+)"]),
            Err(PatternError::MissingGroup { group: "address", .. })
        ));
    }
}
