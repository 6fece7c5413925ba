//! Ordered rule evaluation: `pickUpstream(domain) -> group name`.

use crate::geosite::GeositeStore;
use regex::Regex;
use std::collections::HashMap;
use std::sync::RwLock;

/// One pattern within a rule, after its discriminator prefix has been
/// stripped off at config-load time.
#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    Geosite(String),
    Prefix(String),
    Suffix(String),
    Regex(String),
    Any,
}

impl Pattern {
    /// Parses a single pattern string (e.g. `"suffix:cn"`) into its typed
    /// form. An unrecognised discriminator is treated as a literal
    /// `suffix:` match on the whole string, mirroring how a plain domain
    /// with no prefix would be written in the reference config.
    pub fn parse(raw: &str) -> Pattern {
        if raw == "*" {
            return Pattern::Any;
        }

        match raw.split_once(':') {
            Some(("geosite", rest)) => Pattern::Geosite(rest.to_lowercase()),
            Some(("prefix", rest)) => Pattern::Prefix(rest.to_lowercase()),
            Some(("suffix", rest)) => Pattern::Suffix(rest.to_lowercase()),
            Some(("regex", rest)) => Pattern::Regex(rest.to_string()),
            _ => Pattern::Suffix(raw.to_lowercase()),
        }
    }
}

/// An ordered pair (pattern list, upstream group name).
#[derive(Clone, Debug)]
pub struct Rule {
    pub patterns: Vec<Pattern>,
    pub group: String,
}

/// No rule in declaration order was satisfied.
#[derive(Debug)]
pub struct NoMatch;

/// Matches `domain` against `value` at a label boundary rather than as a
/// raw substring: `value` must either equal `domain`, or occur
/// immediately after a `.` (or at position 0) within it. A raw
/// suffix/substring match on `cn` would wrongly match `unicorn.example`.
pub fn label_boundary_match(domain: &str, value: &str) -> bool {
    if value.is_empty() {
        return false;
    }

    match domain.len().checked_sub(value.len()) {
        None => false,
        Some(0) => domain.eq_ignore_ascii_case(value),
        Some(offset) => {
            domain[offset..].eq_ignore_ascii_case(value)
                && domain.as_bytes()[offset - 1] == b'.'
        }
    }
}

/// Holds the rules, the geosite store, and a lazily-populated regex
/// cache. One instance is built at startup and shared by reference with
/// every request.
pub struct RuleEngine {
    rules: Vec<Rule>,
    geosite: GeositeStore,
    regex_cache: RwLock<HashMap<String, Regex>>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>, geosite: GeositeStore) -> RuleEngine {
        RuleEngine {
            rules,
            geosite,
            regex_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Evaluates `domain` (expected already lowercased by the caller)
    /// against the rule list in declaration order and returns the chosen
    /// upstream group name.
    pub fn pick_upstream(&self, domain: &str) -> Result<&str, NoMatch> {
        for rule in &self.rules {
            if self.rule_matches(rule, domain) {
                return Ok(&rule.group);
            }
        }

        Err(NoMatch)
    }

    fn rule_matches(&self, rule: &Rule, domain: &str) -> bool {
        let mut geosite_codes = Vec::new();

        for pattern in &rule.patterns {
            match pattern {
                Pattern::Any => return true,
                Pattern::Prefix(p) => {
                    if domain.to_lowercase().starts_with(p.as_str()) {
                        return true;
                    }
                }
                Pattern::Suffix(s) => {
                    if label_boundary_match(domain, s) {
                        return true;
                    }
                }
                Pattern::Regex(re) => {
                    if self.regex_matches(re, domain) {
                        return true;
                    }
                }
                Pattern::Geosite(code) => geosite_codes.push(code.as_str()),
            }
        }

        if geosite_codes.is_empty() {
            return false;
        }

        self.geosite.contains(domain, &geosite_codes)
    }

    fn regex_matches(&self, pattern: &str, domain: &str) -> bool {
        if let Some(re) = self.regex_cache.read().unwrap().get(pattern) {
            return re.is_match(domain);
        }

        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                log::warn!("invalid rule regex '{}': {}", pattern, e);
                return false;
            }
        };

        let matched = re.is_match(domain);
        self.regex_cache.write().unwrap().insert(pattern.to_string(), re);
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_boundary_matches_suffix_but_not_substring() {
        assert!(label_boundary_match("example.cn", "cn"));
        assert!(label_boundary_match("cn", "cn"));
        assert!(!label_boundary_match("unicorn", "cn"));
        assert!(label_boundary_match("a.b.example.cn", "example.cn"));
    }

    #[test]
    fn catch_all_pattern_matches_anything() {
        let engine = RuleEngine::new(
            vec![Rule {
                patterns: vec![Pattern::Any],
                group: "default".to_string(),
            }],
            GeositeStore::empty(),
        );

        assert_eq!(engine.pick_upstream("anything.example").unwrap(), "default");
    }

    #[test]
    fn literal_match_short_circuits_before_geosite() {
        let engine = RuleEngine::new(
            vec![Rule {
                patterns: vec![Pattern::Suffix("io".to_string()), Pattern::Geosite("never-loaded".to_string())],
                group: "cloudflare-doh".to_string(),
            }],
            GeositeStore::empty(),
        );

        assert_eq!(engine.pick_upstream("some-random.io").unwrap(), "cloudflare-doh");
    }

    #[test]
    fn geosite_only_rule_falls_through_on_miss() {
        let engine = RuleEngine::new(
            vec![
                Rule {
                    patterns: vec![Pattern::Geosite("cn".to_string())],
                    group: "alidns-doh".to_string(),
                },
                Rule {
                    patterns: vec![Pattern::Any],
                    group: "fallback".to_string(),
                },
            ],
            GeositeStore::empty(),
        );

        assert_eq!(engine.pick_upstream("example.com").unwrap(), "fallback");
    }
}
