//! URL Matcher
//!
//! Every outbound request goes through here. Block rules are plain substring
//! tests against the full URL and are evaluated first; prune rules are
//! regexes. First match wins.

use regex::Regex;

use crate::error::FilterError;
use crate::patterns::RuleTable;
use crate::types::{MatchResult, UrlClass};
use crate::url::{absolutize_src, extract_host};

// =============================================================================
// Rules
// =============================================================================

/// A compiled URL rule.
#[derive(Debug, Clone)]
pub enum UrlRule {
    /// Exact substring match against the full URL.
    Block(String),
    /// Regex match selecting URLs whose JSON body is sanitized.
    Prune {
        pattern: Regex,
        /// The rule does not apply when this substring follows the match.
        unless: Option<String>,
    },
}

impl UrlRule {
    /// Test the rule against a URL.
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Block(needle) => url.contains(needle.as_str()),
            Self::Prune { pattern, unless: None } => pattern.is_match(url),
            Self::Prune {
                pattern,
                unless: Some(excluded),
            } => pattern
                .find_iter(url)
                .any(|m| !url[m.end()..].contains(excluded.as_str())),
        }
    }

    pub fn class(&self) -> UrlClass {
        match self {
            Self::Block(_) => UrlClass::Block,
            Self::Prune { .. } => UrlClass::Prune,
        }
    }
}

// =============================================================================
// Matcher
// =============================================================================

/// Compiled block and prune rules.
#[derive(Debug, Clone)]
pub struct Matcher {
    block: Vec<UrlRule>,
    prune: Vec<UrlRule>,
}

impl Matcher {
    /// Compile a rule table, rejecting it if any prune regex is invalid.
    pub fn new(table: &RuleTable) -> Result<Self, FilterError> {
        let mut prune = Vec::with_capacity(table.prune.len());
        for spec in &table.prune {
            let pattern = Regex::new(&spec.pattern)
                .map_err(|e| FilterError::Rules(format!("prune pattern '{}': {}", spec.pattern, e)))?;
            prune.push(UrlRule::Prune {
                pattern,
                unless: spec.unless.clone(),
            });
        }
        Ok(Self {
            block: Self::block_rules(table),
            prune,
        })
    }

    /// Compile a rule table, skipping invalid prune regexes.
    pub fn new_lenient(table: &RuleTable) -> Self {
        let prune = table
            .prune
            .iter()
            .filter_map(|spec| match Regex::new(&spec.pattern) {
                Ok(pattern) => Some(UrlRule::Prune {
                    pattern,
                    unless: spec.unless.clone(),
                }),
                Err(e) => {
                    log::warn!("dropping prune pattern '{}': {}", spec.pattern, e);
                    None
                }
            })
            .collect();
        Self {
            block: Self::block_rules(table),
            prune,
        }
    }

    fn block_rules(table: &RuleTable) -> Vec<UrlRule> {
        table
            .block
            .iter()
            .filter(|needle| !needle.is_empty())
            .map(|needle| UrlRule::Block(needle.clone()))
            .collect()
    }

    pub fn prune_rule_count(&self) -> usize {
        self.prune.len()
    }

    pub fn block_rule_count(&self) -> usize {
        self.block.len()
    }

    /// Classify a URL and report which rule decided.
    pub fn match_url(&self, url: &str) -> MatchResult {
        if url.is_empty() {
            return MatchResult::default();
        }

        let decided = self
            .block
            .iter()
            .enumerate()
            .chain(self.prune.iter().enumerate())
            .find(|(_, rule)| rule.matches(url));

        match decided {
            Some((idx, rule)) => MatchResult {
                class: rule.class(),
                rule_index: idx as i32,
            },
            None => MatchResult::default(),
        }
    }

    /// Classify a URL: Block > Prune > Pass.
    #[inline]
    pub fn classify(&self, url: &str) -> UrlClass {
        let result = self.match_url(url);
        if result.class != UrlClass::Pass {
            log::debug!(
                "{} {} (rule {})",
                result.class.as_str(),
                extract_host(url).unwrap_or("<relative>"),
                result.rule_index
            );
        }
        result.class
    }

    #[inline]
    pub fn is_blocked(&self, url: &str) -> bool {
        self.match_url(url).class == UrlClass::Block
    }

    /// Whether a script or frame source should be detached on insertion.
    pub fn is_blocked_embed(&self, src: &str) -> bool {
        !src.is_empty() && self.is_blocked(&absolutize_src(src))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PruneSpec;

    fn matcher() -> Matcher {
        Matcher::new(&RuleTable::builtin()).unwrap()
    }

    #[test]
    fn test_block_pagead() {
        assert_eq!(matcher().classify("https://www.youtube.com/pagead/foo"), UrlClass::Block);
        assert_eq!(
            matcher().classify("https://googleads.g.doubleclick.net/pagead/id"),
            UrlClass::Block
        );
    }

    #[test]
    fn test_prune_watch() {
        assert_eq!(matcher().classify("https://www.youtube.com/watch?v=abc"), UrlClass::Prune);
        assert_eq!(
            matcher().classify("/youtubei/v1/next?prettyPrint=false"),
            UrlClass::Prune
        );
    }

    #[test]
    fn test_pass_static_asset() {
        assert_eq!(matcher().classify("https://www.gstatic.com/static/logo.png"), UrlClass::Pass);
        assert_eq!(matcher().classify(""), UrlClass::Pass);
    }

    #[test]
    fn test_block_takes_precedence_over_prune() {
        // Matches "/player" and "youtube.com/youtubei/v1/player/ad_break"
        let url = "https://www.youtube.com/youtubei/v1/player/ad_break?v=abc";
        let result = matcher().match_url(url);
        assert_eq!(result.class, UrlClass::Block);
    }

    #[test]
    fn test_rule_index_is_per_table() {
        let table = RuleTable {
            block: vec!["/ads/".to_string()],
            prune: vec![
                PruneSpec {
                    pattern: "/next".to_string(),
                    unless: None,
                },
                PruneSpec {
                    pattern: "/browse".to_string(),
                    unless: None,
                },
            ],
            ..RuleTable::builtin()
        };
        let m = Matcher::new(&table).unwrap();
        assert_eq!(m.block_rule_count(), 1);
        assert_eq!(m.prune_rule_count(), 2);
        assert_eq!(
            m.match_url("https://x.example/browse"),
            MatchResult {
                class: UrlClass::Prune,
                rule_index: 1,
            }
        );
        assert_eq!(m.match_url("https://x.example/ads/browse").class, UrlClass::Block);
        assert_eq!(m.match_url("https://x.example/ads/browse").rule_index, 0);
    }

    #[test]
    fn test_player_prune_excludes_drm_license() {
        let m = matcher();
        assert_eq!(m.classify("https://www.youtube.com/youtubei/v1/player?key=x"), UrlClass::Prune);
        assert_eq!(
            m.classify("https://www.youtube.com/youtubei/v1/player/get_drm_license?key=x"),
            UrlClass::Pass
        );
    }

    #[test]
    fn test_prune_exclusion_only_looks_after_match() {
        let rule = UrlRule::Prune {
            pattern: Regex::new("/player").unwrap(),
            unless: Some("drm".to_string()),
        };
        assert!(rule.matches("https://drm.example/player"));
        assert!(!rule.matches("https://x.example/player?drm=1"));
    }

    #[test]
    fn test_blocked_embed() {
        let m = matcher();
        assert!(m.is_blocked_embed("//pagead2.googlesyndication.com/pagead/js/adsbygoogle.js"));
        assert!(!m.is_blocked_embed("https://www.youtube.com/s/player/base.js"));
        assert!(!m.is_blocked_embed(""));
    }
}
