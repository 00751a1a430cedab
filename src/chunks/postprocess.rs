//! Text correction and replace rules applied to ranked candidates

use regex::Regex;

use crate::config::ReplaceRuleConfig;

/// Language-specific cleanup of recognized text
pub trait TextCorrector: Send + Sync {
    fn correct(&self, text: &str) -> String;
}

/// Removes the spaces Tesseract puts between Japanese characters.
///
/// A space survives only when both neighbours are Latin letters or digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct CjkSpacingCorrector;

impl TextCorrector for CjkSpacingCorrector {
    fn correct(&self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        for (i, &c) in chars.iter().enumerate() {
            if c == ' ' || c == '\u{3000}' {
                let prev = out.chars().last();
                let next = chars[i + 1..].iter().find(|n| **n != ' ' && **n != '\u{3000}');
                let keep = matches!((prev, next), (Some(p), Some(n)) if p.is_ascii_alphanumeric() && n.is_ascii_alphanumeric());
                if keep && !out.ends_with(' ') {
                    out.push(' ');
                }
                continue;
            }
            out.push(c);
        }
        out
    }
}

/// One compiled replacement
#[derive(Debug, Clone)]
struct ReplaceRule {
    pattern: Regex,
    replacement: String,
}

/// Ordered regex replacements
#[derive(Debug, Clone, Default)]
pub struct ReplaceRules {
    rules: Vec<ReplaceRule>,
}

impl ReplaceRules {
    /// Compile configured rules; any invalid pattern fails the whole set
    pub fn compile(configs: &[ReplaceRuleConfig]) -> Result<Self, regex::Error> {
        let rules = configs
            .iter()
            .map(|c| {
                Ok(ReplaceRule {
                    pattern: Regex::new(&c.pattern)?,
                    replacement: c.replacement.clone(),
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, text: &str) -> String {
        self.rules.iter().fold(text.to_string(), |acc, rule| {
            rule.pattern.replace_all(&acc, rule.replacement.as_str()).into_owned()
        })
    }
}
