use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

static LEXICON: Lazy<HashMap<String, f64>> = Lazy::new(|| {
    let raw = include_str!("../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, f64>>(raw).expect("valid sentiment lexicon")
});

/// Scale applied to a valence preceded by a negator.
const NEGATION_SCALAR: f64 = -0.74;
/// Added to the magnitude of a word right after an intensifier.
const BOOSTER_INCR: f64 = 0.293;
/// Normalisation constant: `sum / sqrt(sum^2 + ALPHA)`.
const ALPHA: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    /// Compound polarity in [-1, 1].
    pub compound: f64,
    pub tokens: usize,
    /// Tokens found in the lexicon.
    pub hits: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    fn word_score(&self, w: &str) -> f64 {
        LEXICON.get(w).copied().unwrap_or(0.0)
    }

    /// Lexicon polarity of `text`. A negator within the previous three tokens
    /// flips and dampens a word; an intensifier right before it strengthens it.
    pub fn score_text(&self, text: &str) -> SentimentScore {
        let tokens: Vec<String> = tokenize(text).collect();
        let mut sum = 0.0;
        let mut hits = 0usize;

        for i in 0..tokens.len() {
            let base = self.word_score(&tokens[i]);
            if base == 0.0 {
                continue;
            }
            hits += 1;

            let mut v = base;
            if i >= 1 && is_booster(&tokens[i - 1]) {
                v += BOOSTER_INCR * v.signum();
            }
            let negated = (1..=3).any(|k| i >= k && is_negator(&tokens[i - k]));
            if negated {
                v *= NEGATION_SCALAR;
            }
            sum += v;
        }

        SentimentScore {
            compound: normalize(sum),
            tokens: tokens.len(),
            hits,
        }
    }

    pub fn compound(&self, text: &str) -> f64 {
        self.score_text(text).compound
    }
}

fn normalize(sum: f64) -> f64 {
    if sum == 0.0 {
        return 0.0;
    }
    let c = (sum / (sum * sum + ALPHA).sqrt()).clamp(-1.0, 1.0);
    (c * 10_000.0).round() / 10_000.0
}

/// Lower-case word tokens; inner apostrophes are kept so contractions stay whole.
fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}'))
        .map(|t| t.trim_matches(|c| c == '\'' || c == '\u{2019}'))
        .filter(|t| !t.is_empty())
        .map(|t| t.replace('\u{2019}', "'").to_lowercase())
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not"
            | "no"
            | "never"
            | "nor"
            | "isn't"
            | "wasn't"
            | "aren't"
            | "weren't"
            | "won't"
            | "can't"
            | "cannot"
            | "don't"
            | "doesn't"
            | "didn't"
            | "without"
    )
}

fn is_booster(tok: &str) -> bool {
    matches!(
        tok,
        "very" | "extremely" | "highly" | "deeply" | "hugely" | "really" | "so" | "most"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_follows_lexicon() {
        let a = SentimentAnalyzer::new();
        assert!(a.compound("Peace deal brings hope") > 0.0);
        assert!(a.compound("Deadly attack sparks outrage and fear") < 0.0);
        assert_eq!(a.compound("The committee met on Tuesday"), 0.0);
    }

    #[test]
    fn negation_flips_polarity() {
        let a = SentimentAnalyzer::new();
        assert!(a.compound("This is good") > 0.0);
        assert!(a.compound("This is not good") < 0.0);
        assert!(a.compound("It isn't a failure") > 0.0);
    }

    #[test]
    fn bounded_and_deterministic() {
        let a = SentimentAnalyzer::new();
        let text = "great great great excellent best victory win love ".repeat(20);
        let c = a.compound(&text);
        assert!(c <= 1.0 && c > 0.99);
        assert_eq!(c, a.compound(&text));

        let neg = "war death crisis disaster killed ".repeat(20);
        assert!(a.compound(&neg) >= -1.0);
    }

    #[test]
    fn boosters_strengthen() {
        let a = SentimentAnalyzer::new();
        assert!(a.compound("very good") > a.compound("good"));
    }

    #[test]
    fn curly_apostrophes_are_contractions() {
        let toks: Vec<String> = tokenize("It doesn\u{2019}t work, 'quoted'").collect();
        assert_eq!(toks, vec!["it", "doesn't", "work", "quoted"]);
    }
}
