//! Shopping-task detection for plan auto-injection.
//!
//! Tasks that read like purchases get `detect_location` and
//! `find_best_website` prepended to the plan handed to the engine.

use regex::Regex;
use std::sync::OnceLock;

/// Single keywords matched on word boundaries.
const WORDS: &[&str] = &[
    // transaction verbs
    "buy", "purchase", "shop", "order",
    // price terms
    "price", "cost", "cheapest",
    // product nouns
    "laptop", "phone", "headphones", "camera", "watch", "shoes", "clothes",
    "tablet", "keyboard", "monitor", "charger",
    // marketplace terms
    "ecommerce", "marketplace",
];

/// Multi-word phrases matched as substrings.
const PHRASES: &[&str] = &["get me", "find me", "best deal", "online store"];

fn word_matcher() -> &'static Regex {
    static MATCHER: OnceLock<Regex> = OnceLock::new();
    MATCHER.get_or_init(|| {
        let alternation = WORDS.join("|");
        Regex::new(&format!(r"\b(?:{alternation})\b")).expect("static pattern is valid")
    })
}

/// Case-insensitive match against the shopping keyword classes.
pub fn is_shopping_task(task: &str) -> bool {
    let lowered = task.to_lowercase();
    if PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        return true;
    }
    word_matcher().is_match(&lowered)
}
