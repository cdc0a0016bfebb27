//! Prompt-driven backend selection
//!
//! A keyword index classifies a prompt into a use-case, and the use-case's
//! preferred and fallback lists pick a backend. Prompts that match nothing go
//! through generic quality/speed heuristics and then a fixed order.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::backend::registry::KNOWN_BACKENDS;

/// A labeled category of generation intent
#[derive(Debug, Clone)]
pub struct UseCase {
    pub label: &'static str,
    pub keywords: &'static [&'static str],
    pub preferred: &'static [&'static str],
    pub fallback: &'static [&'static str],
    pub base_confidence: f64,
}

/// Reference table. Declaration order breaks score ties.
pub const USE_CASES: &[UseCase] = &[
    UseCase {
        label: "text_logo",
        keywords: &["logo", "text", "with text", "logo for", "wordmark"],
        preferred: &["ideogram", "openai"],
        fallback: &["gemini", "stability"],
        base_confidence: 0.95,
    },
    UseCase {
        label: "typography",
        keywords: &["poster", "typography", "lettering", "signage", "banner", "headline"],
        preferred: &["ideogram", "openai"],
        fallback: &["bfl"],
        base_confidence: 0.85,
    },
    UseCase {
        label: "photorealistic",
        keywords: &[
            "photorealistic",
            "photo",
            "realistic",
            "photograph",
            "portrait",
            "dslr",
            "35mm",
            "cinematic lighting",
        ],
        preferred: &["bfl", "stability"],
        fallback: &["openai", "gemini"],
        base_confidence: 0.9,
    },
    UseCase {
        label: "artistic",
        keywords: &[
            "painting",
            "watercolor",
            "oil painting",
            "artistic",
            "illustration",
            "sketch",
            "anime",
        ],
        preferred: &["stability", "bfl"],
        fallback: &["openai"],
        base_confidence: 0.8,
    },
    UseCase {
        label: "product",
        keywords: &["product shot", "product photo", "e-commerce", "packshot", "white background"],
        preferred: &["openai", "bfl"],
        fallback: &["stability"],
        base_confidence: 0.85,
    },
    UseCase {
        label: "fast_draft",
        keywords: &["quick", "draft", "concept", "thumbnail", "rough"],
        preferred: &["replicate", "stability"],
        fallback: &["gemini"],
        base_confidence: 0.7,
    },
];

const QUALITY_KEYWORDS: &[&str] = &["high quality", "detailed", "4k", "8k", "professional", "masterpiece"];
const QUALITY_ORDER: &[&str] = &["openai", "bfl", "stability"];

const SPEED_KEYWORDS: &[&str] = &["fast", "quick", "simple", "draft"];
const SPEED_ORDER: &[&str] = &["replicate", "gemini", "stability"];

/// Outcome of classifying a prompt
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub use_case: &'static str,
    pub confidence: f64,
    pub matched_keywords: usize,
}

/// Keyword index over a fixed use-case table, built once
#[derive(Debug, Clone)]
pub struct SelectionEngine {
    use_cases: Vec<UseCase>,
    /// keyword -> indices into `use_cases`
    index: HashMap<String, Vec<usize>>,
}

impl Default for SelectionEngine {
    fn default() -> Self {
        Self::new(USE_CASES.to_vec())
    }
}

impl SelectionEngine {
    pub fn new(use_cases: Vec<UseCase>) -> Self {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, use_case) in use_cases.iter().enumerate() {
            for keyword in use_case.keywords {
                let slot = index.entry(keyword.to_lowercase()).or_default();
                if !slot.contains(&position) {
                    slot.push(position);
                }
            }
        }

        debug!(
            use_cases = use_cases.len(),
            keywords = index.len(),
            "Built selection index"
        );
        Self { use_cases, index }
    }

    /// Classify a prompt; `None` means no keyword matched.
    ///
    /// Each matched keyword adds `chars x words` to its use-cases' scores.
    /// The highest score wins; on a tie the earlier declared use-case wins.
    pub fn classify(&self, prompt: &str) -> Option<Classification> {
        let prompt = prompt.to_lowercase();
        let mut scores = vec![0usize; self.use_cases.len()];
        let mut matches = vec![0usize; self.use_cases.len()];

        for (keyword, positions) in &self.index {
            if !prompt.contains(keyword.as_str()) {
                continue;
            }
            let weight = keyword.chars().count() * keyword.split_whitespace().count();
            for &position in positions {
                scores[position] += weight;
                matches[position] += 1;
            }
        }

        let mut winner: Option<usize> = None;
        for (position, &score) in scores.iter().enumerate() {
            if score == 0 {
                continue;
            }
            if winner.map_or(true, |best| score > scores[best]) {
                winner = Some(position);
            }
        }

        let position = winner?;
        let use_case = &self.use_cases[position];
        let total = use_case.keywords.len().max(1) as f64;
        let confidence = use_case.base_confidence * (0.5 + 0.5 * matches[position] as f64 / total);

        Some(Classification {
            use_case: use_case.label,
            confidence,
            matched_keywords: matches[position],
        })
    }

    /// Pick a backend from `available` for `prompt`.
    ///
    /// An explicit name that is available wins outright. Returns `None` only
    /// when `available` is empty.
    pub fn select_backend(&self, prompt: &str, available: &[String], explicit: Option<&str>) -> Option<String> {
        if let Some(name) = explicit {
            if let Some(found) = find(available, name) {
                return Some(found);
            }
        }

        if let Some(classification) = self.classify(prompt) {
            let use_case = self
                .use_cases
                .iter()
                .find(|u| u.label == classification.use_case)?;
            let ranked = use_case.preferred.iter().chain(use_case.fallback.iter());
            for name in ranked {
                if let Some(found) = find(available, name) {
                    info!(
                        use_case = %classification.use_case,
                        confidence = classification.confidence,
                        backend = %found,
                        "Selected backend for prompt"
                    );
                    return Some(found);
                }
            }
            debug!(use_case = %classification.use_case, "No preferred backend available");
        }

        self.heuristic(prompt, available)
    }

    /// Quality keywords, then speed keywords, then the fixed order, then
    /// whatever is available first.
    pub fn heuristic(&self, prompt: &str, available: &[String]) -> Option<String> {
        let prompt = prompt.to_lowercase();

        let mut orders: Vec<&[&str]> = Vec::with_capacity(3);
        if QUALITY_KEYWORDS.iter().any(|k| prompt.contains(k)) {
            orders.push(QUALITY_ORDER);
        }
        if SPEED_KEYWORDS.iter().any(|k| prompt.contains(k)) {
            orders.push(SPEED_ORDER);
        }
        orders.push(KNOWN_BACKENDS);

        let chosen = orders
            .into_iter()
            .flat_map(|order| order.iter())
            .find_map(|name| find(available, name))
            .or_else(|| available.first().cloned());

        if let Some(name) = &chosen {
            debug!(backend = %name, "Selected backend by heuristic");
        }
        chosen
    }
}

/// Fixed fallback order filtered to `available`, skipping `exclude`
pub fn fallback_order(available: &[String], exclude: &str) -> Vec<String> {
    let mut ordered: Vec<String> = KNOWN_BACKENDS
        .iter()
        .filter_map(|name| find(available, name))
        .collect();
    for name in available {
        if !ordered.iter().any(|o| o.eq_ignore_ascii_case(name)) {
            ordered.push(name.clone());
        }
    }
    ordered.retain(|name| !name.eq_ignore_ascii_case(exclude));
    ordered
}

fn find(available: &[String], name: &str) -> Option<String> {
    available
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(name))
        .cloned()
}
