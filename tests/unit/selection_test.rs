//! Unit tests for prompt-driven backend selection

use imagegen_gateway::gateway::selection::{fallback_order, SelectionEngine, USE_CASES};

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn all_backends() -> Vec<String> {
    names(&["openai", "bfl", "stability", "ideogram", "gemini", "replicate"])
}

#[test]
fn test_logo_prompt_classifies_as_text_logo() {
    let engine = SelectionEngine::default();
    let classification = engine.classify("logo for a coffee shop with text").unwrap();

    assert_eq!(classification.use_case, "text_logo");
    assert_eq!(classification.matched_keywords, 4);
    assert!(classification.confidence > 0.8);
    assert!((classification.confidence - 0.855).abs() < 1e-9);
}

#[test]
fn test_classification_is_stable() {
    let engine = SelectionEngine::default();
    let prompt = "A Photorealistic portrait, 35mm, cinematic lighting";
    let first = engine.classify(prompt);
    for _ in 0..5 {
        assert_eq!(engine.classify(prompt), first);
    }
    assert_eq!(first.unwrap().use_case, "photorealistic");
}

#[test]
fn test_confidence_stays_in_range() {
    let engine = SelectionEngine::default();
    for use_case in USE_CASES {
        let prompt = use_case.keywords.join(" ");
        let c = engine.classify(&prompt).unwrap();
        assert!(c.confidence > 0.0 && c.confidence <= 1.0, "{}: {}", prompt, c.confidence);
    }
}

#[test]
fn test_preferred_backend_for_use_case() {
    let engine = SelectionEngine::default();
    let available = all_backends();

    assert_eq!(
        engine.select_backend("logo for a coffee shop with text", &available, None),
        Some("ideogram".to_string())
    );
    assert_eq!(
        engine.select_backend("a watercolor painting of a harbor", &available, None),
        Some("stability".to_string())
    );
    assert_eq!(
        engine.select_backend("product shot on a white background", &available, None),
        Some("openai".to_string())
    );
}

#[test]
fn test_use_case_fallback_list_is_consulted() {
    let engine = SelectionEngine::default();
    let available = names(&["stability", "replicate"]);
    assert_eq!(
        engine.select_backend("a logo with text", &available, None),
        Some("stability".to_string())
    );
}

#[test]
fn test_explicit_available_name_wins() {
    let engine = SelectionEngine::default();
    let available = all_backends();
    assert_eq!(
        engine.select_backend("logo for a coffee shop with text", &available, Some("GEMINI")),
        Some("gemini".to_string())
    );

    // An explicit name that is not available is ignored
    let available = names(&["ideogram", "bfl"]);
    assert_eq!(
        engine.select_backend("logo for a coffee shop", &available, Some("openai")),
        Some("ideogram".to_string())
    );
}

#[test]
fn test_quality_and_speed_heuristics() {
    let engine = SelectionEngine::default();

    assert_eq!(
        engine.select_backend("a detailed mountain lake", &names(&["gemini", "bfl"]), None),
        Some("bfl".to_string())
    );
    assert_eq!(
        engine.select_backend("a simple mountain lake", &names(&["stability", "gemini"]), None),
        Some("gemini".to_string())
    );
}

#[test]
fn test_unmatched_prompt_uses_fixed_order() {
    let engine = SelectionEngine::default();

    assert_eq!(
        engine.select_backend("a mountain lake", &names(&["replicate", "stability"]), None),
        Some("stability".to_string())
    );
    assert_eq!(
        engine.select_backend("a mountain lake", &names(&["custom"]), None),
        Some("custom".to_string())
    );
    // Classified, but nothing the use-case ranks is available
    assert_eq!(
        engine.select_backend("a photo of a fox", &names(&["replicate"]), None),
        Some("replicate".to_string())
    );
}

#[test]
fn test_empty_pool_selects_nothing() {
    let engine = SelectionEngine::default();
    assert_eq!(engine.select_backend("logo with text", &[], None), None);
    assert_eq!(engine.select_backend("anything", &[], Some("openai")), None);
}

#[test]
fn test_fallback_order_follows_known_backends() {
    assert_eq!(
        fallback_order(&all_backends(), "bfl"),
        names(&["openai", "stability", "ideogram", "gemini", "replicate"])
    );
    assert!(fallback_order(&names(&["openai"]), "OpenAI").is_empty());
}
