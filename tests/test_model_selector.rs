// ================================================================================================
// MODEL SELECTOR & FALLBACK CHAIN TEST SUITE
// ================================================================================================
//
// End-to-end selection against a registry backed by real files:
// - Context scoring picks the applicable variant (age group, contexts)
// - Resident models win score ties, avoiding pointless reloads
// - The fallback chain recovers from broken candidates and stops at the
//   configured attempt bound with a typed failure, never a panic

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use edge_llm_runtime::{
    Error, GenerationParams, InferenceMode, ModelDescriptor, ModelRegistry, ModelSelector,
    RequestContext, ScoringWeights,
};
use tempfile::TempDir;

fn write_model(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, b"GGUF\x03\x00\x00\x00stub-weights").unwrap();
    path
}

/// File that exists but fails backend validation, so loading it always
/// errors and the chain has to move on.
fn write_broken_model(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, b"not model weights at all").unwrap();
    path
}

fn selector_over(
    descriptors: Vec<ModelDescriptor>,
    max_fallback_attempts: usize,
) -> (ModelSelector, Arc<ModelRegistry>) {
    let map: HashMap<String, ModelDescriptor> = descriptors
        .into_iter()
        .map(|d| (d.key.clone(), d))
        .collect();
    let registry = Arc::new(ModelRegistry::new(map, InferenceMode::Mock, 2));
    let selector = ModelSelector::new(
        Arc::clone(&registry),
        ScoringWeights::default(),
        max_fallback_attempts,
    );
    (selector, registry)
}

#[cfg(test)]
mod selection_tests {
    use super::*;

    #[tokio::test]
    async fn child_context_routes_to_child_variant() {
        let dir = TempDir::new().unwrap();
        let (selector, registry) = selector_over(
            vec![
                ModelDescriptor::new("assistant-full", write_model(&dir, "full.gguf"))
                    .with_age_groups(["adult", "teen"]),
                ModelDescriptor::new("assistant-kids", write_model(&dir, "kids.gguf"))
                    .with_age_groups(["child"])
                    .with_contexts(["education"]),
            ],
            3,
        );

        let context = RequestContext::for_age_group("child").with_contexts(["education"]);
        assert_eq!(
            selector.select(&context).await.as_deref(),
            Some("assistant-kids")
        );

        let text = selector
            .generate_for_context("what is a firewall?", &context, &GenerationParams::default())
            .await
            .unwrap();
        assert!(!text.is_empty());
        assert!(registry.is_resident("assistant-kids").await);
        assert!(!registry.is_resident("assistant-full").await);
    }

    #[tokio::test]
    async fn resident_model_wins_score_ties() {
        let dir = TempDir::new().unwrap();
        let (selector, registry) = selector_over(
            vec![
                ModelDescriptor::new("alpha", write_model(&dir, "alpha.gguf")),
                ModelDescriptor::new("beta", write_model(&dir, "beta.gguf")),
            ],
            3,
        );

        let context = RequestContext::default();
        // Lexical order decides while nothing is resident.
        assert_eq!(selector.select(&context).await.as_deref(), Some("alpha"));

        registry.load("beta").await.unwrap();
        assert_eq!(selector.select(&context).await.as_deref(), Some("beta"));
    }

    #[tokio::test]
    async fn repeated_selection_is_stable() {
        let dir = TempDir::new().unwrap();
        let (selector, _registry) = selector_over(
            vec![
                ModelDescriptor::new("m1", write_model(&dir, "m1.gguf")),
                ModelDescriptor::new("m2", write_model(&dir, "m2.gguf")),
                ModelDescriptor::new("m3", write_model(&dir, "m3.gguf")),
            ],
            3,
        );

        let context = RequestContext::default().with_contexts(["chat"]);
        let first = selector.select(&context).await;
        for _ in 0..10 {
            assert_eq!(selector.select(&context).await, first);
        }
    }
}

#[cfg(test)]
mod fallback_tests {
    use super::*;

    #[tokio::test]
    async fn chain_recovers_when_preferred_model_is_broken() {
        let dir = TempDir::new().unwrap();
        // The broken variant scores higher (age match), so it is tried
        // first and fails; the healthy generalist must still answer.
        let (selector, registry) = selector_over(
            vec![
                ModelDescriptor::new("specialist", write_broken_model(&dir, "spec.gguf"))
                    .with_age_groups(["adult"]),
                ModelDescriptor::new("generalist", write_model(&dir, "gen.gguf")),
            ],
            3,
        );

        let context = RequestContext::for_age_group("adult");
        let text = selector
            .generate_for_context("hello", &context, &GenerationParams::default())
            .await
            .unwrap();
        assert!(text.contains("generalist"));
        assert!(!registry.is_resident("specialist").await);
    }

    #[tokio::test]
    async fn attempt_bound_caps_the_chain() {
        let dir = TempDir::new().unwrap();
        let (selector, _registry) = selector_over(
            vec![
                ModelDescriptor::new("b1", write_broken_model(&dir, "b1.gguf")),
                ModelDescriptor::new("b2", write_broken_model(&dir, "b2.gguf")),
                ModelDescriptor::new("b3", write_broken_model(&dir, "b3.gguf")),
                ModelDescriptor::new("b4", write_broken_model(&dir, "b4.gguf")),
            ],
            3,
        );

        let err = selector
            .generate_for_context("hello", &RequestContext::default(), &GenerationParams::default())
            .await
            .unwrap_err();
        match err {
            Error::AllModelsFailed { attempts, last } => {
                assert_eq!(attempts, 3, "the fourth candidate must never be tried");
                assert!(matches!(*last, Error::ModelLoad { .. }));
            }
            other => panic!("expected AllModelsFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn chain_stops_early_when_candidates_run_out() {
        let dir = TempDir::new().unwrap();
        let (selector, _registry) = selector_over(
            vec![
                ModelDescriptor::new("b1", write_broken_model(&dir, "b1.gguf")),
                ModelDescriptor::new("b2", write_broken_model(&dir, "b2.gguf")),
            ],
            5,
        );

        let err = selector
            .generate_for_context("hello", &RequestContext::default(), &GenerationParams::default())
            .await
            .unwrap_err();
        match err {
            Error::AllModelsFailed { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected AllModelsFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn empty_registry_fails_without_attempts() {
        let (selector, _registry) = selector_over(vec![], 3);
        let err = selector
            .generate_for_context("hello", &RequestContext::default(), &GenerationParams::default())
            .await
            .unwrap_err();
        match err {
            Error::AllModelsFailed { attempts, last } => {
                assert_eq!(attempts, 0);
                assert!(matches!(*last, Error::Config(_)));
            }
            other => panic!("expected AllModelsFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn failed_attempts_lower_future_scores() {
        let dir = TempDir::new().unwrap();
        let map: HashMap<String, ModelDescriptor> = [
            ModelDescriptor::new("flaky", write_model(&dir, "flaky.gguf")),
            ModelDescriptor::new("steady", write_model(&dir, "steady.gguf")),
        ]
        .into_iter()
        .map(|d| (d.key.clone(), d))
        .collect();
        // Remote mode with a dead endpoint: loads succeed, every
        // inference fails, driving success rates to zero.
        let registry = Arc::new(ModelRegistry::new(
            map,
            InferenceMode::Remote {
                endpoint: "http://127.0.0.1:9".to_string(),
            },
            2,
        ));
        let selector = ModelSelector::new(Arc::clone(&registry), ScoringWeights::default(), 2);

        let err = selector
            .generate_for_context("hello", &RequestContext::default(), &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AllModelsFailed { .. }));

        let flaky = registry.stats("flaky").await.unwrap();
        let steady = registry.stats("steady").await.unwrap();
        assert_eq!(flaky.error_count + steady.error_count, 2);
        assert!(flaky.success_rate() < 1.0);
    }
}
