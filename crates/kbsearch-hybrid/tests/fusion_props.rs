use proptest::prelude::*;

use kbsearch_core::{Chunk, FusionMethod};
use kbsearch_hybrid::{min_max_normalize, FusionEngine};

fn hits(prefix: &str, scores: &[f32]) -> Vec<(Chunk, f32)> {
    scores.iter().enumerate().map(|(i, s)| (Chunk::new(format!("{prefix}{i}"), format!("text {i}")), *s)).collect()
}

proptest! {
    #[test]
    fn normalized_values_stay_in_unit_range(values in prop::collection::vec(-1000.0f32..1000.0, 1..40)) {
        let norm = min_max_normalize(&values);
        prop_assert_eq!(norm.len(), values.len());
        prop_assert!(norm.iter().all(|v| (0.0..=1.0).contains(v)));
        for i in 0..values.len() {
            for j in 0..values.len() {
                if values[i] < values[j] {
                    prop_assert!(norm[i] <= norm[j]);
                }
            }
        }
    }

    #[test]
    fn fused_set_is_the_union_sorted_best_first(
        v in prop::collection::vec(0.0f32..1.0, 0..12),
        b in prop::collection::vec(0.0f32..20.0, 0..12),
        w in 0.0f32..=1.0,
        rrf in any::<bool>(),
    ) {
        // "a" ids overlap between lists, "b" ids only on the keyword side
        let vector = hits("a", &v);
        let mut bm25 = hits("a", &b);
        bm25.extend(hits("b", &b));
        let method = if rrf { FusionMethod::Rrf } else { FusionMethod::Weighted };
        let fused = FusionEngine::default().fuse(&vector, &bm25, w, 1.0 - w, method);

        prop_assert_eq!(fused.len(), v.len().max(b.len()) + b.len());
        let scores: Vec<f32> = fused.iter().map(|c| c.hybrid_score.unwrap_or(f32::NAN)).collect();
        prop_assert!(scores.iter().all(|s| s.is_finite() && *s >= 0.0 && *s <= 1.0 + 1e-5));
        prop_assert!(scores.windows(2).all(|p| p[0] >= p[1]));
    }
}

proptest! {
    #[test]
    fn full_weight_on_one_side_is_that_sides_normalized_score(
        v in prop::collection::vec(0.0f32..1.0, 0..12),
        b in prop::collection::vec(0.0f32..20.0, 0..12),
        vector_side in any::<bool>(),
    ) {
        let vector = hits("a", &v);
        let bm25 = hits("b", &b);
        let (vw, bw) = if vector_side { (1.0, 0.0) } else { (0.0, 1.0) };
        let fused = FusionEngine::default().fuse(&vector, &bm25, vw, bw, FusionMethod::Weighted);

        let column: Vec<f32> = fused
            .iter()
            .map(|c| if vector_side { c.vector_score } else { c.bm25_score }.unwrap_or(0.0))
            .collect();
        let norm = min_max_normalize(&column);
        for (c, n) in fused.iter().zip(&norm) {
            prop_assert!((c.hybrid_score.unwrap_or(f32::NAN) - n).abs() < 1e-6);
        }
    }
}
