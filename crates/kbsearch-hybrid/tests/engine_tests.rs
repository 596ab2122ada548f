mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use kbsearch_core::source::InMemoryChunkSource;
use kbsearch_core::{Category, RetrievalMethod, RetrievalStrategy, ScoreKind};
use kbsearch_hybrid::{
    BatchItem, BatchOptions, PipelineState, QuestionClassifier, Reranker, RetrieveOptions,
};

use common::*;

#[tokio::test]
async fn classify_falls_back_to_rules_when_model_is_down() {
    let h = harness();
    let engine = h.engine.with_classifier(QuestionClassifier::with_model(Arc::new(ScriptedModel { reply: None }), fast_retry()));
    let c = engine.classify("如何建账").await.expect("classify");
    assert_eq!(c.category, Category::Process);
    assert!(c.confidence >= 0.5);
}

#[tokio::test]
async fn classify_uses_model_reply() {
    let h = harness();
    let reply = "```json\n{\"type\": \"factual\", \"confidence\": 0.92, \"reason\": \"asks for a rate\"}\n```".to_string();
    let engine = h.engine.with_classifier(QuestionClassifier::with_model(Arc::new(ScriptedModel { reply: Some(reply) }), fast_retry()));
    let c = engine.classify("什么是建账").await.unwrap();
    assert_eq!(c.category, Category::Factual);
    assert_eq!(c.rationale, "asks for a rate");
}

#[tokio::test]
async fn unparseable_model_reply_uses_rules() {
    let h = harness();
    let engine = h
        .engine
        .with_classifier(QuestionClassifier::with_model(Arc::new(ScriptedModel { reply: Some("I think it's a process question".into()) }), fast_retry()));
    let c = engine.classify("建账的步骤").await.unwrap();
    assert_eq!(c.category, Category::Process);
}

#[tokio::test]
async fn blank_query_is_a_validation_error() {
    let h = harness();
    let err = h.engine.retrieve("  ", RetrieveOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert_eq!(err.payload().kind, "validation");
}

#[tokio::test]
async fn results_never_exceed_top_k() {
    let h = harness();
    for q in ["什么是建账", "如何建账", "现金日记账和银行存款日记账的区别", "折旧率是多少", "建账有哪些规定", "凭证审核失败"] {
        let o = h.engine.retrieve(q, RetrieveOptions::default()).await.expect(q);
        assert!(o.results.len() <= o.strategy.top_k, "{q}");
        let o = h.engine.retrieve(q, RetrieveOptions::top_k(2)).await.expect(q);
        assert!(o.results.len() <= 2, "{q}");
        assert_eq!(o.results.iter().map(|r| r.rank).collect::<Vec<_>>(), (1..=o.results.len()).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn process_question_runs_hybrid_and_fuses() {
    let h = harness();
    let o = h.engine.retrieve("新办企业如何建账", RetrieveOptions::default()).await.unwrap();
    assert_eq!(o.classification.as_ref().map(|c| c.category), Some(Category::Process));
    assert_eq!(o.strategy.method, RetrievalMethod::Hybrid);
    assert_eq!(
        o.trace,
        vec![
            PipelineState::Start,
            PipelineState::Classified,
            PipelineState::StrategySelected,
            PipelineState::Retrieving,
            PipelineState::Fusing,
            PipelineState::Done,
        ]
    );
    assert!(!o.partial);
    assert_eq!(o.results[0].chunk.id, "c2");
    assert!(o.results.iter().all(|r| r.score_kind == ScoreKind::Hybrid));
    assert!(o.results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
}

#[tokio::test]
async fn factual_question_uses_bm25_only() {
    let h = harness();
    let o = h.engine.retrieve("折旧率是多少", RetrieveOptions::default()).await.unwrap();
    assert_eq!(o.strategy.method, RetrievalMethod::Bm25);
    assert_eq!(o.results[0].chunk.id, "c4");
    assert_eq!(o.results[0].score_kind, ScoreKind::Bm25);
    assert!(!o.trace.contains(&PipelineState::Fusing));
}

#[tokio::test]
async fn repeated_calls_are_identical() {
    let h = harness();
    for q in ["如何建账", "现金日记账的区别", "tax control device"] {
        let a = h.engine.retrieve(q, RetrieveOptions::default()).await.unwrap();
        let b = h.engine.retrieve(q, RetrieveOptions::default()).await.unwrap();
        assert_eq!(serde_json::to_string(&a.results).unwrap(), serde_json::to_string(&b.results).unwrap());
    }
}

#[tokio::test]
async fn hybrid_degrades_to_keyword_results_when_vector_fails() {
    let h = harness();
    h.vector.down.store(true, Ordering::SeqCst);
    let o = h.engine.retrieve("新办企业如何建账", RetrieveOptions::default()).await.unwrap();
    assert!(o.partial);
    assert!(!o.results.is_empty());
    assert!(o.results.iter().all(|r| r.score_kind == ScoreKind::Bm25));
    assert!(o.warnings.iter().any(|w| w.contains("keyword results only")));
}

#[tokio::test]
async fn hybrid_degrades_to_vector_results_when_keyword_fails() {
    let h = harness_with_source(Arc::new(FailingSource));
    let o = h.engine.retrieve("新办企业如何建账", RetrieveOptions::default()).await.unwrap();
    assert!(o.partial);
    assert!(o.results.iter().all(|r| r.score_kind == ScoreKind::Vector));
}

#[tokio::test]
async fn hybrid_fails_when_both_retrievers_fail() {
    let h = harness_with_source(Arc::new(FailingSource));
    h.vector.down.store(true, Ordering::SeqCst);
    let err = h.engine.retrieve("新办企业如何建账", RetrieveOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), "backend_unavailable");
}

#[tokio::test]
async fn single_method_backend_failure_is_surfaced() {
    let h = harness();
    h.vector.down.store(true, Ordering::SeqCst);
    let err = h.engine.retrieve("什么是建账", RetrieveOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), "backend_unavailable");
    assert!(err.to_string().contains("vector store"));
}

#[tokio::test]
async fn compare_question_is_reranked_with_unscored_defaults() {
    let h = harness();
    let scorer = Arc::new(EndsFirstScorer::default());
    let engine = h.engine.with_reranker(Reranker::new(scorer.clone(), fast_retry(), 0.3));
    let o = engine.retrieve("现金日记账和银行存款日记账的区别", RetrieveOptions::default()).await.unwrap();
    assert_eq!(o.strategy.method, RetrievalMethod::HybridRerank);
    assert!(o.trace.contains(&PipelineState::Reranking));
    assert!(o.warnings.is_empty(), "{:?}", o.warnings);

    let seen = scorer.seen.lock().unwrap().clone();
    assert!(seen.len() > 3);
    assert!(seen.len() <= engine.pool_size(5));
    assert_eq!(o.results.len(), 5);
    assert_eq!(o.results[0].chunk.id, seen[seen.len() - 1].id);
    assert_eq!(o.results[1].chunk.id, seen[0].id);
    assert_eq!(o.results[2].chunk.id, seen[1].id, "unscored candidates keep fused order");
    assert_eq!(o.results[2].reason.as_deref(), Some("unscored"));
    assert_eq!(o.results[2].score, 0.3);
    assert!(o.results.iter().all(|r| r.score_kind == ScoreKind::Rerank));
}

#[tokio::test]
async fn rerank_failure_keeps_fused_order_with_warning() {
    let h = harness();
    let strategy = RetrievalStrategy::for_method(RetrievalMethod::Hybrid, 4).unwrap();
    let plain = h.engine.retrieve("现金日记账和银行存款日记账的区别", RetrieveOptions::strategy(strategy)).await.unwrap();

    let scorer = Arc::new(EndsFirstScorer { fail: true, ..Default::default() });
    let engine = h.engine.with_reranker(Reranker::new(scorer, fast_retry(), 0.3));
    let strategy = RetrievalStrategy::for_method(RetrievalMethod::HybridRerank, 4).unwrap();
    let o = engine.retrieve("现金日记账和银行存款日记账的区别", RetrieveOptions::strategy(strategy)).await.unwrap();
    assert_eq!(o.warnings.len(), 1);
    assert!(o.warnings[0].contains("rerank"));
    let ids = |rs: &[kbsearch_core::RankedResult]| rs.iter().map(|r| r.chunk.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&o.results), ids(&plain.results));
    assert!(o.results.iter().all(|r| r.score_kind == ScoreKind::Hybrid));
}

#[tokio::test]
async fn strategy_override_skips_classification() {
    let h = harness();
    let strategy = RetrievalStrategy::for_method(RetrievalMethod::Bm25, 2).unwrap();
    let o = h.engine.retrieve("tax device", RetrieveOptions::strategy(strategy)).await.unwrap();
    assert!(o.classification.is_none());
    assert!(!o.trace.contains(&PipelineState::Classified));
    assert_eq!(o.results[0].chunk.id, "c8");
}

#[tokio::test]
async fn batch_isolates_failures() {
    let h = harness();
    let queries = vec!["什么是建账".to_string(), "boom what is this".to_string(), "如何建账".to_string()];
    let report = h.engine.retrieve_batch(&queries, &BatchOptions::default()).await;
    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    let failed = &report.results[1];
    assert_eq!(failed.index, 1);
    assert_eq!(failed.query, "boom what is this");
    match &failed.item {
        BatchItem::Failure { error } => assert_eq!(error.kind, "backend_unavailable"),
        other => panic!("expected failure, got {other:?}"),
    }
    let json = serde_json::to_value(&report).unwrap();
    assert!(json["results"][1]["error"]["message"].is_string());
    assert!(json["results"][0]["results"].is_array());
}

#[tokio::test]
async fn batch_deadline_cancels_unstarted_items() {
    let h = harness();
    let queries = vec!["什么是建账".to_string(), "如何建账".to_string()];
    let options = BatchOptions { deadline: Some(Duration::ZERO), ..Default::default() };
    let report = h.engine.retrieve_batch(&queries, &options).await;
    assert_eq!(report.total, 2);
    assert_eq!(report.failed, 2);
    for entry in &report.results {
        match &entry.item {
            BatchItem::Failure { error } => assert_eq!(error.kind, "cancelled"),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn compare_methods_reports_each_method() {
    let h = harness();
    let cmp = h.engine.compare_methods("如何建账", &RetrievalMethod::ALL, Some(5)).await.unwrap();
    assert_eq!(cmp.methods.len(), 4);
    for (name, report) in &cmp.methods {
        assert!(report.error.is_none(), "{name}");
        assert!(report.results.len() <= 5, "{name}");
        let scores: Vec<f32> = report.results.iter().map(|r| r.score).collect();
        let mean = scores.iter().sum::<f32>() / scores.len().max(1) as f32;
        assert!((report.avg_score - mean).abs() < 1e-5, "{name}");
        assert_eq!(report.top_scores, scores[..scores.len().min(3)], "{name}");
    }
    assert_eq!(cmp.methods["vector"].top_scores.len(), 3);
    let json = serde_json::to_value(&cmp).unwrap();
    assert!(json["methods"]["bm25"]["top_scores"].is_array());
    // no rerank model configured: hybrid_rerank keeps fused order
    assert_eq!(
        cmp.methods["hybrid"].results.iter().map(|r| &r.chunk.id).collect::<Vec<_>>(),
        cmp.methods["hybrid_rerank"].results.iter().map(|r| &r.chunk.id).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn compare_methods_records_failures() {
    let h = harness();
    h.vector.down.store(true, Ordering::SeqCst);
    let cmp = h.engine.compare_methods("如何建账", &[RetrievalMethod::Vector, RetrievalMethod::Bm25], None).await.unwrap();
    assert_eq!(cmp.methods["vector"].error.as_ref().map(|e| e.kind.as_str()), Some("backend_unavailable"));
    assert!(cmp.methods["bm25"].error.is_none());
    assert!(!cmp.methods["bm25"].results.is_empty());
}

#[tokio::test]
async fn statistics_group_by_strategy_label() {
    let h = harness();
    let queries: Vec<String> = ["什么是建账", "如何建账", "折旧率是多少", "建账有哪些规定", "   "].iter().map(|s| s.to_string()).collect();
    let stats = h.engine.statistics(&queries).await;
    assert_eq!(stats.total_queries, 5);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.strategies["vector"].count, 1);
    assert_eq!(stats.strategies["hybrid"].count, 1);
    assert_eq!(stats.strategies["bm25"].count, 1);
    assert_eq!(stats.strategies["vector_rerank"].count, 1);
    assert_eq!(stats.strategies["vector"].avg_docs, 5.0);
    assert_eq!(stats.question_types["rule"], 1);
    assert_eq!(stats.question_types.values().sum::<usize>(), 4);
}

#[tokio::test]
async fn supplied_documents_replace_the_stored_collection() {
    let h = harness_with_source(Arc::new(InMemoryChunkSource::new()));
    let strategy = RetrievalStrategy::for_method(RetrievalMethod::Bm25, 3).unwrap();

    let options = RetrieveOptions::strategy(strategy.clone()).with_documents(corpus());
    let o = h.engine.retrieve("tax device", options).await.unwrap();
    assert_eq!(o.results[0].chunk.id, "c8");
    assert!(o.warnings.is_empty(), "{:?}", o.warnings);
    assert_eq!(std::fs::read_dir(h._dir.path()).unwrap().count(), 0, "no index persisted");

    let stored = h.engine.retrieve("tax device", RetrieveOptions::strategy(strategy)).await.unwrap();
    assert!(stored.results.is_empty());
    assert_eq!(stored.warnings.len(), 1, "empty collection notice");

    let cmp = h
        .engine
        .compare_methods_with("tax device", &[RetrievalMethod::Bm25, RetrievalMethod::Hybrid], Some(3), Some(corpus()))
        .await
        .unwrap();
    assert_eq!(cmp.methods["bm25"].results[0].chunk.id, "c8");
    assert!(!cmp.methods["hybrid"].partial);
    assert!(cmp.methods["hybrid"].results.iter().any(|r| r.chunk.id == "c8"));
}
