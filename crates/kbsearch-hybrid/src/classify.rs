use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use kbsearch_core::traits::CompletionModel;
use kbsearch_core::{Backend, Category, Error, QueryClassification, Result};

use crate::model_output::{lenient_f32, parse_json_value};
use crate::retry::{call_with_retry, RetryPolicy};

pub const RULE_MATCH_CONFIDENCE: f32 = 0.6;
pub const RULE_MISS_CONFIDENCE: f32 = 0.3;
pub const DEFAULT_MODEL_CONFIDENCE: f32 = 0.5;
const DEFAULT_REASON: &str = "no reason given";

/// Indicative substrings per category, checked in this order.
const RULES: &[(Category, &[&str])] = &[
    (Category::Concept, &["什么是", "定义", "含义", "是什么意思", "what is", "what does", "definition", "meaning of"]),
    (Category::Process, &["如何", "步骤", "流程", "怎么", "how to", "how do", "steps", "procedure"]),
    (Category::Compare, &["区别", "差异", "对比", "不同", "difference", "compare", "versus", " vs "]),
    (Category::Factual, &["多少", "数量", "日期", "时间", "数据", "how many", "how much", "what date", "deadline"]),
    (Category::Rule, &["规则", "规定", "要求", "限制", "政策", "regulation", "requirement", "policy", "rule"]),
    (Category::Troubleshooting, &["错误", "失败", "问题", "无法", "异常", "error", "fail", "cannot", "can't", "not working"]),
];

const SYSTEM_PROMPT: &str = r#"You classify user questions for a document retrieval system.
Pick exactly one type:
- concept: asks for a definition, meaning or explanation
- process: asks how to do something, steps or procedures
- compare: asks for differences or a comparison
- factual: asks for a number, date, quantity or other concrete fact
- rule: asks about regulations, requirements, limits or policies
- troubleshooting: reports an error, failure or abnormal situation
- general: anything else (greetings, unclear questions)

Reply with JSON only: {"type": "<type>", "confidence": <0-1>, "reason": "<short reason>"}"#;

pub struct QuestionClassifier {
    model: Option<Arc<dyn CompletionModel>>,
    retry: RetryPolicy,
}

impl Default for QuestionClassifier {
    fn default() -> Self {
        Self::rules_only()
    }
}

impl QuestionClassifier {
    pub fn rules_only() -> Self {
        Self { model: None, retry: RetryPolicy::default() }
    }

    pub fn with_model(model: Arc<dyn CompletionModel>, retry: RetryPolicy) -> Self {
        Self { model: Some(model), retry }
    }

    /// Classifies `query`, falling back to keyword rules when the model is missing,
    /// unreachable or replies with something unparseable. Fails only on blank input.
    pub async fn classify(&self, query: &str) -> Result<QueryClassification> {
        if query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".to_string()));
        }
        let Some(model) = self.model.as_ref() else {
            return Ok(classify_by_rules(query));
        };

        let user = format!("Question: {query}\n\nClassify the question above and reply with JSON.");
        let user = user.as_str();
        let reply = call_with_retry(&self.retry, Backend::ClassifierModel, move || async move {
            model.complete(SYSTEM_PROMPT, user).await
        })
        .await;

        match reply.and_then(|text| parse_model_reply(&text)) {
            Ok(c) => {
                debug!(category = %c.category, confidence = c.confidence, "classified by model");
                Ok(c)
            }
            Err(e) => {
                warn!(error = %e, "classifier model failed, using keyword rules");
                Ok(classify_by_rules(query))
            }
        }
    }
}

/// Keyword classification; first matching category wins.
pub fn classify_by_rules(query: &str) -> QueryClassification {
    let lowered = query.to_lowercase();
    for (category, keywords) in RULES {
        if let Some(kw) = keywords.iter().find(|kw| lowered.contains(*kw)) {
            return QueryClassification {
                category: *category,
                confidence: RULE_MATCH_CONFIDENCE,
                rationale: format!("matched {category} keyword '{}'", kw.trim()),
            };
        }
    }
    QueryClassification {
        category: Category::General,
        confidence: RULE_MISS_CONFIDENCE,
        rationale: "no category keyword matched".to_string(),
    }
}

/// Reads `{type, confidence, reason}`; unknown types become `general`.
pub fn parse_model_reply(text: &str) -> Result<QueryClassification> {
    let value = parse_json_value(text)?;
    let Value::Object(obj) = value else {
        return Err(Error::Parse("classification reply is not a JSON object".to_string()));
    };
    let category = obj.get("type").and_then(Value::as_str).map(Category::from_label).unwrap_or(Category::General);
    let confidence = obj.get("confidence").and_then(lenient_f32).unwrap_or(DEFAULT_MODEL_CONFIDENCE).clamp(0.0, 1.0);
    let rationale = obj
        .get("reason")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_REASON)
        .to_string();
    Ok(QueryClassification { category, confidence, rationale })
}
