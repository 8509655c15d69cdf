//! 任务分析器：从描述与上下文推导五维任务特征
//!
//! 每一维是若干关键词 / 结构信号的带上限加权和，最后截断到 [0,1]。纯函数，无副作用。

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::patterns::{PatternFamily, PatternProfile};
use crate::workflow::{ComplexityHint, TaskCharacteristics, WorkflowRequest};

const MULTI_STEP_MARKERS: &[&str] = &[
    "and", "then", "after", "finally", "steps", "multiple", "each", "afterwards",
];
const COMPLEX_VERBS: &[&str] = &[
    "analyze", "analyse", "summarize", "integrate", "optimize", "refactor", "design", "compare",
    "evaluate", "synthesize",
];
const DYNAMIC_WORDS: &[&str] = &[
    "monitor", "live", "real-time", "realtime", "stream", "interactive", "changing", "respond",
    "anomaly", "anomalies", "incident", "incidents", "events",
];
const PLANNING_WORDS: &[&str] = &[
    "plan", "step", "steps", "first", "then", "sequence", "pipeline", "build", "create",
    "generate", "report", "migrate", "deploy", "schedule",
];
const UNCERTAIN_WORDS: &[&str] = &[
    "maybe", "unknown", "unclear", "figure", "why", "somehow", "investigate",
];
const EXPLORATION_WORDS: &[&str] = &[
    "analyze", "analyse", "explore", "investigate", "search", "find", "discover", "anomaly",
    "anomalies", "research", "debug", "diagnose", "why", "unknown", "identify",
];
const RESOURCE_WORDS: &[&str] = &[
    "large", "all", "entire", "dataset", "log", "logs", "file", "files", "database", "batch",
    "parallel", "thousands", "millions", "million",
];

/// 分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAnalysis {
    pub characteristics: TaskCharacteristics,
    pub suggested_patterns: Vec<String>,
    pub confidence: f64,
}

static WORD_RE: OnceLock<Regex> = OnceLock::new();
static NUMBERED_STEP_RE: OnceLock<Regex> = OnceLock::new();

/// 小写单词，保留连字符复合词（如 step-by-step）
fn words(text: &str) -> Vec<String> {
    let re = WORD_RE.get_or_init(|| Regex::new(r"[a-z0-9]+(?:-[a-z0-9]+)*").unwrap());
    re.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// 形如 "1. xxx" / "2) xxx" 的编号步骤数
fn numbered_steps(text: &str) -> usize {
    let re = NUMBERED_STEP_RE.get_or_init(|| Regex::new(r"(?m)^\s*\d+[.)]\s").unwrap());
    re.find_iter(text).count()
}

/// 命中的不同关键词个数
fn hits(vocabulary: &HashSet<&str>, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| vocabulary.contains(*k)).count()
}

#[derive(Debug, Clone, Default)]
pub struct TaskAnalyzer;

impl TaskAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// 只计算特征
    pub fn characterize(&self, request: &WorkflowRequest) -> TaskCharacteristics {
        let tokens = words(&request.description);
        let vocabulary: HashSet<&str> = tokens.iter().map(|s| s.as_str()).collect();
        let word_count = tokens.len() as f64;

        let multi_step = (hits(&vocabulary, MULTI_STEP_MARKERS) + numbered_steps(&request.description))
            as f64;
        let mut complexity = (0.15 * multi_step).min(0.45)
            + (0.2 * hits(&vocabulary, COMPLEX_VERBS) as f64).min(0.4)
            + (word_count / 50.0).min(0.2);

        let mut dynamism = 0.2 * hits(&vocabulary, DYNAMIC_WORDS) as f64;
        let planning = 0.2 + 0.15 * hits(&vocabulary, PLANNING_WORDS) as f64
            - 0.1 * hits(&vocabulary, UNCERTAIN_WORDS) as f64;
        let exploration = 0.3 * hits(&vocabulary, EXPLORATION_WORDS) as f64;
        let mut resources =
            0.2 * hits(&vocabulary, RESOURCE_WORDS) as f64 + (word_count / 100.0).min(0.2);

        if request.context.contains_key("deadline") || request.context.contains_key("interactive") {
            dynamism += 0.2;
        }
        if request.context.len() >= 3 {
            resources += 0.1;
        }

        complexity = match request.expected_complexity {
            ComplexityHint::Unknown => complexity,
            ComplexityHint::Simple => complexity.min(0.3),
            ComplexityHint::Moderate => complexity.clamp(0.35, 0.65),
            ComplexityHint::Complex => complexity.max(0.75),
        };

        TaskCharacteristics {
            complexity: complexity.clamp(0.0, 1.0),
            dynamism: dynamism.clamp(0.0, 1.0),
            planning_feasibility: planning.clamp(0.0, 1.0),
            exploration_needs: exploration.clamp(0.0, 1.0),
            resource_requirements: resources.clamp(0.0, 1.0),
        }
    }

    /// 特征 + 按家族规则给出的建议模式 + 置信度
    pub fn analyze(
        &self,
        request: &WorkflowRequest,
        profiles: &[Arc<PatternProfile>],
    ) -> TaskAnalysis {
        let c = self.characterize(request);

        let mut families = Vec::new();
        if c.exploration_needs >= 0.5 || c.dynamism >= 0.5 {
            families.push(PatternFamily::Reactive);
        }
        if c.planning_feasibility >= 0.6 && (0.3..=0.7).contains(&c.complexity) {
            families.push(PatternFamily::PlanAhead);
        }
        if c.complexity >= 0.7 {
            families.push(PatternFamily::Decomposition);
        }

        let mut suggested_patterns: Vec<String> = profiles
            .iter()
            .filter(|p| families.contains(&p.family))
            .map(|p| p.name.clone())
            .collect();
        if suggested_patterns.is_empty() {
            suggested_patterns = profiles.iter().map(|p| p.name.clone()).collect();
        }

        TaskAnalysis {
            characteristics: c,
            suggested_patterns,
            confidence: (1.0 - c.variance().sqrt()).max(0.3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiles() -> Vec<Arc<PatternProfile>> {
        PatternProfile::builtin().into_iter().map(Arc::new).collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_tokenizer_keeps_compounds_and_counts_steps() {
        assert_eq!(
            words("Run a Step-by-step AUDIT, then v2 fix!"),
            vec!["run", "a", "step-by-step", "audit", "then", "v2", "fix"]
        );
        assert_eq!(numbered_steps("1. fetch\n 2) parse\nstep 3. write"), 2);
        assert_eq!(numbered_steps("no steps here"), 0);
    }

    #[test]
    fn test_log_analysis_profile() {
        let req = WorkflowRequest::new("analyze the log file and summarize anomalies");
        let analysis = TaskAnalyzer::new().analyze(&req, &profiles());
        let c = analysis.characteristics;
        assert!(approx(c.complexity, 0.69), "complexity {}", c.complexity);
        assert!(approx(c.exploration_needs, 0.6));
        assert!(approx(c.dynamism, 0.2));
        assert!(approx(c.planning_feasibility, 0.2));
        assert!(approx(c.resource_requirements, 0.47));
        assert_eq!(analysis.suggested_patterns, vec!["react".to_string()]);
        assert!(analysis.confidence > 0.75 && analysis.confidence < 0.85);
    }

    #[test]
    fn test_values_stay_in_unit_range() {
        let long = "analyze explore investigate search find discover debug diagnose research \
                    monitor live stream interactive changing respond incidents events \
                    large all entire dataset logs files database batch parallel thousands \
                    and then after finally steps multiple each integrate optimize refactor design"
            .repeat(3);
        let req = WorkflowRequest::new(long)
            .with_context("deadline", serde_json::json!("today"))
            .with_context("interactive", serde_json::json!(true))
            .with_context("owner", serde_json::json!("ops"));
        let c = TaskAnalyzer::new().characterize(&req);
        for v in c.as_array() {
            assert!((0.0..=1.0).contains(&v), "{v}");
        }
    }

    #[test]
    fn test_uncertainty_can_floor_planning_at_zero() {
        let req = WorkflowRequest::new("maybe figure out why this is unclear somehow");
        let c = TaskAnalyzer::new().characterize(&req);
        assert_eq!(c.planning_feasibility, 0.0);
    }

    #[test]
    fn test_complexity_hint_clamps() {
        let analyzer = TaskAnalyzer::new();
        let simple = WorkflowRequest::new("analyze and compare and summarize each file")
            .with_complexity(ComplexityHint::Simple);
        assert!(analyzer.characterize(&simple).complexity <= 0.3);
        let complex = WorkflowRequest::new("rename a file").with_complexity(ComplexityHint::Complex);
        assert!(analyzer.characterize(&complex).complexity >= 0.75);
        let moderate = WorkflowRequest::new("hi").with_complexity(ComplexityHint::Moderate);
        assert!(approx(analyzer.characterize(&moderate).complexity, 0.35));
    }

    #[test]
    fn test_structured_request_suggests_plan_ahead() {
        let req = WorkflowRequest::new(
            "plan the deploy pipeline: first build, then generate the report",
        );
        let analysis = TaskAnalyzer::new().analyze(&req, &profiles());
        let c = analysis.characteristics;
        assert!(c.planning_feasibility >= 0.6, "{}", c.planning_feasibility);
        assert!(analysis.suggested_patterns.contains(&"plan_execute".to_string()));
    }

    #[test]
    fn test_no_rule_suggests_everything() {
        let req = WorkflowRequest::new("hello");
        let analysis = TaskAnalyzer::new().analyze(&req, &profiles());
        assert_eq!(analysis.suggested_patterns.len(), 3);
    }

    #[test]
    fn test_one_sided_profile_is_more_confident_than_mixed() {
        let analyzer = TaskAnalyzer::new();
        let flat = analyzer.analyze(&WorkflowRequest::new("hello"), &profiles());
        let mixed = analyzer.analyze(
            &WorkflowRequest::new("analyze the log file and summarize anomalies"),
            &profiles(),
        );
        assert!(flat.confidence > mixed.confidence);
        assert!(mixed.confidence >= 0.3);
    }
}
