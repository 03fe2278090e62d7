//! Named TTL policies selected by weighted conditions.
//!
//! Every registered policy is scored against the content, the caller
//! context, and the reported system load; the score is the sum of the weights
//! of its matching conditions. The highest score wins, ties go to the lower
//! `priority` value, then to the lexicographically smaller name. The
//! zero-condition `default` policy always scores 0 and can be neither removed
//! nor given conditions, so evaluation always yields a policy.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::Error;
use crate::config::{AdaptiveConfig, CacheConfig};
use crate::content::{CacheableContent, ContentKind};

pub const DEFAULT_POLICY: &str = "default";

/// Samples needed before an effectiveness score is fully trusted.
const MIN_CONFIDENT_SAMPLES: u64 = 100;

/// Sample count treated as high request volume.
const HIGH_VOLUME_SAMPLES: u64 = 1000;

const LOW_HIT_RATE: f64 = 0.3;
const GOOD_HIT_RATE: f64 = 0.8;

/// Load figures supplied by the host process. Unknown figures are None.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemLoad {
    /// CPU usage percentage.
    pub cpu_usage: Option<f64>,
    /// Memory usage percentage.
    pub memory_usage: Option<f64>,
    /// Recent cache hit rate (0..=1).
    pub hit_rate: Option<f64>,
    pub requests_per_minute: Option<f64>,
}

impl SystemLoad {
    /// Whether any reported figure crosses its degradation threshold.
    pub fn is_degraded(&self, thresholds: &AdaptiveConfig) -> bool {
        self.cpu_usage.is_some_and(|v| v > thresholds.cpu_threshold)
            || self.memory_usage.is_some_and(|v| v > thresholds.memory_threshold)
            || self.hit_rate.is_some_and(|v| v < thresholds.min_hit_rate)
            || self.requests_per_minute.is_some_and(|v| v > thresholds.target_requests_per_minute)
    }
}

/// What a condition inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "field", rename_all = "snake_case")]
pub enum ConditionKind {
    /// `"text"` or `"multimodal"`.
    ContentKind,
    /// Raw content text.
    Text,
    /// Character count of the raw text.
    TextLength,
    ImageCount,
    /// A top-level content metadata field.
    Metadata(String),
    /// A top-level caller context field.
    Context(String),
    CpuUsage,
    MemoryUsage,
    HitRate,
    RequestRate,
}

impl ConditionKind {
    fn is_numeric(&self) -> bool {
        matches!(
            self,
            ConditionKind::TextLength
                | ConditionKind::ImageCount
                | ConditionKind::CpuUsage
                | ConditionKind::MemoryUsage
                | ConditionKind::HitRate
                | ConditionKind::RequestRate
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    /// Substring for strings, membership for arrays.
    Contains,
    /// The inspected field is present; the value is ignored.
    Exists,
}

/// A weighted predicate over content, context, and load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionKind,
    pub operator: Operator,
    pub value: Value,
    pub weight: f64,
}

impl Condition {
    pub fn new(kind: ConditionKind, operator: Operator, value: Value, weight: f64) -> Self {
        Self { kind, operator, value, weight }
    }

    /// Reject definitions that could never be evaluated meaningfully.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.weight.is_finite() {
            return Err(Error::InvalidPolicy(format!("condition weight must be finite, got {}", self.weight)));
        }
        if matches!(&self.kind, ConditionKind::Metadata(field) | ConditionKind::Context(field) if field.is_empty()) {
            return Err(Error::InvalidPolicy("condition field name must not be empty".into()));
        }

        match self.operator {
            Operator::GreaterThan | Operator::LessThan if !self.value.is_number() => {
                return Err(Error::InvalidPolicy(format!("{:?} requires a numeric value", self.operator)));
            }
            Operator::Contains if self.kind.is_numeric() => {
                return Err(Error::InvalidPolicy(format!("{:?} does not support contains", self.kind)));
            }
            _ => {}
        }

        if self.kind.is_numeric() && self.operator != Operator::Exists && !self.value.is_number() {
            return Err(Error::InvalidPolicy(format!("{:?} conditions require a numeric value", self.kind)));
        }

        if self.kind == ConditionKind::ContentKind {
            let valid = self
                .value
                .as_str()
                .is_some_and(|v| v == ContentKind::Text.as_str() || v == ContentKind::Multimodal.as_str());
            if !valid || !matches!(self.operator, Operator::Equals | Operator::NotEquals) {
                return Err(Error::InvalidPolicy(
                    "content_kind conditions must compare equality against \"text\" or \"multimodal\"".into(),
                ));
            }
        }

        Ok(())
    }

    pub fn matches(&self, content: &CacheableContent, context: Option<&Map<String, Value>>, load: Option<&SystemLoad>) -> bool {
        let subject = match &self.kind {
            ConditionKind::ContentKind => Some(json!(content.kind.as_str())),
            ConditionKind::Text => Some(json!(content.text)),
            ConditionKind::TextLength => Some(json!(content.text_len())),
            ConditionKind::ImageCount => Some(json!(content.images.len())),
            ConditionKind::Metadata(field) => content.metadata.as_ref().and_then(|m| m.get(field)).cloned(),
            ConditionKind::Context(field) => context.and_then(|c| c.get(field)).cloned(),
            ConditionKind::CpuUsage => load.and_then(|l| l.cpu_usage).map(|v| json!(v)),
            ConditionKind::MemoryUsage => load.and_then(|l| l.memory_usage).map(|v| json!(v)),
            ConditionKind::HitRate => load.and_then(|l| l.hit_rate).map(|v| json!(v)),
            ConditionKind::RequestRate => load.and_then(|l| l.requests_per_minute).map(|v| json!(v)),
        };

        let Some(subject) = subject else {
            return false;
        };

        match self.operator {
            Operator::Exists => true,
            Operator::Equals => values_equal(&subject, &self.value),
            Operator::NotEquals => !values_equal(&subject, &self.value),
            Operator::GreaterThan => compare(&subject, &self.value, |a, b| a > b),
            Operator::LessThan => compare(&subject, &self.value, |a, b| a < b),
            Operator::Contains => match (&subject, &self.value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
                _ => false,
            },
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => op(x, y),
        _ => false,
    }
}

/// A named retention rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub name: String,
    pub ttl: Duration,
    /// Lower wins on score ties.
    pub priority: i32,
    /// Whether the TTL shrinks under degraded load.
    pub adaptive: bool,
    pub conditions: Vec<Condition>,
}

impl CachePolicy {
    pub fn new(name: impl Into<String>, ttl: Duration, priority: i32) -> Self {
        Self { name: name.into(), ttl, priority, adaptive: false, conditions: Vec::new() }
    }

    pub fn adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Score against a request, or None when the policy has conditions and
    /// none of them hold. Unmatched policies never compete with the default.
    pub fn match_score(
        &self, content: &CacheableContent, context: Option<&Map<String, Value>>, load: Option<&SystemLoad>,
    ) -> Option<f64> {
        let mut matched = self.conditions.iter().filter(|c| c.matches(content, context, load)).peekable();
        if !self.conditions.is_empty() && matched.peek().is_none() {
            return None;
        }
        Some(matched.map(|c| c.weight).sum())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidPolicy("policy name must not be empty".into()));
        }
        if self.ttl.is_zero() {
            return Err(Error::InvalidPolicy(format!("policy '{}' must have a non-zero TTL", self.name)));
        }
        if self.name == DEFAULT_POLICY && !self.conditions.is_empty() {
            return Err(Error::InvalidPolicy("the default policy must not have conditions".into()));
        }
        self.conditions.iter().try_for_each(Condition::validate)
    }
}

/// Outcome of [`PolicyManager::analyze_policy_effectiveness`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAnalysis {
    pub policy: String,
    /// Observed hit rate discounted by sample confidence, 0..=1.
    pub effectiveness: f64,
    pub recommendations: Vec<String>,
}

/// Registry of policies and the selection logic over them.
#[derive(Debug)]
pub struct PolicyManager {
    policies: RwLock<HashMap<String, CachePolicy>>,
    default_ttl: Duration,
    adaptive: AdaptiveConfig,
}

impl PolicyManager {
    /// A manager holding only the default policy.
    pub fn new(default_ttl: Duration, adaptive: AdaptiveConfig) -> Self {
        let default = CachePolicy::new(DEFAULT_POLICY, default_ttl, 100).adaptive(true);
        let policies = HashMap::from([(default.name.clone(), default)]);
        Self { policies: RwLock::new(policies), default_ttl, adaptive }
    }

    /// A manager configured from `config`, with the built-in set if enabled.
    pub fn from_config(config: &CacheConfig) -> Self {
        let manager = Self::new(config.default_ttl(), config.adaptive.clone());
        if config.builtin_policies {
            let mut policies = manager.policies.write();
            for policy in builtin_policies() {
                policies.insert(policy.name.clone(), policy);
            }
        }
        manager
    }

    /// Register a policy, replacing any policy with the same name.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPolicy` if the policy or any condition is malformed.
    pub fn add_policy(&self, policy: CachePolicy) -> Result<(), Error> {
        policy.validate()?;
        tracing::debug!(policy = %policy.name, ttl_secs = policy.ttl.as_secs(), "registered cache policy");
        self.policies.write().insert(policy.name.clone(), policy);
        Ok(())
    }

    /// Unregister a policy. The default policy cannot be removed.
    pub fn remove_policy(&self, name: &str) -> Result<CachePolicy, Error> {
        if name == DEFAULT_POLICY {
            return Err(Error::InvalidPolicy("the default policy cannot be removed".into()));
        }
        self.policies
            .write()
            .remove(name)
            .ok_or_else(|| Error::PolicyNotFound(name.to_string()))
    }

    pub fn get_policy(&self, name: &str) -> Option<CachePolicy> {
        self.policies.read().get(name).cloned()
    }

    /// All registered policies, sorted by name.
    pub fn policies(&self) -> Vec<CachePolicy> {
        let mut all: Vec<CachePolicy> = self.policies.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Select the best matching policy, with its TTL shrunk if it is adaptive
    /// and `load` is degraded.
    pub fn evaluate_policy(
        &self, content: &CacheableContent, context: Option<&Map<String, Value>>, load: Option<&SystemLoad>,
    ) -> CachePolicy {
        let policies = self.policies.read();
        let selected = policies
            .values()
            .filter_map(|policy| policy.match_score(content, context, load).map(|score| (score, policy)))
            .max_by(|(score_a, a), (score_b, b)| {
                score_a
                    .total_cmp(score_b)
                    .then_with(|| b.priority.cmp(&a.priority))
                    .then_with(|| b.name.cmp(&a.name))
            });

        let (score, mut policy) = match selected {
            Some((score, policy)) => (score, policy.clone()),
            None => (0.0, CachePolicy::new(DEFAULT_POLICY, self.default_ttl, 100).adaptive(true)),
        };
        drop(policies);

        if policy.adaptive && load.is_some_and(|l| l.is_degraded(&self.adaptive)) {
            let shrunk = self.effective_ttl(policy.ttl);
            tracing::debug!(
                policy = %policy.name,
                original_ttl_secs = policy.ttl.as_secs(),
                ttl_secs = shrunk.as_secs(),
                "shrinking adaptive TTL under degraded load"
            );
            policy.ttl = shrunk;
        }

        tracing::trace!(policy = %policy.name, score, "selected cache policy");
        policy
    }

    /// Register a single-condition, non-adaptive policy matching `kind`.
    pub fn create_custom_policy(&self, name: &str, kind: ContentKind, ttl_minutes: u64, priority: i32) -> Result<CachePolicy, Error> {
        let policy = CachePolicy::new(name, Duration::from_secs(ttl_minutes.saturating_mul(60)), priority).with_condition(
            Condition::new(ConditionKind::ContentKind, Operator::Equals, json!(kind.as_str()), 1.0),
        );
        self.add_policy(policy.clone())?;
        Ok(policy)
    }

    /// Score a policy's observed performance and suggest TTL changes.
    ///
    /// Memory pressure is read from `load`, when supplied.
    pub fn analyze_policy_effectiveness(
        &self, name: &str, observed_hit_rate: f64, sample_size: u64, load: Option<&SystemLoad>,
    ) -> Result<PolicyAnalysis, Error> {
        let policy = self.get_policy(name).ok_or_else(|| Error::PolicyNotFound(name.to_string()))?;
        let hit_rate = if observed_hit_rate.is_finite() { observed_hit_rate.clamp(0.0, 1.0) } else { 0.0 };
        let confidence = (sample_size as f64 / MIN_CONFIDENT_SAMPLES as f64).min(1.0);
        let effectiveness = hit_rate * confidence;

        let mut recommendations = Vec::new();
        if sample_size < MIN_CONFIDENT_SAMPLES {
            recommendations.push(format!(
                "Collect more samples for '{name}' ({sample_size} < {MIN_CONFIDENT_SAMPLES}) before tuning"
            ));
        }
        if hit_rate < LOW_HIT_RATE && sample_size >= HIGH_VOLUME_SAMPLES {
            recommendations.push(format!(
                "Increase TTL for '{name}' (currently {}s): hit rate {:.1}% under high request volume",
                policy.ttl.as_secs(),
                hit_rate * 100.0
            ));
        }
        if load.and_then(|l| l.memory_usage).is_some_and(|m| m > self.adaptive.memory_threshold) {
            recommendations.push(format!(
                "Decrease TTL for '{name}' (currently {}s): memory pressure reported",
                policy.ttl.as_secs()
            ));
        }
        if hit_rate >= GOOD_HIT_RATE && sample_size >= MIN_CONFIDENT_SAMPLES {
            recommendations.push(format!("Policy '{name}' is performing well"));
        }
        if recommendations.is_empty() {
            recommendations.push(format!("No changes recommended for '{name}'"));
        }

        Ok(PolicyAnalysis { policy: policy.name, effectiveness, recommendations })
    }

    fn effective_ttl(&self, ttl: Duration) -> Duration {
        Duration::try_from_secs_f64(ttl.as_secs_f64() * self.adaptive.ttl_reduction_factor)
            .unwrap_or(ttl)
            .max(self.adaptive.min_ttl())
            .min(ttl)
    }
}

fn builtin_policies() -> Vec<CachePolicy> {
    vec![
        CachePolicy::new("multimodal", Duration::from_secs(2 * 3600), 10)
            .adaptive(true)
            .with_condition(Condition::new(ConditionKind::ContentKind, Operator::Equals, json!("multimodal"), 1.0)),
        CachePolicy::new("short_text", Duration::from_secs(30 * 60), 20)
            .adaptive(true)
            .with_condition(Condition::new(ConditionKind::TextLength, Operator::LessThan, json!(100), 0.5)),
        CachePolicy::new("high_priority", Duration::from_secs(4 * 3600), 5)
            .with_condition(Condition::new(ConditionKind::Context("priority".into()), Operator::Equals, json!("high"), 2.0)),
        CachePolicy::new("time_sensitive", Duration::from_secs(5 * 60), 1).with_condition(Condition::new(
            ConditionKind::Metadata("time_sensitive".into()),
            Operator::Equals,
            json!(true),
            3.0,
        )),
    ]
}
