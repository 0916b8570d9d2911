//! Policy Evaluator
//!
//! Compiles a declarative rule set into an ordered list of
//! (priority, effect, predicate) rules and evaluates a request context
//! against them. Deny rules win as soon as encountered in priority order;
//! an allow only wins when no deny matches; the default is deny.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

/// Rule effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Permit the request
    Allow,

    /// Refuse the request
    Deny,
}

/// Kind of actor making a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// A registered agent acting autonomously
    Agent,

    /// A human principal
    User,
}

/// A typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Boolean attribute
    Bool(bool),

    /// Integer attribute
    Int(i64),

    /// String attribute
    Str(String),
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

/// Condition predicate over the request attribute bag
///
/// A tagged-variant AST compiled once from configuration; evaluation is a
/// pure function of the context, with time-window predicates evaluated
/// against the injected `now`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Always true
    True,

    /// Attribute equals value
    Eq {
        /// Attribute name
        attr: String,
        /// Expected value
        value: AttrValue,
    },

    /// Attribute is a member of the value list
    In {
        /// Attribute name
        attr: String,
        /// Accepted values
        values: Vec<AttrValue>,
    },

    /// Integer attribute strictly greater than value
    Gt {
        /// Attribute name
        attr: String,
        /// Threshold
        value: i64,
    },

    /// Integer attribute strictly less than value
    Lt {
        /// Attribute name
        attr: String,
        /// Threshold
        value: i64,
    },

    /// The injected `now` lies within the window
    TimeWindow {
        /// Inclusive lower bound
        #[serde(default, skip_serializing_if = "Option::is_none")]
        not_before: Option<DateTime<Utc>>,
        /// Exclusive upper bound
        #[serde(default, skip_serializing_if = "Option::is_none")]
        not_after: Option<DateTime<Utc>>,
    },

    /// All sub-conditions hold
    All {
        /// Sub-conditions
        conditions: Vec<Condition>,
    },

    /// At least one sub-condition holds
    Any {
        /// Sub-conditions
        conditions: Vec<Condition>,
    },

    /// The sub-condition does not hold
    Not {
        /// Negated condition
        condition: Box<Condition>,
    },
}

impl Default for Condition {
    fn default() -> Self {
        Condition::True
    }
}

impl Condition {
    /// Evaluate against a context
    pub fn eval(&self, ctx: &PolicyContext) -> bool {
        match self {
            Condition::True => true,
            Condition::Eq { attr, value } => ctx.attr(attr).as_ref() == Some(value),
            Condition::In { attr, values } => match ctx.attr(attr) {
                Some(actual) => values.contains(&actual),
                None => false,
            },
            Condition::Gt { attr, value } => matches!(ctx.attr(attr), Some(AttrValue::Int(v)) if v > *value),
            Condition::Lt { attr, value } => matches!(ctx.attr(attr), Some(AttrValue::Int(v)) if v < *value),
            Condition::TimeWindow {
                not_before,
                not_after,
            } => {
                not_before.map_or(true, |start| ctx.now >= start)
                    && not_after.map_or(true, |end| ctx.now < end)
            }
            Condition::All { conditions } => conditions.iter().all(|c| c.eval(ctx)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.eval(ctx)),
            Condition::Not { condition } => !condition.eval(ctx),
        }
    }
}

/// Glob-style target pattern
///
/// Supports exact match (`read:calendar`), trailing-wildcard match
/// (`admin:*`), and match-all (`*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pattern {
    /// Pattern string
    pub pattern: String,
}

impl Pattern {
    /// Create a pattern
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// Check whether a name matches this pattern
    pub fn matches(&self, name: &str) -> bool {
        if self.pattern == "*" {
            true
        } else if let Some(prefix) = self.pattern.strip_suffix('*') {
            name.starts_with(prefix)
        } else {
            name == self.pattern
        }
    }
}

/// A named, prioritized policy rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Rule name, reported in decisions and audit entries
    pub name: String,

    /// Evaluation priority; higher evaluates earlier
    pub priority: i32,

    /// Allow or deny
    pub effect: Effect,

    /// Actions this rule applies to; empty applies to all
    #[serde(default)]
    pub actions: Vec<String>,

    /// Rule applies when any requested scope matches; `None` applies always
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_pattern: Option<Pattern>,

    /// Rule applies when any requested tool/resource matches; `None` applies always
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pattern: Option<Pattern>,

    /// Predicate over the request attribute bag
    #[serde(default)]
    pub condition: Condition,
}

impl PolicyRule {
    /// Whether the rule's target and predicate both match the context
    fn matches(&self, ctx: &PolicyContext) -> bool {
        if !self.actions.is_empty() && !self.actions.iter().any(|a| a == &ctx.action) {
            return false;
        }

        if let Some(pattern) = &self.scope_pattern {
            if !ctx.scopes.iter().any(|s| pattern.matches(s)) {
                return false;
            }
        }

        if let Some(pattern) = &self.resource_pattern {
            if !ctx.tools.iter().any(|t| pattern.matches(t)) {
                return false;
            }
        }

        self.condition.eval(ctx)
    }
}

/// Request context the evaluator decides over
#[derive(Debug, Clone)]
pub struct PolicyContext {
    /// What is being decided, e.g. `token:issue`, `delegation:create`
    pub action: String,

    /// Kind of actor
    pub actor_kind: ActorKind,

    /// Acting agent's client id (`launched_by` semantics: always the acting
    /// agent, never the human principal)
    pub client_id: String,

    /// Tenant or partner id, when known
    pub tenant_id: Option<String>,

    /// Requested scopes, already expanded
    pub scopes: BTreeSet<String>,

    /// Requested tool/resource identifiers
    pub tools: Vec<String>,

    /// Task correlation id
    pub task_id: Option<String>,

    /// Delegation depth of the issuance being decided
    pub delegation_depth: u8,

    /// Whether a human approved this request (consent / PKCE exchange)
    pub human_approved: bool,

    /// Injected evaluation time
    pub now: DateTime<Utc>,

    /// Free-form attributes; consulted after the built-in names
    pub attributes: HashMap<String, AttrValue>,
}

impl PolicyContext {
    /// Build a context for an agent-initiated action
    pub fn for_agent(action: impl Into<String>, client_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            action: action.into(),
            actor_kind: ActorKind::Agent,
            client_id: client_id.into(),
            tenant_id: None,
            scopes: BTreeSet::new(),
            tools: vec![],
            task_id: None,
            delegation_depth: 0,
            human_approved: false,
            now,
            attributes: HashMap::new(),
        }
    }

    /// Look up an attribute by name
    ///
    /// Built-in names (`action`, `actor`, `client_id`, `tenant_id`,
    /// `task_id`, `delegation_depth`, `human_approved`) resolve from the
    /// typed fields; anything else from the free-form bag.
    pub fn attr(&self, name: &str) -> Option<AttrValue> {
        match name {
            "action" => Some(AttrValue::Str(self.action.clone())),
            "actor" => Some(AttrValue::Str(
                match self.actor_kind {
                    ActorKind::Agent => "agent",
                    ActorKind::User => "user",
                }
                .to_string(),
            )),
            "client_id" => Some(AttrValue::Str(self.client_id.clone())),
            "tenant_id" => self.tenant_id.clone().map(AttrValue::Str),
            "task_id" => self.task_id.clone().map(AttrValue::Str),
            "delegation_depth" => Some(AttrValue::Int(i64::from(self.delegation_depth))),
            "human_approved" => Some(AttrValue::Bool(self.human_approved)),
            other => self.attributes.get(other).cloned(),
        }
    }
}

/// The outcome of an evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Final effect
    pub effect: Effect,

    /// Name of the rule that decided, `None` for the default deny
    pub matched: Option<String>,
}

impl Decision {
    /// Whether the decision permits the request
    pub fn is_allow(&self) -> bool {
        self.effect == Effect::Allow
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: PolicyRule,
    seq: usize,
}

/// An immutable, deterministically ordered rule set
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    rules: Vec<CompiledRule>,
}

impl PolicySet {
    /// Compile a rule list: descending priority, configuration order as the
    /// stable tie-break
    pub fn compile(rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        let mut compiled: Vec<CompiledRule> = rules
            .into_iter()
            .enumerate()
            .map(|(seq, rule)| CompiledRule { rule, seq })
            .collect();
        compiled.sort_by(|a, b| {
            b.rule
                .priority
                .cmp(&a.rule.priority)
                .then(a.seq.cmp(&b.seq))
        });
        Self { rules: compiled }
    }

    /// Number of compiled rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set has no rules (every request then gets the default deny)
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate a context against the compiled rules
    ///
    /// One scan in compiled order. The first matching deny short-circuits.
    /// Matching allows are remembered but only win if no deny matches
    /// anywhere in the set. No matching rule at all is a deny.
    pub fn evaluate(&self, ctx: &PolicyContext) -> Decision {
        let mut allowed: Option<&CompiledRule> = None;

        for compiled in &self.rules {
            if !compiled.rule.matches(ctx) {
                continue;
            }
            match compiled.rule.effect {
                Effect::Deny => {
                    return Decision {
                        effect: Effect::Deny,
                        matched: Some(compiled.rule.name.clone()),
                    };
                }
                Effect::Allow => {
                    if allowed.is_none() {
                        allowed = Some(compiled);
                    }
                }
            }
        }

        match allowed {
            Some(compiled) => Decision {
                effect: Effect::Allow,
                matched: Some(compiled.rule.name.clone()),
            },
            None => Decision {
                effect: Effect::Deny,
                matched: None,
            },
        }
    }
}

/// Hot-swappable holder of the active rule set
///
/// Evaluations clone an `Arc` snapshot, so an in-flight evaluation never
/// observes a half-updated rule set.
#[derive(Debug, Default)]
pub struct PolicyEngine {
    active: RwLock<Arc<PolicySet>>,
}

impl PolicyEngine {
    /// Create an engine with an initial rule set
    pub fn new(set: PolicySet) -> Self {
        Self {
            active: RwLock::new(Arc::new(set)),
        }
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<PolicySet> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Atomically replace the active rule set
    pub fn swap(&self, set: PolicySet) {
        let mut guard = self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(set);
    }

    /// Evaluate against the current snapshot
    pub fn evaluate(&self, ctx: &PolicyContext) -> Decision {
        self.current().evaluate(ctx)
    }
}
