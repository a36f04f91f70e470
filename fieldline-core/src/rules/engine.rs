//! Rule set compilation and per-record evaluation.

use crate::error::{ConfigError, RuleFailure};
use crate::rules::condition::{CompiledCondition, CompiledTree};
use crate::rules::expr::Expr;
use crate::rules::lookup::{LookupRegistry, LookupSource};
use crate::rules::model::{BranchValue, Calculation, TransformKind, TransformRule};
use crate::rules::registry::{CustomFunction, FunctionRegistry};
use crate::types::{Record, number_value, value_as_f64, value_to_text};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Collaborators a rule set is compiled against.
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    pub functions: FunctionRegistry,
    pub lookups: LookupRegistry,
}

impl RuleContext {
    pub fn new(functions: FunctionRegistry, lookups: LookupRegistry) -> Self {
        Self { functions, lookups }
    }

    /// Built-in functions plus the given lookup tables.
    pub fn with_lookups(lookups: LookupRegistry) -> Self {
        Self::new(FunctionRegistry::with_builtins(), lookups)
    }
}

// ---------------------------------------------------------------------------
// Compiled forms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Aggregate {
    Sum,
    Product,
    Mean,
    Min,
    Max,
}

enum CompiledCalc {
    ParseDecimal { thousands: String, decimal: String },
    Aggregate(Aggregate),
    Expression(Expr),
}

enum CompiledBranch {
    Literal(Value),
    Field(String),
    Transform(Box<CompiledKind>),
}

enum CompiledKind {
    DirectCopy,
    Concatenate {
        separator: String,
    },
    Lookup {
        table: String,
        source: Arc<dyn LookupSource>,
        default: Option<Value>,
    },
    Calculation(CompiledCalc),
    PatternExtract {
        regex: Regex,
        group: usize,
    },
    Conditional {
        branches: Vec<(CompiledTree, CompiledBranch)>,
        otherwise: Option<CompiledBranch>,
    },
    Custom {
        name: String,
        function: Arc<dyn CustomFunction>,
        params: Map<String, Value>,
    },
    Constant(Value),
}

struct CompiledRule {
    rule: TransformRule,
    guard: Vec<CompiledCondition>,
    kind: CompiledKind,
}

/// A validated rule list in evaluation order: descending priority, ties in
/// declaration order. Immutable once compiled.
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| &r.rule.id))
            .finish()
    }
}

impl RuleSet {
    /// Validate and compile rules against the given collaborators.
    pub fn compile(rules: &[TransformRule], context: &RuleContext) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            if rule.id.trim().is_empty() {
                return Err(ConfigError::InvalidRule {
                    rule_id: rule.id.clone(),
                    reason: "rule id is empty".into(),
                });
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(invalid(rule, "duplicate rule id"));
            }
            if rule.target.trim().is_empty() {
                return Err(invalid(rule, "target field is empty"));
            }
            if rule.sources.is_empty() && !rule.is_generator() {
                return Err(invalid(
                    rule,
                    &format!("'{}' needs at least one source field", rule.transform.name()),
                ));
            }
            let guard = rule
                .conditions
                .iter()
                .map(|c| CompiledCondition::compile(c, &rule.id))
                .collect::<Result<Vec<_>, _>>()?;
            let kind = compile_kind(&rule.transform, rule, context)?;
            compiled.push(CompiledRule {
                rule: rule.clone(),
                guard,
                kind,
            });
        }
        compiled.sort_by_key(|r| std::cmp::Reverse(r.rule.priority));
        debug!(rules = compiled.len(), "Compiled rule set");
        Ok(Self { rules: compiled })
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &TransformRule> {
        self.rules.iter().map(|r| &r.rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn invalid(rule: &TransformRule, reason: &str) -> ConfigError {
    ConfigError::InvalidRule {
        rule_id: rule.id.clone(),
        reason: reason.to_string(),
    }
}

fn compile_kind(
    kind: &TransformKind,
    rule: &TransformRule,
    context: &RuleContext,
) -> Result<CompiledKind, ConfigError> {
    Ok(match kind {
        TransformKind::DirectCopy => {
            if rule.sources.len() != 1 {
                return Err(invalid(rule, "direct_copy needs exactly one source field"));
            }
            CompiledKind::DirectCopy
        }
        TransformKind::Concatenate { separator } => CompiledKind::Concatenate {
            separator: separator.clone(),
        },
        TransformKind::Lookup { table, default } => {
            let source =
                context
                    .lookups
                    .get(table)
                    .ok_or_else(|| ConfigError::UnknownLookupTable {
                        owner: rule.id.clone(),
                        table: table.clone(),
                    })?;
            CompiledKind::Lookup {
                table: table.clone(),
                source,
                default: default.clone(),
            }
        }
        TransformKind::Calculation { calculation } => {
            CompiledKind::Calculation(match calculation {
                Calculation::ParseDecimal {
                    thousands_separator,
                    decimal_separator,
                } => {
                    if decimal_separator.is_empty() || decimal_separator == thousands_separator {
                        return Err(invalid(
                            rule,
                            "decimal separator must be non-empty and differ from the thousands separator",
                        ));
                    }
                    CompiledCalc::ParseDecimal {
                        thousands: thousands_separator.clone(),
                        decimal: decimal_separator.clone(),
                    }
                }
                Calculation::Sum => CompiledCalc::Aggregate(Aggregate::Sum),
                Calculation::Product => CompiledCalc::Aggregate(Aggregate::Product),
                Calculation::Mean => CompiledCalc::Aggregate(Aggregate::Mean),
                Calculation::Min => CompiledCalc::Aggregate(Aggregate::Min),
                Calculation::Max => CompiledCalc::Aggregate(Aggregate::Max),
                Calculation::Expression { formula } => {
                    CompiledCalc::Expression(Expr::parse(formula).map_err(|message| {
                        ConfigError::InvalidExpression {
                            rule_id: rule.id.clone(),
                            message,
                        }
                    })?)
                }
            })
        }
        TransformKind::PatternExtract { pattern, group } => {
            let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                rule_id: rule.id.clone(),
                message: e.to_string(),
            })?;
            let groups = regex.captures_len();
            let group = match group {
                Some(g) if *g < groups => *g,
                Some(g) => {
                    return Err(ConfigError::InvalidPattern {
                        rule_id: rule.id.clone(),
                        message: format!("group {g} does not exist (pattern has {})", groups - 1),
                    });
                }
                None if groups > 1 => 1,
                None => 0,
            };
            CompiledKind::PatternExtract { regex, group }
        }
        TransformKind::Conditional {
            branches,
            otherwise,
        } => {
            let branches = branches
                .iter()
                .map(|b| -> Result<_, ConfigError> {
                    Ok((
                        CompiledTree::compile(&b.when, &rule.id)?,
                        compile_branch(&b.then, rule, context)?,
                    ))
                })
                .collect::<Result<Vec<_>, ConfigError>>()?;
            let otherwise = otherwise
                .as_ref()
                .map(|o| compile_branch(o, rule, context))
                .transpose()?;
            CompiledKind::Conditional {
                branches,
                otherwise,
            }
        }
        TransformKind::Custom { function, params } => {
            let resolved =
                context
                    .functions
                    .get(function)
                    .ok_or_else(|| ConfigError::UnknownFunction {
                        rule_id: rule.id.clone(),
                        function: function.clone(),
                    })?;
            CompiledKind::Custom {
                name: function.clone(),
                function: resolved,
                params: params.clone(),
            }
        }
        TransformKind::Constant { value } => CompiledKind::Constant(value.clone()),
    })
}

fn compile_branch(
    value: &BranchValue,
    rule: &TransformRule,
    context: &RuleContext,
) -> Result<CompiledBranch, ConfigError> {
    Ok(match value {
        BranchValue::Literal { value } => CompiledBranch::Literal(value.clone()),
        BranchValue::Field { name } => CompiledBranch::Field(name.clone()),
        BranchValue::Transform { transform } => {
            CompiledBranch::Transform(Box::new(compile_kind(transform, rule, context)?))
        }
    })
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

type Resolve<'r, 'a> = &'r dyn Fn(&str) -> Option<&'a Value>;

fn first_source<'a>(sources: &[String], resolve: Resolve<'_, 'a>) -> Result<&'a Value, RuleFailure> {
    let field = sources.first().map(String::as_str).unwrap_or_default();
    resolve(field).ok_or_else(|| RuleFailure::MissingSource {
        field: field.to_string(),
    })
}

fn require<'a>(field: &str, resolve: Resolve<'_, 'a>) -> Result<&'a Value, RuleFailure> {
    resolve(field).ok_or_else(|| RuleFailure::MissingSource {
        field: field.to_string(),
    })
}

fn finite(n: f64) -> Result<Value, RuleFailure> {
    number_value(n).ok_or_else(|| RuleFailure::arithmetic("result is not a finite number"))
}

impl CompiledKind {
    fn evaluate(&self, sources: &[String], resolve: Resolve<'_, '_>) -> Result<Value, RuleFailure> {
        match self {
            Self::DirectCopy => first_source(sources, resolve).cloned(),
            Self::Concatenate { separator } => {
                let parts: Vec<String> = sources
                    .iter()
                    .map(|s| resolve(s.as_str()).map(value_to_text).unwrap_or_default())
                    .collect();
                Ok(Value::String(parts.join(separator)))
            }
            Self::Lookup {
                table,
                source,
                default,
            } => {
                let key = first_source(sources, resolve)?;
                if key.is_null() {
                    return Ok(default.clone().unwrap_or(Value::Null));
                }
                let key = value_to_text(key);
                match source.lookup(&key) {
                    Some(value) => Ok(value),
                    None => default.clone().ok_or_else(|| RuleFailure::LookupMiss {
                        table: table.clone(),
                        key,
                    }),
                }
            }
            Self::Calculation(calc) => calc.evaluate(sources, resolve),
            Self::PatternExtract { regex, group } => {
                let value = first_source(sources, resolve)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                let text = value_to_text(value);
                Ok(regex
                    .captures(&text)
                    .and_then(|caps| caps.get(*group))
                    .map(|m| Value::String(m.as_str().to_string()))
                    .unwrap_or(Value::Null))
            }
            Self::Conditional {
                branches,
                otherwise,
            } => {
                for (when, then) in branches {
                    if when.evaluate(resolve) {
                        return then.evaluate(sources, resolve);
                    }
                }
                match otherwise {
                    Some(branch) => branch.evaluate(sources, resolve),
                    None => Ok(Value::Null),
                }
            }
            Self::Custom {
                name,
                function,
                params,
            } => {
                let args: Vec<Value> = sources
                    .iter()
                    .map(|s| resolve(s.as_str()).cloned().unwrap_or(Value::Null))
                    .collect();
                function.call(&args, params).map_err(|failure| {
                    if matches!(failure, RuleFailure::Custom { .. }) {
                        failure
                    } else {
                        RuleFailure::Custom {
                            function: name.clone(),
                            message: failure.to_string(),
                        }
                    }
                })
            }
            Self::Constant(value) => Ok(value.clone()),
        }
    }
}

impl CompiledBranch {
    fn evaluate(&self, sources: &[String], resolve: Resolve<'_, '_>) -> Result<Value, RuleFailure> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Field(name) => require(name, resolve).cloned(),
            Self::Transform(kind) => kind.evaluate(sources, resolve),
        }
    }
}

impl CompiledCalc {
    fn evaluate(&self, sources: &[String], resolve: Resolve<'_, '_>) -> Result<Value, RuleFailure> {
        match self {
            Self::ParseDecimal { thousands, decimal } => {
                let value = first_source(sources, resolve)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                if let Value::Number(_) = value {
                    return Ok(value.clone());
                }
                let raw = value_to_text(value);
                let mut text: String = raw.trim().to_string();
                if !thousands.is_empty() {
                    text = text.replace(thousands.as_str(), "");
                }
                if decimal != "." {
                    text = text.replace(decimal.as_str(), ".");
                }
                let text: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                let parsed = text
                    .parse::<f64>()
                    .map_err(|e| RuleFailure::parse(raw.clone(), e.to_string()))?;
                finite(parsed)
            }
            Self::Aggregate(aggregate) => {
                let mut numbers = Vec::with_capacity(sources.len());
                for field in sources {
                    let value = require(field, resolve)?;
                    if value.is_null() {
                        continue;
                    }
                    let n = value_as_f64(value)
                        .ok_or_else(|| RuleFailure::coercion(value_to_text(value), "number"))?;
                    numbers.push(n);
                }
                if numbers.is_empty() {
                    return Ok(Value::Null);
                }
                let result: f64 = match aggregate {
                    Aggregate::Sum => numbers.iter().sum(),
                    Aggregate::Product => numbers.iter().product(),
                    Aggregate::Mean => numbers.iter().sum::<f64>() / numbers.len() as f64,
                    Aggregate::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
                    Aggregate::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                };
                finite(result)
            }
            Self::Expression(expr) => {
                let mut lookup = |name: &str| -> Result<f64, RuleFailure> {
                    let value = require(name, resolve)?;
                    value_as_f64(value).ok_or_else(|| {
                        let shown = if value.is_null() {
                            "null".to_string()
                        } else {
                            value_to_text(value)
                        };
                        RuleFailure::coercion(shown, "number")
                    })
                };
                finite(expr.eval(&mut lookup)?)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One applied rule: exactly one per rule that passed its guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleApplication {
    pub rule_id: String,
    pub target: String,
    pub sources: Vec<String>,
    /// Set when the rule failed and the target holds its default or null.
    pub failure: Option<RuleFailure>,
}

/// A failure recorded against a target field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFailure {
    pub rule_id: String,
    pub field: String,
    pub failure: RuleFailure,
}

/// Result of evaluating all rules against one input record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleOutcome {
    pub output: Record,
    pub applications: Vec<RuleApplication>,
    pub failures: Vec<FieldFailure>,
    /// Failures exceeded the per-record threshold.
    pub rejected: bool,
}

/// Evaluates a compiled rule set one record at a time.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Arc<RuleSet>,
    max_rule_failures: usize,
}

impl RuleEngine {
    pub fn new(rules: Arc<RuleSet>, max_rule_failures: usize) -> Self {
        Self {
            rules,
            max_rule_failures,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Apply every enabled rule whose guard holds, in priority order.
    ///
    /// Fields resolve from targets already computed for this row first,
    /// then from the input record. Each applied rule writes its target, so
    /// a later success replaces an earlier value. A failing rule leaves an
    /// existing value in place and writes its default or null otherwise.
    pub fn apply(&self, input: &Record) -> RuleOutcome {
        let mut output = Record::new();
        let mut applications = Vec::new();
        let mut failures = Vec::new();

        for compiled in &self.rules.rules {
            let rule = &compiled.rule;
            if !rule.enabled {
                continue;
            }

            let result = {
                let resolve = |name: &str| output.get(name).or_else(|| input.get(name));
                if !compiled.guard.iter().all(|c| c.evaluate(&resolve)) {
                    continue;
                }
                compiled.kind.evaluate(&rule.sources, &resolve)
            };

            match result {
                Ok(value) => {
                    output.insert(rule.target.clone(), value);
                    applications.push(RuleApplication {
                        rule_id: rule.id.clone(),
                        target: rule.target.clone(),
                        sources: rule.sources.clone(),
                        failure: None,
                    });
                }
                Err(failure) => {
                    if !output.contains_key(&rule.target) {
                        output.insert(
                            rule.target.clone(),
                            rule.default.clone().unwrap_or(Value::Null),
                        );
                    }
                    failures.push(FieldFailure {
                        rule_id: rule.id.clone(),
                        field: rule.target.clone(),
                        failure: failure.clone(),
                    });
                    applications.push(RuleApplication {
                        rule_id: rule.id.clone(),
                        target: rule.target.clone(),
                        sources: rule.sources.clone(),
                        failure: Some(failure),
                    });
                }
            }
        }

        let rejected = failures.len() > self.max_rule_failures;
        RuleOutcome {
            output,
            applications,
            failures,
            rejected,
        }
    }
}
