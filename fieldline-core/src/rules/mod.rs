//! Rule engine: priority-ordered, guarded transformation rules applied to
//! one record at a time.

pub mod condition;
pub mod engine;
pub mod expr;
pub mod lookup;
pub mod model;
pub mod registry;

pub use condition::{CompiledCondition, CompiledTree, compare_values, values_equal};
pub use engine::{FieldFailure, RuleApplication, RuleContext, RuleEngine, RuleOutcome, RuleSet};
pub use lookup::{InMemoryLookup, LookupRegistry, LookupSource};
pub use model::{
    Branch, BranchValue, Calculation, Condition, ConditionOp, ConditionTree, TransformKind,
    TransformRule,
};
pub use registry::{CustomFunction, FunctionRegistry};
