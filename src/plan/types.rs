use std::fmt;
use std::sync::Arc;

use crate::callable::Callable;
use crate::field::Field;
use crate::types::{Model, ParamType};
use crate::validator_cache::CompiledSchema;

/// How one rule obtains its value at request time.
#[derive(Clone)]
pub enum RuleResolver {
    /// The framework request object, verbatim.
    Request,
    /// The handler instance of the current request.
    HandlerInstance,
    /// One key of one request source, coerced and validated.
    Scalar {
        field: Field,
        key: String,
        schema: Arc<CompiledSchema>,
    },
    /// The whole source mapping (`raw_return` on a non-model type).
    RawMapping {
        field: Field,
        schema: Arc<CompiledSchema>,
    },
    /// The whole source mapping handed to the model constructor.
    RawModel { field: Field, model: Model },
    /// A model assembled from its own field rules ([`SubPlan::Model`]).
    NestedModel { field: Field, model: Model },
    /// The return value of the callable in [`SubPlan::Callable`].
    Depends,
}

impl RuleResolver {
    /// Short name used in plan shapes and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleResolver::Request => "request",
            RuleResolver::HandlerInstance => "instance",
            RuleResolver::Scalar { .. } => "scalar",
            RuleResolver::RawMapping { .. } => "raw_mapping",
            RuleResolver::RawModel { .. } => "raw_model",
            RuleResolver::NestedModel { .. } => "nested_model",
            RuleResolver::Depends => "depends",
        }
    }

    #[must_use]
    pub fn field(&self) -> Option<&Field> {
        match self {
            RuleResolver::Scalar { field, .. }
            | RuleResolver::RawMapping { field, .. }
            | RuleResolver::RawModel { field, .. }
            | RuleResolver::NestedModel { field, .. } => Some(field),
            RuleResolver::Request | RuleResolver::HandlerInstance | RuleResolver::Depends => None,
        }
    }
}

impl fmt::Debug for RuleResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nested plan of a rule.
#[derive(Clone, Debug)]
pub enum SubPlan {
    /// Plan of a `Depends` target, shared through the plan cache.
    Callable(Arc<ResolutionPlan>),
    /// Field rules of a nested model.
    Model(Vec<ParamRule>),
}

/// Compiled resolution of one parameter.
#[derive(Clone, Debug)]
pub struct ParamRule {
    pub(crate) name: String,
    pub(crate) declared: ParamType,
    /// Error location: source kind, then parameter (and nested field) names.
    pub(crate) loc: Vec<String>,
    pub(crate) resolver: RuleResolver,
    pub(crate) sub_plan: Option<SubPlan>,
}

impl ParamRule {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn declared(&self) -> &ParamType {
        &self.declared
    }

    #[must_use]
    pub fn loc(&self) -> &[String] {
        &self.loc
    }

    #[must_use]
    pub fn resolver(&self) -> &RuleResolver {
        &self.resolver
    }

    #[must_use]
    pub fn sub_plan(&self) -> Option<&SubPlan> {
        self.sub_plan.as_ref()
    }

    /// Schema of the rule's validator, if it has one.
    #[must_use]
    pub fn schema(&self) -> Option<&serde_json::Value> {
        match &self.resolver {
            RuleResolver::Scalar { schema, .. } | RuleResolver::RawMapping { schema, .. } => {
                Some(schema.schema())
            }
            _ => None,
        }
    }

    pub(crate) fn shape(&self) -> RuleShape {
        RuleShape {
            name: self.name.clone(),
            ty: self.declared.type_name(),
            resolver: self.resolver.as_str(),
            loc: self.loc.clone(),
            sub: self.sub_plan.as_ref().map(|sub| match sub {
                SubPlan::Callable(plan) => SubShape::Plan(Box::new(plan.shape())),
                SubPlan::Model(rules) => SubShape::Model(rules.iter().map(ParamRule::shape).collect()),
            }),
        }
    }
}

/// Compiled, immutable resolution of one callable.
#[derive(Clone, Debug)]
pub struct ResolutionPlan {
    pub(crate) target: Callable,
    pub(crate) rules: Vec<ParamRule>,
    /// Side-effect dependencies resolved before any rule (route plans only).
    pub(crate) pre_depends: Vec<Arc<ResolutionPlan>>,
    /// Class attributes attached to the handler instance (route plans only).
    pub(crate) class_attributes: Vec<ParamRule>,
}

impl ResolutionPlan {
    #[must_use]
    pub fn target(&self) -> &Callable {
        &self.target
    }

    #[must_use]
    pub fn rules(&self) -> &[ParamRule] {
        &self.rules
    }

    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&ParamRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    #[must_use]
    pub fn pre_depends(&self) -> &[Arc<ResolutionPlan>] {
        &self.pre_depends
    }

    #[must_use]
    pub fn class_attributes(&self) -> &[ParamRule] {
        &self.class_attributes
    }

    /// Structural projection used to compare plans.
    #[must_use]
    pub fn shape(&self) -> PlanShape {
        PlanShape {
            target: self.target.name().to_string(),
            rules: self.rules.iter().map(ParamRule::shape).collect(),
            pre_depends: self.pre_depends.iter().map(|p| p.shape()).collect(),
            class_attributes: self.class_attributes.iter().map(ParamRule::shape).collect(),
        }
    }

    /// Name of the first asynchronous callable reachable from this plan.
    #[must_use]
    pub fn first_async_dependency(&self) -> Option<String> {
        let from_pre = self.pre_depends.iter().find_map(|p| {
            if p.target.is_async() {
                Some(p.target.name().to_string())
            } else {
                p.first_async_dependency()
            }
        });
        from_pre.or_else(|| {
            self.rules
                .iter()
                .chain(self.class_attributes.iter())
                .find_map(first_async_in_rule)
        })
    }

    /// Name of the first callable in this plan that consumes a handler instance.
    #[must_use]
    pub(crate) fn instance_consumer(&self) -> Option<String> {
        let own = self
            .rules
            .iter()
            .any(|r| matches!(r.resolver, RuleResolver::HandlerInstance));
        if own {
            return Some(self.target.name().to_string());
        }
        self.pre_depends
            .iter()
            .find_map(|p| p.instance_consumer())
            .or_else(|| {
                self.rules
                    .iter()
                    .chain(self.class_attributes.iter())
                    .find_map(instance_consumer_in_rule)
            })
    }

    /// Total number of rules, nested ones included.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        fn count(rules: &[ParamRule]) -> usize {
            rules
                .iter()
                .map(|r| {
                    1 + match &r.sub_plan {
                        Some(SubPlan::Callable(p)) => p.rule_count(),
                        Some(SubPlan::Model(nested)) => count(nested),
                        None => 0,
                    }
                })
                .sum()
        }
        count(&self.rules)
            + count(&self.class_attributes)
            + self.pre_depends.iter().map(|p| p.rule_count()).sum::<usize>()
    }
}

fn first_async_in_rule(rule: &ParamRule) -> Option<String> {
    match &rule.sub_plan {
        Some(SubPlan::Callable(plan)) if plan.target.is_async() => {
            Some(plan.target.name().to_string())
        }
        Some(SubPlan::Callable(plan)) => plan.first_async_dependency(),
        Some(SubPlan::Model(rules)) => rules.iter().find_map(first_async_in_rule),
        None => None,
    }
}

fn instance_consumer_in_rule(rule: &ParamRule) -> Option<String> {
    match &rule.sub_plan {
        Some(SubPlan::Callable(plan)) => plan.instance_consumer(),
        Some(SubPlan::Model(rules)) => rules.iter().find_map(instance_consumer_in_rule),
        None => None,
    }
}

/// Comparable structure of a [`ResolutionPlan`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanShape {
    pub target: String,
    pub rules: Vec<RuleShape>,
    pub pre_depends: Vec<PlanShape>,
    pub class_attributes: Vec<RuleShape>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleShape {
    pub name: String,
    pub ty: String,
    pub resolver: &'static str,
    pub loc: Vec<String>,
    pub sub: Option<SubShape>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubShape {
    Plan(Box<PlanShape>),
    Model(Vec<RuleShape>),
}
