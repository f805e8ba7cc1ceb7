use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::types::{ParamRule, ResolutionPlan, RuleResolver, SubPlan};
use crate::callable::{Callable, CallableId};
use crate::error::ConfigurationError;
use crate::field::{Field, FieldKind};
use crate::signature::{Param, SignatureAnalyzer};
use crate::types::ParamType;
use crate::validator_cache::SchemaCache;

/// Dependency plans shared across routes, keyed by callable identity.
pub struct PlanCache {
    plans: DashMap<CallableId, Arc<ResolutionPlan>>,
    enabled: bool,
}

impl PlanCache {
    pub fn new(enabled: bool) -> Self {
        PlanCache {
            plans: DashMap::new(),
            enabled,
        }
    }

    #[must_use]
    pub fn get(&self, id: CallableId) -> Option<Arc<ResolutionPlan>> {
        if !self.enabled {
            return None;
        }
        self.plans.get(&id).map(|p| Arc::clone(p.value()))
    }

    fn insert(&self, id: CallableId, plan: Arc<ResolutionPlan>) -> Arc<ResolutionPlan> {
        if !self.enabled {
            return plan;
        }
        // First writer wins so every route shares one plan per callable
        Arc::clone(self.plans.entry(id).or_insert(plan).value())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn clear(&self) {
        self.plans.clear();
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Compiles signatures into [`ResolutionPlan`]s.
///
/// A builder is created per route registration. It tracks the callables
/// currently being built so that a dependency reaching back into the stack is
/// reported as a cycle instead of recursing forever.
pub struct PlanBuilder<'a> {
    analyzer: &'a SignatureAnalyzer,
    schemas: &'a SchemaCache,
    cache: &'a PlanCache,
    stack: Vec<(CallableId, String)>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(analyzer: &'a SignatureAnalyzer, schemas: &'a SchemaCache, cache: &'a PlanCache) -> Self {
        PlanBuilder {
            analyzer,
            schemas,
            cache,
            stack: Vec::new(),
        }
    }

    /// Build the plan of a route handler.
    ///
    /// Route plans carry the pre-depends and class attributes of the route and
    /// are not put in the shared cache; dependency plans reached from them are.
    ///
    /// # Arguments
    ///
    /// * `handler` - The route handler
    /// * `pre_depends` - Side-effect dependencies, in resolution order
    ///
    /// # Errors
    ///
    /// Any [`ConfigurationError`] found in the handler or a transitive dependency.
    pub fn build_route(
        &mut self,
        handler: &Callable,
        pre_depends: &[Callable],
    ) -> Result<ResolutionPlan, ConfigurationError> {
        self.enter(handler)?;
        let analyzed = self.analyzer.analyze(handler)?;
        let rules = self.build_rules(handler, &analyzed.params)?;
        let class_attributes = self.build_rules(handler, &analyzed.class_attributes)?;
        let pre = pre_depends
            .iter()
            .map(|dep| self.build_dependency(dep))
            .collect::<Result<Vec<_>, _>>()?;
        self.stack.pop();

        let plan = ResolutionPlan {
            target: handler.clone(),
            rules,
            pre_depends: pre,
            class_attributes,
        };
        info!(
            handler_name = %handler.name(),
            rules = plan.rules.len(),
            pre_depends = plan.pre_depends.len(),
            class_attributes = plan.class_attributes.len(),
            total_rules = plan.rule_count(),
            "Resolution plan built"
        );
        Ok(plan)
    }

    /// Build (or fetch from the cache) the plan of a dependency.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::DependencyCycle`] when `callable` is already being
    /// built, plus any error of its own signature.
    pub fn build_dependency(&mut self, callable: &Callable) -> Result<Arc<ResolutionPlan>, ConfigurationError> {
        self.enter(callable)?;
        if let Some(hit) = self.cache.get(callable.id()) {
            self.stack.pop();
            return Ok(hit);
        }
        let analyzed = self.analyzer.analyze(callable)?;
        let rules = self.build_rules(callable, &analyzed.params)?;
        self.stack.pop();

        let plan = Arc::new(ResolutionPlan {
            target: callable.clone(),
            rules,
            pre_depends: Vec::new(),
            class_attributes: Vec::new(),
        });
        debug!(
            dependency = %callable.name(),
            rules = plan.rules.len(),
            "Dependency plan built"
        );
        Ok(self.cache.insert(callable.id(), plan))
    }

    fn enter(&mut self, callable: &Callable) -> Result<(), ConfigurationError> {
        if let Some(pos) = self.stack.iter().position(|(id, _)| *id == callable.id()) {
            let mut cycle: Vec<String> = self.stack[pos..].iter().map(|(_, n)| n.clone()).collect();
            cycle.push(callable.name().to_string());
            return Err(ConfigurationError::DependencyCycle { cycle });
        }
        self.stack.push((callable.id(), callable.name().to_string()));
        Ok(())
    }

    fn build_rules(&mut self, owner: &Callable, params: &[Param]) -> Result<Vec<ParamRule>, ConfigurationError> {
        params
            .iter()
            .map(|p| self.build_rule(owner, p, None))
            .collect()
    }

    /// `parent` is the outer parameter name when `param` is a nested model field.
    fn build_rule(
        &mut self,
        owner: &Callable,
        param: &Param,
        parent: Option<&str>,
    ) -> Result<ParamRule, ConfigurationError> {
        let name = param.name.clone();
        let declared = param.ty.clone();

        let field = match (&param.ty, &param.field) {
            (ParamType::Request, _) => {
                return Ok(rule(name, declared, vec!["request".into()], RuleResolver::Request, None));
            }
            (ParamType::HandlerInstance, _) => {
                return Ok(rule(name, declared, vec!["instance".into()], RuleResolver::HandlerInstance, None));
            }
            (_, Some(field)) => field.clone(),
            (_, None) => {
                return Err(ConfigurationError::UnresolvableParameter {
                    callable: owner.name().to_string(),
                    param: name,
                });
            }
        };

        let mut loc = vec![field.kind().as_str().to_string()];
        loc.extend(parent.map(str::to_string));
        loc.push(name.clone());

        if field.kind() == FieldKind::Depends {
            let target = field
                .depends_target()
                .map(|t| t.callable())
                .ok_or_else(|| ConfigurationError::UnresolvableParameter {
                    callable: owner.name().to_string(),
                    param: name.clone(),
                })?;
            let plan = self.build_dependency(&target)?;
            return Ok(rule(name, declared, loc, RuleResolver::Depends, Some(SubPlan::Callable(plan))));
        }

        // Model fields one level down are validated as whole values
        match param.ty.as_model() {
            Some(model) if field.raw_return() => {
                let model = model.clone();
                Ok(rule(name, declared, loc, RuleResolver::RawModel { field, model }, None))
            }
            Some(model) if parent.is_none() => {
                let nested = model
                    .fields()
                    .iter()
                    .map(|mf| {
                        let inner = match &mf.field {
                            Some(own) => own.clone(),
                            None => Field::of(field.kind()).build()?,
                        };
                        if inner.kind() == FieldKind::Depends || mf.ty.is_special() {
                            return Err(ConfigurationError::InvalidFieldType {
                                callable: owner.name().to_string(),
                                param: format!("{}.{}", name, mf.name),
                                kind: inner.kind(),
                                ty: mf.ty.type_name(),
                            });
                        }
                        let nested_param = Param::new(mf.name.clone(), mf.ty.clone(), Some(inner));
                        self.build_rule(owner, &nested_param, Some(&name))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let model = model.clone();
                Ok(rule(
                    name,
                    declared,
                    loc,
                    RuleResolver::NestedModel { field, model },
                    Some(SubPlan::Model(nested)),
                ))
            }
            _ => {
                let label = format!("{}.{}", owner.name(), loc[1..].join("."));
                let schema = self
                    .schemas
                    .get_or_compile(&label, &param.ty.schema_with(field.constraints()))?;
                if field.raw_return() {
                    return Ok(rule(name, declared, loc, RuleResolver::RawMapping { field, schema }, None));
                }
                let key = field.request_key(&name);
                Ok(rule(name, declared, loc, RuleResolver::Scalar { field, key, schema }, None))
            }
        }
    }
}

fn rule(
    name: String,
    declared: ParamType,
    loc: Vec<String>,
    resolver: RuleResolver,
    sub_plan: Option<SubPlan>,
) -> ParamRule {
    ParamRule {
        name,
        declared,
        loc,
        resolver,
        sub_plan,
    }
}
