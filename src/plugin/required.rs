use futures::future::BoxFuture;

use super::core::{AsyncNext, AsyncPlugin, Invocation, Next, Plugin};
use crate::callable::{Arguments, Resolved};
use crate::core_model::CoreModel;
use crate::error::{BindError, ConfigurationError, ValidationError, ValidationIssue};

fn is_present(args: &Arguments, name: &str) -> bool {
    args.get(name).is_some_and(Resolved::is_present)
}

fn location(core: &CoreModel, name: &str) -> Vec<String> {
    core.plan
        .rule(name)
        .map_or_else(|| vec![name.to_string()], |r| r.loc().to_vec())
}

fn check_names<'a>(
    core: &CoreModel,
    plugin: &str,
    names: impl Iterator<Item = &'a String>,
) -> Result<(), ConfigurationError> {
    for name in names {
        if core.plan.rule(name).is_none() {
            return Err(ConfigurationError::PluginCheck {
                route: core.route_id.clone(),
                plugin: plugin.to_string(),
                reason: format!("parameter `{name}` is not declared by the handler"),
            });
        }
    }
    Ok(())
}

/// Called without resolved arguments: the plugin sits in the pre chain.
fn unresolved(inv: &Invocation, plugin: &str) -> BindError {
    BindError::Configuration(ConfigurationError::PostPluginInPreChain {
        route: inv.core.route_id.clone(),
        plugin: plugin.to_string(),
    })
}

fn finish(core: &CoreModel, issues: Vec<ValidationIssue>) -> Result<(), BindError> {
    if issues.is_empty() {
        return Ok(());
    }
    let tip = core
        .tip()
        .then(|| format!("invalid parameter combination for `{}`", core.route_id));
    Err(BindError::Validation(ValidationError::new(issues).with_tip(tip)))
}

/// Post plugin: when a parameter is provided, its companions must be too.
///
/// "Provided" means resolved to anything but `null`, so the usual shape is
/// optional parameters with a `null` default.
#[derive(Debug, Clone, Default)]
pub struct RequiredPlugin {
    rules: Vec<(String, Vec<String>)>,
}

impl RequiredPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// When `param` is provided, every name in `companions` is required.
    #[must_use]
    pub fn when<I, S>(mut self, param: impl Into<String>, companions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules
            .push((param.into(), companions.into_iter().map(Into::into).collect()));
        self
    }

    fn validate(&self, inv: &Invocation) -> Result<(), BindError> {
        let Some(args) = &inv.arguments else {
            return Err(unresolved(inv, "RequiredPlugin"));
        };
        let mut issues = Vec::new();
        for (param, companions) in &self.rules {
            if !is_present(args, param) {
                continue;
            }
            for companion in companions {
                if !is_present(args, companion) {
                    issues.push(ValidationIssue::new(
                        location(&inv.core, companion),
                        format!("`{companion}` is required when `{param}` is provided"),
                    ));
                }
            }
        }
        finish(&inv.core, issues)
    }

    fn check_route(&self, core: &CoreModel) -> Result<(), ConfigurationError> {
        let names = self
            .rules
            .iter()
            .flat_map(|(p, companions)| std::iter::once(p).chain(companions.iter()));
        check_names(core, "RequiredPlugin", names)
    }
}

impl Plugin for RequiredPlugin {
    fn check(&self, core: &CoreModel) -> Result<(), ConfigurationError> {
        self.check_route(core)
    }

    fn post_only(&self) -> bool {
        true
    }

    fn call(&self, inv: Invocation, next: Next<'_>) -> Result<Resolved, BindError> {
        self.validate(&inv)?;
        next.run(inv)
    }
}

impl AsyncPlugin for RequiredPlugin {
    fn check(&self, core: &CoreModel) -> Result<(), ConfigurationError> {
        self.check_route(core)
    }

    fn post_only(&self) -> bool {
        true
    }

    fn call<'a>(&'a self, inv: Invocation, next: AsyncNext<'a>) -> BoxFuture<'a, Result<Resolved, BindError>> {
        Box::pin(async move {
            self.validate(&inv)?;
            next.run(inv).await
        })
    }
}

/// Post plugin: at most one parameter of each group may be provided.
#[derive(Debug, Clone, Default)]
pub struct AtMostOneOfPlugin {
    groups: Vec<Vec<String>>,
}

impl AtMostOneOfPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn group<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.push(names.into_iter().map(Into::into).collect());
        self
    }

    fn validate(&self, inv: &Invocation) -> Result<(), BindError> {
        let Some(args) = &inv.arguments else {
            return Err(unresolved(inv, "AtMostOneOfPlugin"));
        };
        let mut issues = Vec::new();
        for group in &self.groups {
            let provided: Vec<&String> = group.iter().filter(|n| is_present(args, n)).collect();
            if provided.len() > 1 {
                let listed = group
                    .iter()
                    .map(|n| format!("`{n}`"))
                    .collect::<Vec<_>>()
                    .join(", ");
                for name in provided {
                    issues.push(ValidationIssue::new(
                        location(&inv.core, name),
                        format!("at most one of {listed} may be provided"),
                    ));
                }
            }
        }
        finish(&inv.core, issues)
    }

    fn check_route(&self, core: &CoreModel) -> Result<(), ConfigurationError> {
        check_names(core, "AtMostOneOfPlugin", self.groups.iter().flatten())
    }
}

impl Plugin for AtMostOneOfPlugin {
    fn check(&self, core: &CoreModel) -> Result<(), ConfigurationError> {
        self.check_route(core)
    }

    fn post_only(&self) -> bool {
        true
    }

    fn call(&self, inv: Invocation, next: Next<'_>) -> Result<Resolved, BindError> {
        self.validate(&inv)?;
        next.run(inv)
    }
}

impl AsyncPlugin for AtMostOneOfPlugin {
    fn check(&self, core: &CoreModel) -> Result<(), ConfigurationError> {
        self.check_route(core)
    }

    fn post_only(&self) -> bool {
        true
    }

    fn call<'a>(&'a self, inv: Invocation, next: AsyncNext<'a>) -> BoxFuture<'a, Result<Resolved, BindError>> {
        Box::pin(async move {
            self.validate(&inv)?;
            next.run(inv).await
        })
    }
}
