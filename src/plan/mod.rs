//! # Plan Module
//!
//! Registration-time compilation of signatures into resolution plans.
//!
//! ## Overview
//!
//! A [`ResolutionPlan`] is the compiled form of one callable: an ordered list of
//! [`ParamRule`]s, one per parameter, each with a [`RuleResolver`] saying how the
//! value is obtained and, for dependencies and nested models, a [`SubPlan`].
//!
//! ```text
//! get_user (route plan)
//! ├── pre_depends: [check_token]
//! ├── class_attributes: []
//! ├── uid   scalar(query.uid, {"type": "integer", "minimum": 1})
//! ├── user  nested_model(User)
//! │   ├── name  scalar(query.user.name)
//! │   └── age   scalar(query.user.age)
//! └── db    depends(open_db)
//!     └── dsn  scalar(header.dsn)
//! ```
//!
//! ## Caching
//!
//! Dependency plans are shared through [`PlanCache`], keyed by callable
//! identity. Route plans are built once per `bind` and stored on the route's
//! [`CoreModel`](crate::core_model::CoreModel). Plans are immutable once built,
//! so concurrent requests read them without locking.
//!
//! ## Cycles
//!
//! [`PlanBuilder`] keeps the stack of callables being built. A dependency that is
//! already on the stack fails with
//! [`ConfigurationError::DependencyCycle`](crate::error::ConfigurationError::DependencyCycle).
//!
//! ## Idempotence
//!
//! A plan is a pure function of the signatures it was built from;
//! [`ResolutionPlan::shape`] projects it into a comparable [`PlanShape`].

mod builder;
mod types;

pub use builder::{PlanBuilder, PlanCache};
pub use types::{ParamRule, PlanShape, ResolutionPlan, RuleResolver, RuleShape, SubPlan, SubShape};
