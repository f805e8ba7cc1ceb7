//! # brrtbind
//!
//! **brrtbind** turns plain handler callables into request handlers whose
//! parameters are declared, not parsed: each parameter names where its value
//! comes from (query, header, body, cookie, path, form, file, or another
//! callable), how it is validated and what its default is. The engine compiles
//! that declaration once at registration and resolves it on every request.
//!
//! ## Overview
//!
//! - **[`field`]** - Field descriptors: source kind, alias, default, constraints
//! - **[`types`]** - Declared parameter types, structured models and their schemas
//! - **[`signature`]** - Handler signatures and their validation
//! - **[`callable`]** - Handlers and dependencies (sync, async, scoped)
//! - **[`plan`]** - Compiled, cached resolution plans
//! - **[`context`]** - Per-request ambient context
//! - **[`plugin`]** - Onion-ordered plugin pipeline and built-in plugins
//! - **[`registry`]** - Route registry owned by the application
//! - **[`bind`]** - Route options and the bound handler
//! - **[`request`]** - The interface a web-framework adapter implements
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Framework
//!     participant Bound as BoundHandler
//!     participant Pre as Pre plugins
//!     participant Resolver
//!     participant Post as Post plugins
//!     participant Handler
//!
//!     Framework->>Bound: call(request, raw)
//!     Bound->>Bound: Context::init + install
//!     Bound->>Pre: P1.before, P2.before
//!     Pre->>Resolver: resolve plan
//!     Resolver->>Resolver: pre-depends
//!     Resolver->>Resolver: class attributes
//!     Resolver->>Resolver: parameters (Depends post-order)
//!     alt Missing or invalid value
//!         Resolver->>Resolver: release scoped dependencies
//!         Resolver-->>Framework: ValueNotFoundError / ValidationError
//!     end
//!     Resolver->>Post: arguments
//!     Post->>Handler: handler(arguments)
//!     Handler-->>Post: result
//!     Post-->>Resolver: result
//!     Resolver->>Resolver: release scoped dependencies (LIFO)
//!     Resolver-->>Pre: result
//!     Pre-->>Framework: P2.after, P1.after
//! ```
//!
//! ### Key Architectural Patterns
//!
//! 1. **Compile once**: signatures are analyzed, plans built and validators
//!    compiled at `bind`; requests only walk immutable plans
//! 2. **Explicit registry**: routes live in a [`Registry`] owned by the
//!    composition root, not in a process-wide global
//! 3. **Ambient context without globals**: a task-local (async) or thread-local
//!    guard (sync) carries the request to dependency bodies
//! 4. **Closed field kinds**: dispatch over [`FieldKind`] is an exhaustive `match`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use brrtbind::{
//!     BindConfig, Callable, Field, ParamType, RawCall, Registry, RuntimeConfig, Signature,
//!     SimpleRequest,
//! };
//! use http::Method;
//! use serde_json::json;
//!
//! let registry = Registry::new(RuntimeConfig::from_env());
//!
//! let handler = Callable::sync(
//!     "get_user",
//!     Signature::new()
//!         .param("uid", ParamType::Integer, Field::query().ge(1).build()?)
//!         .param("lang", ParamType::String, Field::header().alias("Accept-Language").default(json!("en")).build()?),
//!     |args| Ok(json!({ "uid": args.parse::<u64>("uid")?, "lang": args.parse::<String>("lang")? })),
//! );
//! let bound = registry.bind("get_user", handler, BindConfig::new().tag("user"))?;
//!
//! let request = SimpleRequest::new(Method::GET, "/user").with_query("uid", "7").into_adapter();
//! let out = bound.call(request, RawCall::new())?;
//! ```
//!
//! ## Configuration
//!
//! See [`runtime_config`] for the `BRRTR_*` environment variables and
//! [`logging`] for the optional subscriber setup.

pub mod bind;
pub mod callable;
pub mod context;
pub mod core_model;
pub mod error;
pub mod field;
pub mod ids;
pub mod logging;
pub mod plan;
pub mod plugin;
pub mod registry;
pub mod request;
mod resolver;
pub mod runtime_config;
pub mod signature;
pub mod types;
pub mod validator_cache;

pub use bind::{BindConfig, BoundHandler, RawCall};
pub use callable::{Arguments, Callable, HandlerClass, HandlerInstance, Resolved, ScopeExit, Scoped};
pub use context::Context;
pub use core_model::{ApiStatus, CoreModel, ResponseModel};
pub use error::{BindError, ConfigurationError, ValidationError, ValidationIssue, ValueNotFoundError};
pub use field::{Field, FieldBuilder, FieldKind};
pub use ids::RequestId;
pub use plugin::{AsyncPlugin, Invocation, Plugin, PluginEntry};
pub use registry::{Registry, RegistryDefaults};
pub use request::{Mapping, RequestAdapter, SimpleRequest};
pub use runtime_config::RuntimeConfig;
pub use signature::Signature;
pub use types::{Model, ParamType};
