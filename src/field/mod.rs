//! # Field Module
//!
//! Field descriptors: typed markers that say where and how one parameter's
//! value is obtained from an incoming request.
//!
//! ## Overview
//!
//! Every parameter of a handler or dependency (other than the request object and
//! the handler instance) carries a [`Field`]. The field names the request source
//! ([`FieldKind`]), the key to read, the default behaviour when the key is
//! absent, and the validation constraints applied to the value.
//!
//! ```rust
//! use brrtbind::field::Field;
//! use serde_json::json;
//!
//! let page = Field::query().default(json!(1)).ge(1).build().unwrap();
//! let token = Field::header().alias("X-Token").build().unwrap();
//! # let _ = (page, token);
//! ```
//!
//! ## Missing Values
//!
//! [`Field::request_value_handle`] never substitutes `null` for an absent value.
//! It returns [`Lookup::Missing`] unless a default or default factory applies;
//! the resolver turns `Missing` into a value-not-found error, or into the
//! field's custom not-found error when one is declared.
//!
//! ## Constraints
//!
//! Constraints are JSON Schema keywords merged into the schema of the declared
//! type. They are compiled once, when the plan is built.

mod core;

pub use self::core::*;
