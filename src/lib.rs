#![allow(clippy::style)]
#![allow(clippy::complexity)]
#![allow(clippy::large_enum_variant)]
#![allow(clippy::mutable_key_type)]
#![allow(clippy::stable_sort_primitive)]
#![allow(clippy::map_entry)]
#![allow(clippy::box_default)]
#![warn(clippy::bool_comparison)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::no_effect)]
#![warn(clippy::unnecessary_unwrap)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::todo)]
#![warn(clippy::wildcard_dependencies)]
#![warn(clippy::zero_prefixed_literal)]
#![warn(clippy::borrowed_box)]
#![warn(clippy::deref_addrof)]
#![warn(clippy::double_must_use)]
#![warn(clippy::double_parens)]
#![warn(clippy::extra_unused_lifetimes)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_question_mark)]
#![warn(clippy::needless_return)]
#![warn(clippy::redundant_pattern)]
#![warn(clippy::redundant_slicing)]
#![warn(clippy::redundant_static_lifetimes)]
#![warn(clippy::single_component_path_imports)]
#![warn(clippy::unnecessary_cast)]
#![warn(clippy::useless_asref)]
#![warn(clippy::useless_conversion)]
#![warn(clippy::builtin_type_shadow)]
#![warn(clippy::duplicate_underscore_argument)]
#![warn(double_negations)]
#![warn(clippy::unnecessary_mut_passed)]
#![warn(clippy::wildcard_in_or_patterns)]
#![warn(clippy::crosspointer_transmute)]
#![warn(clippy::excessive_precision)]
#![warn(clippy::panicking_overflow_checks)]
#![warn(clippy::as_conversions)]
#![warn(clippy::match_overlapping_arm)]
#![warn(clippy::zero_divided_by_zero)]
#![warn(clippy::must_use_unit)]
#![warn(clippy::suspicious_assignment_formatting)]
#![warn(clippy::suspicious_else_formatting)]
#![warn(clippy::suspicious_unary_op_formatting)]
#![warn(clippy::mut_mutex_lock)]
#![warn(clippy::print_literal)]
#![warn(clippy::same_item_push)]
#![warn(clippy::useless_format)]
#![warn(clippy::write_literal)]
#![warn(clippy::redundant_closure)]
#![warn(clippy::redundant_closure_call)]
#![warn(clippy::unnecessary_lazy_evaluations)]
#![warn(clippy::partialeq_ne_impl)]
#![warn(clippy::redundant_field_names)]
#![warn(clippy::transmutes_expressible_as_ptr_casts)]
#![warn(clippy::unused_async)]
#![warn(clippy::disallowed_methods)]
#![warn(clippy::disallowed_macros)]
#![warn(clippy::disallowed_types)]
#![warn(clippy::from_over_into)]
//! Readiness awaiters for Kubernetes objects.
//!
//! After an object is created, updated or deleted, the functions in
//! [`awaiters`] block until the cluster has actually converged on it: a
//! Deployment's new ReplicaSet has rolled out, a Service has endpoints and
//! an address, a Job has completed, a deleted Namespace is gone. Progress
//! is narrated through a [`StatusSink`], and when a wait ends badly the
//! returned [`AwaitError`] carries the problems that were observed along
//! the way.
//!
//! ```no_run
//! # use kube::core::DynamicObject;
//! # use kube::Client;
//! # async fn foo(client: Client, object: DynamicObject) -> Result<(), kube_await::AwaitError> {
//! let config = kube_await::AwaitConfig::new(object);
//! kube_await::awaiters::creation(&client, &config).await?;
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod awaiters;
pub mod cluster;
mod config;
mod error;
pub mod kinds;
pub mod logging;
pub mod metadata;
pub mod ownership;
mod poll;
mod retry;
pub mod states;
pub mod watch;

pub use awaiters::Awaiter;
pub use config::AwaitConfig;
pub use error::{AwaitError, Diagnostics, RemovedApiError, Target};
pub use kinds::Gvk;
pub use logging::{Message, Messages, Severity, StatusSink};
