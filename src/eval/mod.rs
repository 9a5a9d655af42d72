//! COMPUTED-expression evaluation
//!
//! Evaluation resolves identifiers through a [`ValueResolver`] context object
//! threaded down the recursion, never through shared callback state, so
//! concurrent evaluations against different resolvers are safe by
//! construction. The change-detection walk ([`is_changed`]) shares the parse
//! tree but queries only whether dependencies changed, without computing
//! values, except for guard conditions which must be evaluated to decide
//! whether the guarded subtree participates at all.

mod cache;
mod changed;
mod context;
mod engine;

pub use cache::ExpressionCache;
pub use changed::is_changed;
pub use context::{ChangeProbe, ValueResolver};
pub use engine::{eval, eval_bool, eval_uint};
pub(crate) use engine::{parse_date, parse_uint, truthy};
