//! Expression sublanguage: lexer, parser, and pure tree evaluator
//!
//! Expressions appear in two places: embedded in strings as `${ ... }`
//! template holes (see [`crate::interpolate`]), and as the full payload of
//! `condition`, `cases[].when`, `split.paths[]`, and the `while_loop`
//! condition. The language is deliberately bounded: no user-defined
//! functions, no assignment, no recursion.

mod eval;
mod parser;
mod token;

pub use eval::{evaluate, evaluate_str, truthy, value_to_string, Bindings, NameResolver, NoBindings};
pub use parser::{number_value, parse, BinaryOp, Expr, UnaryOp};
pub use token::{tokenize, Token};
