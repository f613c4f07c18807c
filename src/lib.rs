//! In-process evaluation of SLisp fragments.
//!
//! A fragment is wrapped into a throwaway type, compiled by a front-end,
//! loaded into a per-call scope and run:
//!
//! ```
//! use slisp_eval::{evaluate_source, Value};
//!
//! assert_eq!(evaluate_source("(+ 1 2)").unwrap(), Value::Int(3));
//! ```
pub mod artifact;
pub mod ast;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod fragment;
pub mod frontend;
pub mod invoker;
pub mod ir;
pub mod loader;
pub mod pipeline;
pub mod runtime;

pub use config::EvalOptions;
pub use error::{ErrorKind, EvalError, Position, Result};
pub use evaluator::{evaluate, evaluate_source, Evaluator};
pub use fragment::Bindings;
pub use frontend::slisp::SlispFrontEnd;
pub use frontend::FrontEnd;
pub use invoker::Evaluation;
pub use loader::LoadingScope;
pub use runtime::Value;
