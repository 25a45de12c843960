//! The sift scripting language.
//!
//! A script is a list of indented lines transforming one value, the
//! *stream*, which starts out as the input text:
//!
//! - `split(",")`: replace the stream with an expression's result
//! - `name << expr`: store a local without touching the stream
//! - `map` / `filter` / `sortBy` / `sumBy` / `pivot` / `do`: run the indented
//!   block once per element and fold the results back
//! - `pre :: map :: post`: choose what to fan out over, then post-process
//! - `function name(params)`: define a function from the indented block
//!
//! # Quick start
//!
//! ```rust
//! use sift::script::{parse_script, Interpreter, Stream};
//!
//! let program = parse_script("split(\",\")\nmap\n  toUpper()").unwrap();
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! let result = rt
//!     .block_on(Interpreter::new().process(Stream::from("a,b"), &program))
//!     .unwrap();
//! assert_eq!(result.output.to_string(), r#"["A","B"]"#);
//! ```

pub mod builtins;
pub mod expr;
pub mod interp;
pub mod lexer;
pub mod stmt;
pub mod symbols;
pub mod value;

// Re-exports for convenience.
pub use builtins::{Host, NoHost};
pub use expr::EvalContext;
pub use interp::{Interpreter, ProcessResult, RunGeneration};
pub use stmt::{parse_script, Program};
pub use value::{Stream, StreamMap};
