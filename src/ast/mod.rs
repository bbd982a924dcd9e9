//! Portable statement AST and its cache.
//!
//! ```text
//! SQL text
//!       ↓
//! Fingerprint             (hash.rs)
//!       ↓
//! AstCache hit? ──yes──→ CachedAst
//!       ↓ no
//! sqlparser → portable AST (parser.rs, types.rs)
//!       ↓
//! Validation              (validate.rs)
//!       ↓
//! Dialect SQL             (printer.rs)
//! ```
pub mod cache;
pub mod hash;
pub mod parser;
pub mod printer;
pub mod types;
pub mod validate;

pub use cache::{AstCache, CacheStats, CachedAst, ParsedStatement, DEFAULT_MAX_ENTRIES};
pub use hash::{Fingerprint, HashKeys};
pub use parser::{parse_expression, parse_statement};
pub use printer::print_statement;
pub use types::*;
pub use validate::FunctionWhitelist;
