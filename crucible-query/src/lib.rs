//! Query lexer, parser, and expression evaluator for the notes search
//! engine: turns a raw query string into a typed [`ast::Expression`]
//! tree (`lexer`/`parser`), walks it against a [`crucible_core::GraphCache`]
//! (`evaluator`), and ranks the resulting notes (`search`).

pub mod ast;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod noteset;
pub mod parser;
pub mod search;

pub use ast::{Expression, FulltextOp, Op, OrderByClause, Value};
pub use context::{DebugReport, SearchContext};
pub use error::{ParseError, QueryResult, SearchError};
pub use evaluator::evaluate;
pub use noteset::NoteSet;
pub use parser::parse;
pub use search::{search, Highlight, SearchResult};
