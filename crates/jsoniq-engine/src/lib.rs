pub mod ast;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod io;
pub mod item;
pub mod mode;
pub mod name;
pub mod parser;
pub mod types;

pub use ast::{Clause, ClauseKind, Expr, ExprKind, Module};
pub use compiler::{CompiledQuery, LibraryModules, compile, compile_module};
pub use config::{RuntimeConfiguration, RuntimeConfigurationBuilder};
pub use engine::{BoxedIterator, Collection, FunctionItem, Runtime, RuntimeIterator, Table, build_iterator};
pub use error::{Error, ErrorCode, Result, SourceLocation};
pub use evaluator::{QueryResult, compile_query, compile_query_with, evaluate_compiled, evaluate_expr, evaluate_query, explain};
pub use io::{FileReader, LocalFileReader, MemoryFileReader, resolve_uri};
pub use item::Item;
pub use mode::ExecutionMode;
pub use name::{FunctionIdentifier, Name};
pub use parser::{parse_expression, parse_module};
pub use types::{Arity, ItemType, SequenceType};
