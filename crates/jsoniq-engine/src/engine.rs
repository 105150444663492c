//! Runtime: iterators, dynamic contexts and the in-process stand-ins for
//! distributed collections.

pub mod builder;
pub(crate) mod calls;
pub mod context;
pub mod distributed;
pub(crate) mod expressions;
pub mod flwor;
pub mod function_item;
pub mod iterator;
pub mod runtime;

pub use builder::build_iterator;
pub use context::{DynamicContextId, DynamicContexts, VariableValue};
pub use distributed::{Collection, Table};
pub use function_item::{Closure, FunctionItem, FunctionSignature};
pub use iterator::{BoxedIterator, IteratorMeta, RuntimeIterator, materialize};
pub use runtime::{FunctionDefinition, FunctionRegistry, Runtime};
