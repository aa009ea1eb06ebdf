// Invoker
// Dynamic foreign-function invocation driven by type descriptions

pub mod abi;
pub mod closure;
pub mod config;
pub mod error;
pub mod invoke;
pub mod layout;
pub mod library;
pub mod marshal;
pub mod registry;
pub mod types;
pub mod value;

pub use abi::{representation_of, representation_of_type, NativeRepr, NativeType};
pub use closure::{create_closure, destroy_closure, ClosureArgs, NativeClosure, ReturnSlot};
pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use invoke::{invoke, invoke_callable, CallInterface, FunctionInvoker};
pub use layout::{infer_storage, AggregateLayout, EnumDesc, EnumRule, Member};
pub use library::NativeLibrary;
pub use marshal::{build_frame, CallFrame};
pub use registry::{FunctionDesc, InterfaceId, TypeRegistry};
pub use types::{Direction, InterfaceKind, Signature, TypeDesc, TypeTag};
pub use value::Argument;
