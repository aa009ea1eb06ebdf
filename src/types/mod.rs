// Invoker Type Model
// Tags, directions and the read-only descriptor contract the engine consumes

mod descriptor;
mod tag;

pub use descriptor::{ArgDesc, CallableInfo, InterfaceRef, Signature, TypeDesc, TypeInfo};
pub use tag::{Direction, InterfaceKind, TypeTag};
