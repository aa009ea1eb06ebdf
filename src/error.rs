// Invoker Error Handling Module
// Typed failures for layout, marshaling, invocation, closures and loading

use crate::types::Direction;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which value pool an argument-count error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuePool {
    In,
    Out,
}

impl fmt::Display for ValuePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValuePool::In => write!(f, "in"),
            ValuePool::Out => write!(f, "out"),
        }
    }
}

/// What the marshaler was filling when a pool ran dry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handling {
    Instance,
    Argument(Direction),
}

impl fmt::Display for Handling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handling::Instance => write!(f, "this"),
            Handling::Argument(direction) => write!(f, "{}", direction),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("recursion encountered when computing the size of {name} (via {path})")]
    Recursive { name: String, path: String },

    #[error("layout of {name} failed earlier")]
    PreviouslyFailed { name: String },

    #[error("can't resolve type '{interface}' for {who}")]
    UnresolvedInterface { interface: String, who: String },

    #[error("{who} has void type")]
    VoidField { who: String },

    #[error("{who} is not a pointer and is of type {tag}")]
    UnsizedByValue { who: String, tag: &'static str },

    #[error("{who} is an array without a fixed size")]
    UnsizedArray { who: String },

    #[error("size of {who} overflows the address space")]
    Overflow { who: String },

    #[error("{name} is not an aggregate")]
    NotAnAggregate { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    #[error("too few \"{pool}\" arguments (handling {handling} at position {position})")]
    TooFew {
        pool: ValuePool,
        handling: Handling,
        position: usize,
    },

    #[error("too many \"{pool}\" arguments: {supplied} supplied, {consumed} consumed")]
    TooMany {
        pool: ValuePool,
        supplied: usize,
        consumed: usize,
    },

    #[error("out storage at position {position} is a null pointer")]
    NullOutStorage { position: usize },
}

/// An error a native callee reported through its trailing error slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub domain: u32,
    pub code: i32,
    pub message: String,
    /// Address of the callee-owned error record; freeing it is up to the caller
    pub address: usize,
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "native error (domain {}, code {}): {}",
            self.domain, self.code, self.message
        )
    }
}

impl std::error::Error for NativeError {}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    Raised(NativeError),

    #[error("call frame has {frame} slots but the prepared call interface expects {cif}")]
    FrameMismatch { frame: usize, cif: usize },

    #[error("no function named '{0}' is registered")]
    UnknownFunction(String),

    #[error(transparent)]
    Library(#[from] LibraryError),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("'{0}' is already registered")]
    Duplicate(String),

    #[error("no interface named '{0}'")]
    UnknownInterface(String),

    #[error("field {aggregate}.{field} has neither a type nor a callback marker")]
    MissingFieldType { aggregate: String, field: String },

    #[error("invalid namespace document: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("failed to load library '{path}': {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("could not locate {symbol}: {reason}")]
    SymbolNotFound { symbol: String, reason: String },

    #[error("symbol name '{0}' contains an interior nul byte")]
    InvalidSymbol(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("unsupported storage type for pointer-stuffing: {0}")]
    UnsupportedStuffing(&'static str),
}

/// Umbrella error for callers that mix several stages with `?`
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Value(#[from] ValueError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_few_message_names_pool_and_role() {
        let err = MarshalError::TooFew {
            pool: ValuePool::In,
            handling: Handling::Argument(Direction::InOut),
            position: 2,
        };
        assert_eq!(
            err.to_string(),
            "too few \"in\" arguments (handling inout at position 2)"
        );
    }

    #[test]
    fn test_instance_handling_message() {
        let err = MarshalError::TooFew {
            pool: ValuePool::In,
            handling: Handling::Instance,
            position: 0,
        };
        assert!(err.to_string().contains("handling this"));
    }

    #[test]
    fn test_umbrella_conversion() {
        fn fails() -> Result<()> {
            Err(LayoutError::VoidField {
                who: "field Demo.Point.x".to_string(),
            })?;
            Ok(())
        }
        assert!(matches!(fails(), Err(Error::Layout(_))));
    }
}
