// Type tags, interface kinds and argument directions
// These mirror the numeric codes used by binary type descriptions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Primitive tag of a described type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Void,
    Boolean,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    #[serde(rename = "gtype")]
    TypeHandle,
    #[serde(rename = "utf8")]
    String,
    Filename,
    Array,
    Interface,
    #[serde(rename = "glist")]
    List,
    #[serde(rename = "gslist")]
    SList,
    #[serde(rename = "ghash")]
    HashTable,
    Error,
    Unichar,
}

impl TypeTag {
    /// Decode the numeric tag stored in a binary type description
    pub fn from_raw(code: u32) -> Option<Self> {
        let tag = match code {
            0 => TypeTag::Void,
            1 => TypeTag::Boolean,
            2 => TypeTag::Int8,
            3 => TypeTag::UInt8,
            4 => TypeTag::Int16,
            5 => TypeTag::UInt16,
            6 => TypeTag::Int32,
            7 => TypeTag::UInt32,
            8 => TypeTag::Int64,
            9 => TypeTag::UInt64,
            10 => TypeTag::Float,
            11 => TypeTag::Double,
            12 => TypeTag::TypeHandle,
            13 => TypeTag::String,
            14 => TypeTag::Filename,
            15 => TypeTag::Array,
            16 => TypeTag::Interface,
            17 => TypeTag::List,
            18 => TypeTag::SList,
            19 => TypeTag::HashTable,
            20 => TypeTag::Error,
            21 => TypeTag::Unichar,
            _ => return None,
        };
        Some(tag)
    }

    pub fn to_raw(self) -> u32 {
        self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Void => "void",
            TypeTag::Boolean => "boolean",
            TypeTag::Int8 => "int8",
            TypeTag::UInt8 => "uint8",
            TypeTag::Int16 => "int16",
            TypeTag::UInt16 => "uint16",
            TypeTag::Int32 => "int32",
            TypeTag::UInt32 => "uint32",
            TypeTag::Int64 => "int64",
            TypeTag::UInt64 => "uint64",
            TypeTag::Float => "float",
            TypeTag::Double => "double",
            TypeTag::TypeHandle => "gtype",
            TypeTag::String => "utf8",
            TypeTag::Filename => "filename",
            TypeTag::Array => "array",
            TypeTag::Interface => "interface",
            TypeTag::List => "glist",
            TypeTag::SList => "gslist",
            TypeTag::HashTable => "ghash",
            TypeTag::Error => "error",
            TypeTag::Unichar => "unichar",
        }
    }

    /// Tags that carry a value directly (no container, no interface)
    pub fn is_basic(self) -> bool {
        matches!(
            self,
            TypeTag::Void
                | TypeTag::Boolean
                | TypeTag::Int8
                | TypeTag::UInt8
                | TypeTag::Int16
                | TypeTag::UInt16
                | TypeTag::Int32
                | TypeTag::UInt32
                | TypeTag::Int64
                | TypeTag::UInt64
                | TypeTag::Float
                | TypeTag::Double
                | TypeTag::TypeHandle
                | TypeTag::String
                | TypeTag::Filename
                | TypeTag::Unichar
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            TypeTag::Int8
                | TypeTag::UInt8
                | TypeTag::Int16
                | TypeTag::UInt16
                | TypeTag::Int32
                | TypeTag::UInt32
                | TypeTag::Int64
                | TypeTag::UInt64
                | TypeTag::Float
                | TypeTag::Double
        )
    }

    pub fn is_container(self) -> bool {
        matches!(
            self,
            TypeTag::Array | TypeTag::List | TypeTag::SList | TypeTag::HashTable
        )
    }

    /// Tags that only ever appear behind a pointer
    pub fn is_always_pointer(self) -> bool {
        matches!(
            self,
            TypeTag::String
                | TypeTag::Filename
                | TypeTag::List
                | TypeTag::SList
                | TypeTag::HashTable
                | TypeTag::Error
        )
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of the node an `interface` tag points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Struct,
    Boxed,
    Union,
    Enum,
    Flags,
    Callback,
    Object,
    Interface,
}

impl InterfaceKind {
    /// Enums and flags travel by value as C `int`
    pub fn is_enum_like(self) -> bool {
        matches!(self, InterfaceKind::Enum | InterfaceKind::Flags)
    }

    /// Kinds whose members are laid out field by field
    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            InterfaceKind::Struct
                | InterfaceKind::Boxed
                | InterfaceKind::Union
                | InterfaceKind::Object
                | InterfaceKind::Interface
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InterfaceKind::Struct => "struct",
            InterfaceKind::Boxed => "boxed",
            InterfaceKind::Union => "union",
            InterfaceKind::Enum => "enum",
            InterfaceKind::Flags => "flags",
            InterfaceKind::Callback => "callback",
            InterfaceKind::Object => "object",
            InterfaceKind::Interface => "interface",
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a callable argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    In,
    Out,
    InOut,
}

impl Direction {
    /// Consumes a value from the caller's in list
    pub fn takes_in(self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    /// Consumes a slot from the caller's out storage
    pub fn takes_out(self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
            Direction::InOut => write!(f, "inout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_codes_round_trip() {
        for code in 0..=21 {
            let tag = TypeTag::from_raw(code).expect("code in range");
            assert_eq!(tag.to_raw(), code);
        }
        assert_eq!(TypeTag::from_raw(22), None);
        assert_eq!(TypeTag::from_raw(u32::MAX), None);
    }

    #[test]
    fn test_names_match_serde() {
        let json = serde_json::to_string(&TypeTag::TypeHandle).unwrap();
        assert_eq!(json, "\"gtype\"");
        let tag: TypeTag = serde_json::from_str("\"utf8\"").unwrap();
        assert_eq!(tag, TypeTag::String);
        let tag: TypeTag = serde_json::from_str("\"uint16\"").unwrap();
        assert_eq!(tag.as_str(), "uint16");
    }

    #[test]
    fn test_classification() {
        assert!(TypeTag::Double.is_numeric());
        assert!(!TypeTag::Boolean.is_numeric());
        assert!(TypeTag::Unichar.is_basic());
        assert!(!TypeTag::Interface.is_basic());
        assert!(TypeTag::HashTable.is_container());
        assert!(InterfaceKind::Flags.is_enum_like());
        assert!(!InterfaceKind::Callback.is_aggregate());
    }

    #[test]
    fn test_direction_pools() {
        assert!(Direction::InOut.takes_in() && Direction::InOut.takes_out());
        assert!(!Direction::Out.takes_in());
        assert!(!Direction::In.takes_out());
    }
}
