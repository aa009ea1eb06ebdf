// Type Descriptor accessors
//
// The engine reads signatures only through `TypeInfo` and `CallableInfo`.
// `TypeDesc`/`Signature` are the in-memory descriptions the registry stores;
// any other description container can implement the two traits instead.

use super::tag::{Direction, InterfaceKind, TypeTag};
use serde::{Deserialize, Serialize};

/// Read-only view of one described type
pub trait TypeInfo {
    fn tag(&self) -> TypeTag;

    fn is_pointer(&self) -> bool;

    /// Kind of the referenced node, only meaningful for `TypeTag::Interface`
    fn interface_kind(&self) -> Option<InterfaceKind>;

    fn is_enum_like(&self) -> bool {
        self.tag() == TypeTag::Interface
            && self.interface_kind().is_some_and(InterfaceKind::is_enum_like)
    }
}

/// Read-only view of a function or callback signature
pub trait CallableInfo {
    type Type: TypeInfo;

    fn n_args(&self) -> usize;

    fn arg(&self, n: usize) -> (&Self::Type, Direction);

    fn return_type(&self) -> &Self::Type;

    fn is_method(&self) -> bool;

    fn can_throw(&self) -> bool;
}

/// Named reference from a type to an interface node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRef {
    pub name: String,
    pub kind: InterfaceKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TypeDescDoc")]
pub struct TypeDesc {
    pub tag: TypeTag,
    pub pointer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<InterfaceRef>,
    /// Element type for arrays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Box<TypeDesc>>,
    /// Element count of C fixed-size arrays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_size: Option<usize>,
}

/// `TypeDesc` as written in a namespace document; `pointer` defaults from
/// the tag
#[derive(Deserialize)]
struct TypeDescDoc {
    tag: TypeTag,
    #[serde(default)]
    pointer: Option<bool>,
    #[serde(default)]
    interface: Option<InterfaceRef>,
    #[serde(default)]
    element: Option<Box<TypeDesc>>,
    #[serde(default)]
    fixed_size: Option<usize>,
}

impl From<TypeDescDoc> for TypeDesc {
    fn from(doc: TypeDescDoc) -> Self {
        Self {
            tag: doc.tag,
            pointer: doc.pointer.unwrap_or_else(|| doc.tag.is_always_pointer()),
            interface: doc.interface,
            element: doc.element,
            fixed_size: doc.fixed_size,
        }
    }
}

impl TypeDesc {
    pub fn basic(tag: TypeTag) -> Self {
        Self {
            tag,
            pointer: tag.is_always_pointer(),
            interface: None,
            element: None,
            fixed_size: None,
        }
    }

    pub fn void() -> Self {
        Self::basic(TypeTag::Void)
    }

    /// `void *`
    pub fn opaque_pointer() -> Self {
        Self::basic(TypeTag::Void).by_pointer()
    }

    pub fn interface(kind: InterfaceKind, name: impl Into<String>) -> Self {
        Self {
            tag: TypeTag::Interface,
            pointer: false,
            interface: Some(InterfaceRef {
                name: name.into(),
                kind,
            }),
            element: None,
            fixed_size: None,
        }
    }

    /// An inline C array such as `int32_t values[4]`
    pub fn fixed_array(element: TypeDesc, len: usize) -> Self {
        Self {
            tag: TypeTag::Array,
            pointer: false,
            interface: None,
            element: Some(Box::new(element)),
            fixed_size: Some(len),
        }
    }

    /// A pointer-passed C array
    pub fn array_of(element: TypeDesc) -> Self {
        Self {
            tag: TypeTag::Array,
            pointer: true,
            interface: None,
            element: Some(Box::new(element)),
            fixed_size: None,
        }
    }

    pub fn by_pointer(mut self) -> Self {
        self.pointer = true;
        self
    }

    pub fn interface_name(&self) -> Option<&str> {
        self.interface.as_ref().map(|iface| iface.name.as_str())
    }
}

impl TypeInfo for TypeDesc {
    fn tag(&self) -> TypeTag {
        self.tag
    }

    fn is_pointer(&self) -> bool {
        self.pointer
    }

    fn interface_kind(&self) -> Option<InterfaceKind> {
        self.interface.as_ref().map(|iface| iface.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgDesc {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeDesc,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(rename = "returns", default = "TypeDesc::void")]
    pub return_type: TypeDesc,
    #[serde(default)]
    pub args: Vec<ArgDesc>,
    #[serde(default)]
    pub is_method: bool,
    #[serde(default)]
    pub throws: bool,
}

impl Signature {
    pub fn new(return_type: TypeDesc) -> Self {
        Self {
            return_type,
            args: Vec::new(),
            is_method: false,
            throws: false,
        }
    }

    pub fn with_arg(mut self, name: &str, ty: TypeDesc, direction: Direction) -> Self {
        self.args.push(ArgDesc {
            name: name.to_string(),
            ty,
            direction,
        });
        self
    }

    pub fn arg_in(self, name: &str, ty: TypeDesc) -> Self {
        self.with_arg(name, ty, Direction::In)
    }

    pub fn arg_out(self, name: &str, ty: TypeDesc) -> Self {
        self.with_arg(name, ty, Direction::Out)
    }

    pub fn arg_inout(self, name: &str, ty: TypeDesc) -> Self {
        self.with_arg(name, ty, Direction::InOut)
    }

    pub fn method(mut self) -> Self {
        self.is_method = true;
        self
    }

    pub fn throwing(mut self) -> Self {
        self.throws = true;
        self
    }
}

impl CallableInfo for Signature {
    type Type = TypeDesc;

    fn n_args(&self) -> usize {
        self.args.len()
    }

    fn arg(&self, n: usize) -> (&TypeDesc, Direction) {
        let arg = &self.args[n];
        (&arg.ty, arg.direction)
    }

    fn return_type(&self) -> &TypeDesc {
        &self.return_type
    }

    fn is_method(&self) -> bool {
        self.is_method
    }

    fn can_throw(&self) -> bool {
        self.throws
    }
}
