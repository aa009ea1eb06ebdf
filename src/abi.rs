// ABI Type Mapper
// Maps described types onto the native representation the platform C ABI uses

use crate::types::{TypeInfo, TypeTag};
use libffi::middle::Type as FfiType;
use std::ffi::{c_uint, c_void};
use std::mem::{align_of, size_of};

// ==================== Native Types ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    Void,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Pointer,
}

/// Type handles are `size_t`-wide unsigned integers
#[cfg(target_pointer_width = "64")]
const TYPE_HANDLE: NativeType = NativeType::U64;
#[cfg(target_pointer_width = "32")]
const TYPE_HANDLE: NativeType = NativeType::U32;
#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("unexpected pointer width: type handles must be 32 or 64 bits");

impl NativeType {
    pub fn size(self) -> usize {
        match self {
            NativeType::Void => 0,
            NativeType::I8 => size_of::<i8>(),
            NativeType::U8 => size_of::<u8>(),
            NativeType::I16 => size_of::<i16>(),
            NativeType::U16 => size_of::<u16>(),
            NativeType::I32 => size_of::<i32>(),
            NativeType::U32 => size_of::<c_uint>(),
            NativeType::I64 => size_of::<i64>(),
            NativeType::U64 => size_of::<u64>(),
            NativeType::F32 => size_of::<f32>(),
            NativeType::F64 => size_of::<f64>(),
            NativeType::Pointer => size_of::<*const c_void>(),
        }
    }

    pub fn alignment(self) -> usize {
        match self {
            NativeType::Void => 1,
            NativeType::I8 => align_of::<i8>(),
            NativeType::U8 => align_of::<u8>(),
            NativeType::I16 => align_of::<i16>(),
            NativeType::U16 => align_of::<u16>(),
            NativeType::I32 => align_of::<i32>(),
            NativeType::U32 => align_of::<c_uint>(),
            NativeType::I64 => align_of::<i64>(),
            NativeType::U64 => align_of::<u64>(),
            NativeType::F32 => align_of::<f32>(),
            NativeType::F64 => align_of::<f64>(),
            NativeType::Pointer => align_of::<*const c_void>(),
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            NativeType::I8 | NativeType::I16 | NativeType::I32 | NativeType::I64
        )
    }

    pub fn to_ffi_type(self) -> FfiType {
        match self {
            NativeType::Void => FfiType::void(),
            NativeType::I8 => FfiType::i8(),
            NativeType::U8 => FfiType::u8(),
            NativeType::I16 => FfiType::i16(),
            NativeType::U16 => FfiType::u16(),
            NativeType::I32 => FfiType::i32(),
            NativeType::U32 => FfiType::u32(),
            NativeType::I64 => FfiType::i64(),
            NativeType::U64 => FfiType::u64(),
            NativeType::F32 => FfiType::f32(),
            NativeType::F64 => FfiType::f64(),
            NativeType::Pointer => FfiType::pointer(),
        }
    }

    pub fn repr(self) -> NativeRepr {
        NativeRepr {
            size: self.size(),
            alignment: self.alignment(),
            kind: self,
        }
    }
}

/// Size, alignment and register class of a value as the C ABI sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeRepr {
    pub size: usize,
    pub alignment: usize,
    pub kind: NativeType,
}

// ==================== Mapping ====================

/// Native type for a described type. Enums and flags passed by value are
/// C `int`s regardless of the storage width their values would need.
pub fn native_type_of(tag: TypeTag, is_pointer: bool, is_enum_like: bool) -> NativeType {
    if is_pointer {
        return NativeType::Pointer;
    }
    match tag {
        TypeTag::Void => NativeType::Void,
        TypeTag::Boolean => NativeType::U32,
        TypeTag::Int8 => NativeType::I8,
        TypeTag::UInt8 => NativeType::U8,
        TypeTag::Int16 => NativeType::I16,
        TypeTag::UInt16 => NativeType::U16,
        TypeTag::Int32 => NativeType::I32,
        TypeTag::UInt32 | TypeTag::Unichar => NativeType::U32,
        TypeTag::Int64 => NativeType::I64,
        TypeTag::UInt64 => NativeType::U64,
        TypeTag::TypeHandle => TYPE_HANDLE,
        TypeTag::Float => NativeType::F32,
        TypeTag::Double => NativeType::F64,
        TypeTag::String
        | TypeTag::Filename
        | TypeTag::Array
        | TypeTag::List
        | TypeTag::SList
        | TypeTag::HashTable
        | TypeTag::Error => NativeType::Pointer,
        TypeTag::Interface if is_enum_like => NativeType::I32,
        TypeTag::Interface => NativeType::Pointer,
    }
}

pub fn representation_of(tag: TypeTag, is_pointer: bool, is_enum_like: bool) -> NativeRepr {
    native_type_of(tag, is_pointer, is_enum_like).repr()
}

pub fn native_type_of_type<T: TypeInfo + ?Sized>(ty: &T) -> NativeType {
    native_type_of(ty.tag(), ty.is_pointer(), ty.is_enum_like())
}

pub fn representation_of_type<T: TypeInfo + ?Sized>(ty: &T) -> NativeRepr {
    native_type_of_type(ty).repr()
}
