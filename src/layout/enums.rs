// Enum storage-width inference
//
// C lets a compiler store an enumeration in any integer type that holds all
// of its values. Which one it picks is a compiler convention, so the rule is
// an explicit choice (`EnumRule`) rather than something probed at build time.

use crate::abi::NativeType;
use crate::types::TypeTag;
use serde::{Deserialize, Serialize};

/// Compiler convention for the integer type backing a plain `enum`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnumRule {
    /// GCC and Clang defaults: at least `int`, unsigned when no value is negative
    Gnu,
    /// `-fshort-enums` (ARM EABI): narrowest fitting type, unsigned when no value is negative
    GnuShortEnums,
    /// MSVC: at least `int`, signed whenever the values fit
    Msvc,
}

impl EnumRule {
    pub fn host() -> Self {
        if cfg!(target_env = "msvc") {
            EnumRule::Msvc
        } else {
            EnumRule::Gnu
        }
    }

    pub fn short_enums(self) -> bool {
        matches!(self, EnumRule::GnuShortEnums)
    }

    /// Signedness picked when both the signed and unsigned type would fit
    pub fn prefers_unsigned(self) -> bool {
        matches!(self, EnumRule::Gnu | EnumRule::GnuShortEnums)
    }
}

impl Default for EnumRule {
    fn default() -> Self {
        Self::host()
    }
}

/// Enumeration or flags type with its lazily inferred storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDesc {
    pub name: String,
    #[serde(default)]
    pub is_flags: bool,
    pub values: Vec<EnumValue>,
    /// `Void` until inferred
    #[serde(skip, default = "unresolved_storage")]
    storage_type: TypeTag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub name: String,
    pub value: i64,
}

fn unresolved_storage() -> TypeTag {
    TypeTag::Void
}

impl EnumDesc {
    pub fn new(name: impl Into<String>, values: &[(&str, i64)]) -> Self {
        Self {
            name: name.into(),
            is_flags: false,
            values: values
                .iter()
                .map(|(name, value)| EnumValue {
                    name: (*name).to_string(),
                    value: *value,
                })
                .collect(),
            storage_type: TypeTag::Void,
        }
    }

    pub fn flags(name: impl Into<String>, values: &[(&str, i64)]) -> Self {
        let mut desc = Self::new(name, values);
        desc.is_flags = true;
        desc
    }

    /// Storage tag, if it has been inferred already
    pub fn storage_type(&self) -> Option<TypeTag> {
        (self.storage_type != TypeTag::Void).then_some(self.storage_type)
    }

    /// Infer and cache the storage tag. Later calls return the cached tag.
    pub fn resolve_storage(&mut self, rule: EnumRule) -> TypeTag {
        if self.storage_type != TypeTag::Void {
            return self.storage_type;
        }
        let values: Vec<i64> = self.values.iter().map(|v| v.value).collect();
        self.storage_type = infer_storage(&values, rule);
        tracing::debug!(
            enumeration = %self.name,
            storage = %self.storage_type,
            ?rule,
            "inferred enum storage"
        );
        self.storage_type
    }

    /// Size and alignment of a by-value field of this enumeration
    pub fn size_alignment(&mut self, rule: EnumRule) -> (usize, usize) {
        let native = storage_native_type(self.resolve_storage(rule));
        (native.size(), native.alignment())
    }
}

fn storage_native_type(storage: TypeTag) -> NativeType {
    match storage {
        TypeTag::Int8 | TypeTag::UInt8 => NativeType::U8,
        TypeTag::Int16 | TypeTag::UInt16 => NativeType::U16,
        TypeTag::Int64 | TypeTag::UInt64 => NativeType::U64,
        _ => NativeType::U32,
    }
}

/// Storage tag a compiler following `rule` picks for an enumeration
/// holding `values`.
pub fn infer_storage(values: &[i64], rule: EnumRule) -> TypeTag {
    let min = values.iter().copied().min().unwrap_or(0).min(0);
    let max = values.iter().copied().max().unwrap_or(0).max(0);

    // negative ranges stay signed and never exceed int, even when they
    // do not fit it
    if min < 0 {
        let natural = if min >= i8::MIN as i64 && max <= i8::MAX as i64 {
            8
        } else if min >= i16::MIN as i64 && max <= i16::MAX as i64 {
            16
        } else {
            32
        };
        let width = if rule.short_enums() { natural } else { 32 };
        return int_tag(width, true);
    }

    if max > u32::MAX as i64 {
        return TypeTag::Int64;
    }

    let natural = if max <= u8::MAX as i64 {
        8
    } else if max <= u16::MAX as i64 {
        16
    } else {
        32
    };
    let width = if rule.short_enums() { natural } else { 32 };
    let fits_signed = max <= signed_max(width);
    let signed = fits_signed && !rule.prefers_unsigned();
    int_tag(width, signed)
}

fn signed_max(width: u32) -> i64 {
    match width {
        8 => i8::MAX as i64,
        16 => i16::MAX as i64,
        _ => i32::MAX as i64,
    }
}

fn int_tag(width: u32, signed: bool) -> TypeTag {
    match (width, signed) {
        (8, true) => TypeTag::Int8,
        (8, false) => TypeTag::UInt8,
        (16, true) => TypeTag::Int16,
        (16, false) => TypeTag::UInt16,
        (32, true) => TypeTag::Int32,
        (32, false) => TypeTag::UInt32,
        (_, true) => TypeTag::Int64,
        (_, false) => TypeTag::UInt64,
    }
}
