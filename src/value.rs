// Value representations
//
// `Argument` is the typed value callers hand in and get back. `RawArgument`
// and `ReturnStorage` are the C unions values take while crossing the native
// boundary; nothing else is ever passed to libffi.

use crate::abi::{native_type_of_type, NativeType};
use crate::error::{NativeError, ValueError};
use crate::types::{TypeInfo, TypeTag};
use std::ffi::{c_char, c_int, c_void, CStr};
use std::fmt;
use std::ptr;

// ==================== Typed Values ====================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Argument {
    #[default]
    Void,
    Boolean(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    TypeHandle(usize),
    Unichar(u32),
    Pointer(*mut c_void),
}

impl Argument {
    pub fn null() -> Self {
        Argument::Pointer(ptr::null_mut())
    }

    /// Address of `target` as a pointer argument
    pub fn address_of<T>(target: &mut T) -> Self {
        Argument::Pointer(target as *mut T as *mut c_void)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Argument::Void)
    }

    /// Integer view of the value, sign-extended from signed variants
    pub fn as_i64(&self) -> i64 {
        match *self {
            Argument::Void => 0,
            Argument::Boolean(v) => v as i64,
            Argument::Int8(v) => v as i64,
            Argument::UInt8(v) => v as i64,
            Argument::Int16(v) => v as i64,
            Argument::UInt16(v) => v as i64,
            Argument::Int32(v) => v as i64,
            Argument::UInt32(v) => v as i64,
            Argument::Int64(v) => v,
            Argument::UInt64(v) => v as i64,
            Argument::Float(v) => v as i64,
            Argument::Double(v) => v as i64,
            Argument::TypeHandle(v) => v as i64,
            Argument::Unichar(v) => v as i64,
            Argument::Pointer(p) => p as usize as i64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Argument::Float(v) => v as f64,
            Argument::Double(v) => v,
            Argument::UInt64(v) => v as f64,
            ref other => other.as_i64() as f64,
        }
    }

    pub fn as_pointer(&self) -> *mut c_void {
        match *self {
            Argument::Pointer(p) => p,
            ref other => other.as_i64() as usize as *mut c_void,
        }
    }

    /// Store the value in a raw slot of the given native type, converting
    /// between integer widths the way a C cast would
    pub fn to_raw(&self, native: NativeType) -> RawArgument {
        let mut raw = RawArgument::zeroed();
        let bits = self.as_i64();
        match native {
            NativeType::Void => {}
            NativeType::I8 => raw.v_int8 = bits as i8,
            NativeType::U8 => raw.v_uint8 = bits as u8,
            NativeType::I16 => raw.v_int16 = bits as i16,
            NativeType::U16 => raw.v_uint16 = bits as u16,
            NativeType::I32 => raw.v_int32 = bits as i32,
            NativeType::U32 => raw.v_uint32 = bits as u32,
            NativeType::I64 => raw.v_int64 = bits,
            NativeType::U64 => raw.v_uint64 = bits as u64,
            NativeType::F32 => raw.v_float = self.as_f64() as f32,
            NativeType::F64 => raw.v_double = self.as_f64(),
            NativeType::Pointer => raw.v_pointer = self.as_pointer(),
        }
        raw
    }

    /// Read a value of type `ty` stored at `src` in its native representation.
    ///
    /// # Safety
    /// `src` must point to a readable, initialized value of `ty`'s native type.
    pub unsafe fn read<T: TypeInfo + ?Sized>(src: *const c_void, ty: &T) -> Argument {
        let native = native_type_of_type(ty);
        if native == NativeType::Pointer {
            return Argument::Pointer(ptr::read_unaligned(src as *const *mut c_void));
        }
        match ty.tag() {
            TypeTag::Void => Argument::Void,
            TypeTag::Boolean => Argument::Boolean(ptr::read_unaligned(src as *const u32) != 0),
            TypeTag::Int8 => Argument::Int8(ptr::read_unaligned(src as *const i8)),
            TypeTag::UInt8 => Argument::UInt8(ptr::read_unaligned(src as *const u8)),
            TypeTag::Int16 => Argument::Int16(ptr::read_unaligned(src as *const i16)),
            TypeTag::UInt16 => Argument::UInt16(ptr::read_unaligned(src as *const u16)),
            TypeTag::Int32 => Argument::Int32(ptr::read_unaligned(src as *const i32)),
            TypeTag::UInt32 => Argument::UInt32(ptr::read_unaligned(src as *const u32)),
            TypeTag::Int64 => Argument::Int64(ptr::read_unaligned(src as *const i64)),
            TypeTag::UInt64 => Argument::UInt64(ptr::read_unaligned(src as *const u64)),
            TypeTag::Float => Argument::Float(ptr::read_unaligned(src as *const f32)),
            TypeTag::Double => Argument::Double(ptr::read_unaligned(src as *const f64)),
            TypeTag::TypeHandle => Argument::TypeHandle(ptr::read_unaligned(src as *const usize)),
            TypeTag::Unichar => Argument::Unichar(ptr::read_unaligned(src as *const u32)),
            TypeTag::Interface if ty.is_enum_like() => {
                Argument::Int32(ptr::read_unaligned(src as *const i32))
            }
            _ => Argument::Pointer(ptr::read_unaligned(src as *const *mut c_void)),
        }
    }

    // ==================== Pointer Stuffing ====================

    /// Decode a value packed into a pointer-sized container slot
    pub fn from_stuffed_pointer(storage: TypeTag, ptr: *mut c_void) -> Result<Self, ValueError> {
        let word = ptr as usize;
        let value = match storage {
            TypeTag::Boolean => Argument::Boolean(word != 0),
            TypeTag::Int8 => Argument::Int8(word as i8),
            TypeTag::UInt8 => Argument::UInt8(word as u8),
            TypeTag::Int16 => Argument::Int16(word as i16),
            TypeTag::UInt16 => Argument::UInt16(word as u16),
            TypeTag::Int32 => Argument::Int32(word as i32),
            TypeTag::UInt32 => Argument::UInt32(word as u32),
            TypeTag::Unichar => Argument::Unichar(word as u32),
            TypeTag::TypeHandle => Argument::TypeHandle(word),
            TypeTag::Int64 | TypeTag::UInt64 | TypeTag::Float | TypeTag::Double => {
                return Err(ValueError::UnsupportedStuffing(storage.as_str()))
            }
            _ => Argument::Pointer(ptr),
        };
        Ok(value)
    }

    /// Pack the value into a pointer-sized container slot, as `GINT_TO_POINTER`
    /// style macros do: signed widths sign-extend, unsigned widths zero-extend
    pub fn to_stuffed_pointer(&self, storage: TypeTag) -> Result<*mut c_void, ValueError> {
        let bits = self.as_i64();
        let word = match storage {
            TypeTag::Boolean => (bits != 0) as usize,
            TypeTag::Int8 => bits as i8 as isize as usize,
            TypeTag::UInt8 => bits as u8 as usize,
            TypeTag::Int16 => bits as i16 as isize as usize,
            TypeTag::UInt16 => bits as u16 as usize,
            TypeTag::Int32 => bits as i32 as isize as usize,
            TypeTag::UInt32 | TypeTag::Unichar => bits as u32 as usize,
            TypeTag::TypeHandle => bits as usize,
            TypeTag::Int64 | TypeTag::UInt64 | TypeTag::Float | TypeTag::Double => {
                return Err(ValueError::UnsupportedStuffing(storage.as_str()))
            }
            _ => return Ok(self.as_pointer()),
        };
        Ok(word as *mut c_void)
    }
}

// ==================== Raw Unions ====================

/// One argument slot as the callee reads it
#[repr(C)]
#[derive(Clone, Copy)]
pub union RawArgument {
    pub v_int8: i8,
    pub v_uint8: u8,
    pub v_int16: i16,
    pub v_uint16: u16,
    pub v_int32: i32,
    pub v_uint32: u32,
    pub v_int64: i64,
    pub v_uint64: u64,
    pub v_float: f32,
    pub v_double: f64,
    pub v_size: usize,
    pub v_pointer: *mut c_void,
}

impl RawArgument {
    pub fn zeroed() -> Self {
        RawArgument { v_uint64: 0 }
    }

    pub fn pointer(p: *mut c_void) -> Self {
        let mut raw = Self::zeroed();
        raw.v_pointer = p;
        raw
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self as *mut RawArgument as *mut c_void
    }
}

impl Default for RawArgument {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for RawArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // every member lies inside the 8 bytes v_uint64 covers
        write!(f, "RawArgument({:#018x})", unsafe { self.v_uint64 })
    }
}

/// Return buffer handed to `ffi_call`. Integer returns narrower than a
/// register come back widened to the full word.
#[repr(C)]
#[derive(Clone, Copy)]
pub union ReturnStorage {
    pub v_word: usize,
    pub v_sword: isize,
    pub v_float: f32,
    pub v_double: f64,
    pub v_int64: i64,
    pub v_uint64: u64,
    pub v_pointer: *mut c_void,
}

impl ReturnStorage {
    pub fn zeroed() -> Self {
        ReturnStorage { v_uint64: 0 }
    }

    /// Member libffi should write a return of `tag` into
    pub fn slot_for(&mut self, tag: TypeTag) -> *mut c_void {
        // SAFETY: only takes member addresses, nothing is read
        unsafe {
            match tag {
                TypeTag::Float => ptr::addr_of_mut!(self.v_float) as *mut c_void,
                TypeTag::Double => ptr::addr_of_mut!(self.v_double) as *mut c_void,
                TypeTag::Int64 | TypeTag::UInt64 => {
                    ptr::addr_of_mut!(self.v_int64) as *mut c_void
                }
                _ => ptr::addr_of_mut!(self.v_word) as *mut c_void,
            }
        }
    }

    /// Typed return value for a call declared to return `ty`
    pub fn decode<T: TypeInfo + ?Sized>(&self, ty: &T) -> Argument {
        // SAFETY: the union is fully initialized by `zeroed` and every member
        // is plain data
        unsafe {
            if ty.is_pointer() {
                return Argument::Pointer(self.v_pointer);
            }
            match ty.tag() {
                TypeTag::Void => Argument::Void,
                TypeTag::Boolean => Argument::Boolean(self.v_word as u32 != 0),
                TypeTag::Int8 => Argument::Int8(self.v_sword as i8),
                TypeTag::UInt8 => Argument::UInt8(self.v_word as u8),
                TypeTag::Int16 => Argument::Int16(self.v_sword as i16),
                TypeTag::UInt16 => Argument::UInt16(self.v_word as u16),
                TypeTag::Int32 => Argument::Int32(self.v_sword as i32),
                TypeTag::UInt32 => Argument::UInt32(self.v_word as u32),
                TypeTag::Unichar => Argument::Unichar(self.v_word as u32),
                TypeTag::Int64 => Argument::Int64(self.v_int64),
                TypeTag::UInt64 => Argument::UInt64(self.v_uint64),
                TypeTag::Float => Argument::Float(self.v_float),
                TypeTag::Double => Argument::Double(self.v_double),
                TypeTag::TypeHandle => Argument::TypeHandle(self.v_word),
                TypeTag::Interface if ty.is_enum_like() => Argument::Int32(self.v_sword as i32),
                _ => Argument::Pointer(self.v_pointer),
            }
        }
    }

    /// Store `value` as a return of native type `native`
    pub fn store(&mut self, native: NativeType, value: Argument) {
        // SAFETY: `self` is at least as large as every member written
        unsafe { store_return(self as *mut ReturnStorage as *mut c_void, native, value) }
    }
}

impl Default for ReturnStorage {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for ReturnStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReturnStorage({:#018x})", unsafe { self.v_uint64 })
    }
}

/// Write `value` into a libffi return buffer as a return of type `native`.
/// Integers narrower than the register word are widened, signed ones by sign
/// extension.
///
/// # Safety
/// `dst` must be a writable libffi return buffer for a call returning `native`.
pub unsafe fn store_return(dst: *mut c_void, native: NativeType, value: Argument) {
    let bits = value.as_i64();
    match native {
        NativeType::Void => {}
        NativeType::I8 => ptr::write_unaligned(dst as *mut isize, bits as i8 as isize),
        NativeType::I16 => ptr::write_unaligned(dst as *mut isize, bits as i16 as isize),
        NativeType::I32 => ptr::write_unaligned(dst as *mut isize, bits as i32 as isize),
        NativeType::U8 => ptr::write_unaligned(dst as *mut usize, bits as u8 as usize),
        NativeType::U16 => ptr::write_unaligned(dst as *mut usize, bits as u16 as usize),
        NativeType::U32 => ptr::write_unaligned(dst as *mut usize, bits as u32 as usize),
        NativeType::I64 => ptr::write_unaligned(dst as *mut i64, bits),
        NativeType::U64 => ptr::write_unaligned(dst as *mut u64, bits as u64),
        NativeType::F32 => ptr::write_unaligned(dst as *mut f32, value.as_f64() as f32),
        NativeType::F64 => ptr::write_unaligned(dst as *mut f64, value.as_f64()),
        NativeType::Pointer => ptr::write_unaligned(dst as *mut *mut c_void, value.as_pointer()),
    }
}

/// Clear a return buffer of type `native`
///
/// # Safety
/// Same contract as `store_return`.
pub unsafe fn zero_return(dst: *mut c_void, native: NativeType) {
    if native != NativeType::Void {
        let len = native.size().max(std::mem::size_of::<usize>());
        ptr::write_bytes(dst as *mut u8, 0, len);
    }
}

// ==================== Native Errors ====================

/// Error record a throwing callee stores through its trailing error slot
#[repr(C)]
#[derive(Debug)]
pub struct RawNativeError {
    pub domain: u32,
    pub code: c_int,
    pub message: *mut c_char,
}

impl NativeError {
    /// Copy a callee-owned error record. The record itself is left alone.
    ///
    /// # Safety
    /// `raw` must be null or point to a valid `RawNativeError` whose message
    /// is null or a nul-terminated string.
    pub unsafe fn from_raw(raw: *const RawNativeError) -> Option<Self> {
        if raw.is_null() {
            return None;
        }
        let record = &*raw;
        let message = if record.message.is_null() {
            String::new()
        } else {
            CStr::from_ptr(record.message).to_string_lossy().into_owned()
        };
        Some(NativeError {
            domain: record.domain,
            code: record.code,
            message,
            address: raw as usize,
        })
    }
}
