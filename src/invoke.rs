// Invocation Engine
// Prepares call interfaces and performs native calls through libffi

use crate::abi::{native_type_of_type, NativeType};
use crate::error::InvokeError;
use crate::library::NativeLibrary;
use crate::marshal::{build_frame, slot_types, CallFrame, SlotTypes};
use crate::registry::{FunctionDesc, TypeRegistry};
use crate::types::{CallableInfo, Signature, TypeInfo, TypeTag};
use crate::value::{Argument, ReturnStorage};
use libffi::middle::{Cif, CodePtr};
use libffi::raw;
use std::ffi::c_void;
use std::fmt;

// ==================== Call Interface ====================

/// A prepared libffi call interface. Owns its argument type array; both are
/// released when the interface is dropped.
pub struct CallInterface {
    cif: Cif,
    arg_types: SlotTypes,
    return_type: NativeType,
}

impl CallInterface {
    /// Panics if libffi rejects the signature, which only happens for
    /// malformed type lists (e.g. a `void` argument).
    pub fn new(arg_types: &[NativeType], return_type: NativeType) -> Self {
        let cif = Cif::new(
            arg_types.iter().map(|ty| ty.to_ffi_type()),
            return_type.to_ffi_type(),
        );
        Self {
            cif,
            arg_types: arg_types.iter().copied().collect(),
            return_type,
        }
    }

    /// Interface for `callable`, with or without its trailing error slot
    pub fn for_callable<C: CallableInfo + ?Sized>(callable: &C, include_throws: bool) -> Self {
        let args = slot_types(callable, include_throws);
        Self::new(&args, native_type_of_type(callable.return_type()))
    }

    pub fn n_args(&self) -> usize {
        self.arg_types.len()
    }

    pub fn arg_types(&self) -> &[NativeType] {
        &self.arg_types
    }

    pub fn return_type(&self) -> NativeType {
        self.return_type
    }

    pub(crate) fn into_cif(self) -> Cif {
        self.cif
    }

    /// Call `function` with an already marshaled frame
    ///
    /// # Safety
    /// `function` must be a native function matching this interface, and the
    /// frame must have been built for the same callable.
    pub unsafe fn call<T: TypeInfo + ?Sized>(
        &self,
        function: *const c_void,
        return_type: &T,
        frame: &mut CallFrame,
    ) -> Result<Argument, InvokeError> {
        if frame.len() != self.n_args() {
            return Err(InvokeError::FrameMismatch {
                frame: frame.len(),
                cif: self.n_args(),
            });
        }

        let mut ret = ReturnStorage::zeroed();
        let tag = if return_type.is_pointer() {
            TypeTag::Void
        } else {
            return_type.tag()
        };
        let rvalue = ret.slot_for(tag);
        let code = CodePtr::from_ptr(function);

        tracing::trace!(?function, slots = frame.len(), returns = ?self.return_type, "native call");
        raw::ffi_call(
            self.cif.as_raw_ptr(),
            Some(*code.as_fun()),
            rvalue,
            frame.slots_mut_ptr(),
        );

        if let Some(err) = frame.raised_error() {
            tracing::debug!(domain = err.domain, code = err.code, "callee raised an error");
            return Err(InvokeError::Raised(err));
        }
        Ok(ret.decode(return_type))
    }
}

impl fmt::Debug for CallInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallInterface")
            .field("arg_types", &self.arg_types)
            .field("return_type", &self.return_type)
            .finish()
    }
}

// ==================== One-shot Calls ====================

/// Call `function` with a frame built by `build_frame` for `callable`
///
/// # Safety
/// `function` must implement `callable`'s signature.
pub unsafe fn invoke<C: CallableInfo + ?Sized>(
    function: *const c_void,
    callable: &C,
    frame: &mut CallFrame,
) -> Result<Argument, InvokeError> {
    let cif = CallInterface::new(
        frame.slot_types(),
        native_type_of_type(callable.return_type()),
    );
    cif.call(function, callable.return_type(), frame)
}

/// Marshal and call in one step
///
/// # Safety
/// `function` must implement `callable`'s signature and every out location
/// must be valid for the callee to write.
pub unsafe fn invoke_callable<C: CallableInfo + ?Sized>(
    function: *const c_void,
    callable: &C,
    in_values: &[Argument],
    out_storage: &[*mut c_void],
) -> Result<Argument, InvokeError> {
    let mut frame = build_frame(callable, in_values, out_storage)?;
    invoke(function, callable, &mut frame)
}

// ==================== Function Invoker ====================

/// A native function with its call interface prepared once for repeated calls
#[derive(Debug)]
pub struct FunctionInvoker {
    name: String,
    address: *const c_void,
    signature: Signature,
    cif: CallInterface,
}

impl FunctionInvoker {
    pub fn new_for_address(name: &str, address: *const c_void, signature: Signature) -> Self {
        let cif = CallInterface::for_callable(&signature, true);
        tracing::debug!(
            function = name,
            ?address,
            args = cif.n_args(),
            "prepared invoker"
        );
        Self {
            name: name.to_string(),
            address,
            signature,
            cif,
        }
    }

    /// Resolve `function`'s symbol in `library` and prepare it
    pub fn prepare(function: &FunctionDesc, library: &NativeLibrary) -> Result<Self, InvokeError> {
        let address = library.symbol(function.symbol())?;
        Ok(Self::new_for_address(
            &function.name,
            address,
            function.signature.clone(),
        ))
    }

    /// Prepare a function registered under `name`
    pub fn from_registry(
        registry: &TypeRegistry,
        name: &str,
        library: &NativeLibrary,
    ) -> Result<Self, InvokeError> {
        let function = registry
            .function(name)
            .ok_or_else(|| InvokeError::UnknownFunction(name.to_string()))?;
        Self::prepare(function, library)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> *const c_void {
        self.address
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn call_interface(&self) -> &CallInterface {
        &self.cif
    }

    pub fn build_frame(
        &self,
        in_values: &[Argument],
        out_storage: &[*mut c_void],
    ) -> Result<CallFrame, InvokeError> {
        Ok(build_frame(&self.signature, in_values, out_storage)?)
    }

    /// Call with a frame built by `build_frame`
    ///
    /// # Safety
    /// The address must implement the signature this invoker was prepared
    /// with.
    pub unsafe fn call(&self, frame: &mut CallFrame) -> Result<Argument, InvokeError> {
        self.cif
            .call(self.address, self.signature.return_type(), frame)
    }

    /// # Safety
    /// Same contract as `call`; out locations must be writable by the callee.
    pub unsafe fn invoke(
        &self,
        in_values: &[Argument],
        out_storage: &[*mut c_void],
    ) -> Result<Argument, InvokeError> {
        let mut frame = self.build_frame(in_values, out_storage)?;
        self.call(&mut frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarshalError;
    use crate::types::{InterfaceKind, TypeDesc};
    use crate::value::RawNativeError;
    use pretty_assertions::assert_eq;
    use std::ffi::{c_char, c_int};

    extern "C" fn add_i32(a: i32, b: i32) -> i32 {
        a.wrapping_add(b)
    }

    extern "C" fn negate_u8(v: u8) -> u8 {
        !v
    }

    extern "C" fn half(v: f64) -> f64 {
        v / 2.0
    }

    extern "C" fn is_positive(v: i32) -> u32 {
        (v > 0) as u32
    }

    static DOMAIN_MESSAGE: &[u8] = b"bad input\0";

    extern "C" fn checked_div(a: i32, b: i32, error: *mut *mut RawNativeError) -> i32 {
        if b == 0 {
            let record = Box::new(RawNativeError {
                domain: 3,
                code: 22 as c_int,
                message: DOMAIN_MESSAGE.as_ptr() as *mut c_char,
            });
            unsafe { *error = Box::into_raw(record) };
            return -1;
        }
        a / b
    }

    fn int32() -> TypeDesc {
        TypeDesc::basic(TypeTag::Int32)
    }

    #[test]
    fn test_invoke_callable_adds() {
        let sig = Signature::new(int32()).arg_in("a", int32()).arg_in("b", int32());
        let result = unsafe {
            invoke_callable(
                add_i32 as *const c_void,
                &sig,
                &[Argument::Int32(40), Argument::Int32(2)],
                &[],
            )
        }
        .unwrap();
        assert_eq!(result, Argument::Int32(42));
    }

    #[test]
    fn test_narrow_and_float_returns() {
        let sig = Signature::new(TypeDesc::basic(TypeTag::UInt8))
            .arg_in("v", TypeDesc::basic(TypeTag::UInt8));
        let result =
            unsafe { invoke_callable(negate_u8 as *const c_void, &sig, &[Argument::UInt8(0x0f)], &[]) }
                .unwrap();
        assert_eq!(result, Argument::UInt8(0xf0));

        let double = TypeDesc::basic(TypeTag::Double);
        let sig = Signature::new(double.clone()).arg_in("v", double);
        let result =
            unsafe { invoke_callable(half as *const c_void, &sig, &[Argument::Double(5.0)], &[]) }
                .unwrap();
        assert_eq!(result, Argument::Double(2.5));
    }

    #[test]
    fn test_boolean_return() {
        let sig = Signature::new(TypeDesc::basic(TypeTag::Boolean)).arg_in("v", int32());
        let invoker = FunctionInvoker::new_for_address("is_positive", is_positive as *const c_void, sig);
        assert_eq!(
            unsafe { invoker.invoke(&[Argument::Int32(9)], &[]) }.unwrap(),
            Argument::Boolean(true)
        );
        assert_eq!(
            unsafe { invoker.invoke(&[Argument::Int32(-9)], &[]) }.unwrap(),
            Argument::Boolean(false)
        );
    }

    #[test]
    fn test_raised_error_discards_return() {
        let sig = Signature::new(int32())
            .arg_in("a", int32())
            .arg_in("b", int32())
            .throwing();
        let invoker = FunctionInvoker::new_for_address("checked_div", checked_div as *const c_void, sig);
        assert_eq!(invoker.call_interface().n_args(), 3);

        let ok = unsafe { invoker.invoke(&[Argument::Int32(9), Argument::Int32(3)], &[]) }.unwrap();
        assert_eq!(ok, Argument::Int32(3));

        let err = unsafe { invoker.invoke(&[Argument::Int32(1), Argument::Int32(0)], &[]) }
            .unwrap_err();
        match err {
            InvokeError::Raised(native) => {
                assert_eq!(native.domain, 3);
                assert_eq!(native.code, 22);
                assert_eq!(native.message, "bad input");
                drop(unsafe { Box::from_raw(native.address as *mut RawNativeError) });
            }
            other => panic!("expected raised error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_mismatch() {
        let two = Signature::new(int32()).arg_in("a", int32()).arg_in("b", int32());
        let one = Signature::new(int32()).arg_in("a", int32());
        let invoker = FunctionInvoker::new_for_address("add", add_i32 as *const c_void, two);
        let mut frame = build_frame(&one, &[Argument::Int32(1)], &[]).unwrap();
        let err = unsafe { invoker.call(&mut frame) }.unwrap_err();
        assert!(matches!(err, InvokeError::FrameMismatch { frame: 1, cif: 2 }));
    }

    #[test]
    fn test_marshal_errors_surface() {
        let sig = Signature::new(int32()).arg_in("a", int32());
        let invoker = FunctionInvoker::new_for_address("id", add_i32 as *const c_void, sig);
        let err = unsafe { invoker.invoke(&[], &[]) }.unwrap_err();
        assert!(matches!(err, InvokeError::Marshal(MarshalError::TooFew { .. })));
    }

    #[test]
    fn test_unknown_function() {
        let registry = TypeRegistry::default();
        let library = NativeLibrary::this_process().unwrap();
        let err = FunctionInvoker::from_registry(&registry, "nope", &library).unwrap_err();
        assert!(matches!(err, InvokeError::UnknownFunction(name) if name == "nope"));
    }

    #[test]
    fn test_call_interface_shapes() {
        let sig = Signature::new(TypeDesc::interface(InterfaceKind::Enum, "Color"))
            .arg_out("o", int32())
            .method()
            .throwing();
        let with = CallInterface::for_callable(&sig, true);
        let without = CallInterface::for_callable(&sig, false);
        assert_eq!(with.n_args(), 3);
        assert_eq!(without.n_args(), 2);
        assert_eq!(with.return_type(), NativeType::I32);
    }
}
