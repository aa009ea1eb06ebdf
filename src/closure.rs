// Closure Factory
//
// Synthesizes native function pointers that forward every inbound call to a
// Rust handler. The trampoline, its call interface and the boxed handler with
// its context live exactly as long as the `NativeClosure` that owns them.

use crate::abi::{native_type_of_type, NativeType};
use crate::invoke::CallInterface;
use crate::types::{CallableInfo, TypeInfo};
use crate::value::{store_return, zero_return, Argument};
use libffi::low::ffi_cif;
use libffi::middle::Closure;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

type Handler<T> = Box<dyn Fn(&ffi_cif, &mut ReturnSlot<'_>, &ClosureArgs<'_>, &T)>;

struct ClosureData<T> {
    handler: Handler<T>,
    context: T,
    returns: NativeType,
    n_args: usize,
}

// ==================== Handler Views ====================

/// Inbound arguments of one trampoline call
pub struct ClosureArgs<'a> {
    args: *const *const c_void,
    len: usize,
    _marker: PhantomData<&'a c_void>,
}

impl<'a> ClosureArgs<'a> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of argument `index`
    pub fn raw(&self, index: usize) -> Option<*const c_void> {
        if index >= self.len {
            return None;
        }
        // SAFETY: libffi passes one value pointer per declared argument
        Some(unsafe { *self.args.add(index) })
    }

    /// # Safety
    /// Argument `index` must have native type `V`.
    pub unsafe fn read<V: Copy>(&self, index: usize) -> Option<V> {
        self.raw(index)
            .map(|src| ptr::read_unaligned(src as *const V))
    }

    /// Typed value of argument `index`, interpreted as `ty`
    ///
    /// # Safety
    /// `ty` must describe the argument the trampoline was created for.
    pub unsafe fn argument<T: TypeInfo + ?Sized>(&self, index: usize, ty: &T) -> Option<Argument> {
        self.raw(index).map(|src| Argument::read(src, ty))
    }
}

/// The return buffer of one trampoline call
pub struct ReturnSlot<'a> {
    dst: *mut c_void,
    native: NativeType,
    _marker: PhantomData<&'a mut c_void>,
}

impl<'a> ReturnSlot<'a> {
    pub fn native_type(&self) -> NativeType {
        self.native
    }

    /// Store the handler's result; narrow integers are widened to the full
    /// return word
    pub fn set(&mut self, value: Argument) {
        // SAFETY: `dst` is the libffi return buffer for `native`
        unsafe { store_return(self.dst, self.native, value) }
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.dst
    }

    fn clear(&mut self) {
        // SAFETY: as in `set`
        unsafe { zero_return(self.dst, self.native) }
    }
}

// ==================== Trampoline ====================

unsafe extern "C" fn trampoline_entry<T: 'static>(
    cif: &ffi_cif,
    result: &mut c_void,
    args: *const *const c_void,
    data: &ClosureData<T>,
) {
    let args = ClosureArgs {
        args,
        len: data.n_args,
        _marker: PhantomData,
    };
    let mut slot = ReturnSlot {
        dst: result as *mut c_void,
        native: data.returns,
        _marker: PhantomData,
    };
    slot.clear();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        (data.handler)(cif, &mut slot, &args, &data.context)
    }));
    if outcome.is_err() {
        tracing::error!(args = data.n_args, "closure handler panicked, returning zero");
        slot.clear();
    }
}

// ==================== Native Closure ====================

/// An executable trampoline that calls a Rust handler.
///
/// Dropping it (or calling `destroy`) frees the trampoline, its call interface
/// and the handler. Native code must not call `code_ptr()` afterwards.
pub struct NativeClosure<T: 'static> {
    closure: Option<Closure<'static>>,
    data: *mut ClosureData<T>,
    code: *const c_void,
}

impl<T: 'static> NativeClosure<T> {
    /// Native address of the trampoline
    pub fn code_ptr(&self) -> *const c_void {
        self.code
    }

    pub fn context(&self) -> &T {
        // SAFETY: `data` is live until drop
        unsafe { &(*self.data).context }
    }

    pub fn n_args(&self) -> usize {
        // SAFETY: as above
        unsafe { (*self.data).n_args }
    }

    pub fn destroy(self) {
        drop(self);
    }
}

impl<T: 'static> Drop for NativeClosure<T> {
    fn drop(&mut self) {
        // the trampoline goes first, it still references `data`
        self.closure.take();
        if !self.data.is_null() {
            // SAFETY: created by `Box::into_raw` in `create_closure`, freed once
            unsafe { drop(Box::from_raw(self.data)) };
            self.data = ptr::null_mut();
        }
        tracing::debug!(code = ?self.code, "destroyed closure");
    }
}

impl<T: 'static> fmt::Debug for NativeClosure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeClosure")
            .field("code", &self.code)
            .field("n_args", &self.n_args())
            .finish()
    }
}

/// Create a trampoline for `callable` that forwards every call to `handler`
/// with `context`. Callables that can throw get no error slot: callbacks
/// report failures through their own arguments.
///
/// Panics if libffi cannot allocate the trampoline or prepare its interface.
pub fn create_closure<C, T, F>(callable: &C, handler: F, context: T) -> NativeClosure<T>
where
    C: CallableInfo + ?Sized,
    T: 'static,
    F: Fn(&ffi_cif, &mut ReturnSlot<'_>, &ClosureArgs<'_>, &T) + 'static,
{
    let interface = CallInterface::for_callable(callable, false);
    let data = Box::into_raw(Box::new(ClosureData {
        handler: Box::new(handler) as Handler<T>,
        context,
        returns: native_type_of_type(callable.return_type()),
        n_args: interface.n_args(),
    }));

    // SAFETY: `data` outlives the closure, see `Drop`
    let closure = Closure::new(interface.into_cif(), trampoline_entry::<T>, unsafe { &*data });
    let code = *closure.code_ptr() as *const c_void;
    tracing::debug!(?code, "created closure");

    NativeClosure {
        closure: Some(closure),
        data,
        code,
    }
}

pub fn destroy_closure<T: 'static>(closure: NativeClosure<T>) {
    closure.destroy();
}
