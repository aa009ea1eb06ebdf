// Argument Marshaler
// Turns caller values into the ordered slot array a native call consumes

use crate::abi::{native_type_of_type, NativeType};
use crate::error::{Handling, MarshalError, NativeError, ValuePool};
use crate::types::{CallableInfo, Direction};
use crate::value::{Argument, RawArgument, RawNativeError};
use smallvec::SmallVec;
use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::ptr;

pub type SlotTypes = SmallVec<[NativeType; 8]>;

/// Native slot types of a call: the instance pointer for methods, one slot per
/// declared argument, and the trailing error slot when `include_throws` is
/// set and the callable can throw
pub fn slot_types<C: CallableInfo + ?Sized>(callable: &C, include_throws: bool) -> SlotTypes {
    let mut types = SlotTypes::new();
    if callable.is_method() {
        types.push(NativeType::Pointer);
    }
    for i in 0..callable.n_args() {
        let (ty, direction) = callable.arg(i);
        types.push(match direction {
            Direction::In => native_type_of_type(ty),
            Direction::Out | Direction::InOut => NativeType::Pointer,
        });
    }
    if include_throws && callable.can_throw() {
        types.push(NativeType::Pointer);
    }
    types
}

/// Owned argument storage for one native call.
///
/// Every slot points into `storage` or at the error cell, both heap allocated,
/// so moving the frame never invalidates the slot pointers.
#[derive(Debug)]
pub struct CallFrame {
    storage: Box<[RawArgument]>,
    error: Box<UnsafeCell<*mut RawNativeError>>,
    slots: SmallVec<[*mut c_void; 8]>,
    slot_types: SlotTypes,
    has_error_slot: bool,
}

impl CallFrame {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot_types(&self) -> &[NativeType] {
        &self.slot_types
    }

    pub fn has_error_slot(&self) -> bool {
        self.has_error_slot
    }

    /// Value stored for slot `index`
    pub fn raw(&self, index: usize) -> Option<&RawArgument> {
        self.storage.get(index)
    }

    /// Argument array in the shape `ffi_call` expects
    pub fn slots_mut_ptr(&mut self) -> *mut *mut c_void {
        self.slots.as_mut_ptr()
    }

    /// Raw error record the callee stored, if any
    pub fn error_record(&self) -> *mut RawNativeError {
        // SAFETY: the cell is only written through the slot pointer during
        // the native call, never concurrently with this read
        unsafe { ptr::read_volatile(self.error.get()) }
    }

    /// Decoded error the callee reported through the trailing slot
    ///
    /// # Safety
    /// Only meaningful after the call; the callee must have stored either
    /// null or a valid error record.
    pub unsafe fn raised_error(&self) -> Option<NativeError> {
        if !self.has_error_slot {
            return None;
        }
        NativeError::from_raw(self.error_record())
    }
}

/// Build the call frame for `callable` from caller-supplied values.
///
/// `in_values` feed `in` and `inout` arguments (for methods, the instance
/// pointer first). `out_storage` holds caller-allocated locations, consumed
/// by `out` and `inout` arguments.
pub fn build_frame<C: CallableInfo + ?Sized>(
    callable: &C,
    in_values: &[Argument],
    out_storage: &[*mut c_void],
) -> Result<CallFrame, MarshalError> {
    let types = slot_types(callable, true);
    let mut raws: Vec<RawArgument> = Vec::with_capacity(types.len());
    let mut in_pos = 0usize;
    let mut out_pos = 0usize;

    if callable.is_method() {
        let instance = in_values.first().ok_or(MarshalError::TooFew {
            pool: ValuePool::In,
            handling: Handling::Instance,
            position: 0,
        })?;
        raws.push(RawArgument::pointer(instance.as_pointer()));
        in_pos = 1;
    }

    for i in 0..callable.n_args() {
        let (_, direction) = callable.arg(i);
        let native = types[raws.len()];
        let handling = Handling::Argument(direction);

        let in_value = if direction.takes_in() {
            let value = in_values.get(in_pos).ok_or(MarshalError::TooFew {
                pool: ValuePool::In,
                handling,
                position: i,
            })?;
            in_pos += 1;
            Some(value)
        } else {
            None
        };

        let out_location = if direction.takes_out() {
            let location = *out_storage.get(out_pos).ok_or(MarshalError::TooFew {
                pool: ValuePool::Out,
                handling,
                position: i,
            })?;
            out_pos += 1;
            Some(location)
        } else {
            None
        };

        let raw = match (direction, in_value, out_location) {
            (Direction::In, Some(value), _) => value.to_raw(native),
            (Direction::Out, _, Some(location)) => {
                if location.is_null() {
                    return Err(MarshalError::NullOutStorage { position: i });
                }
                RawArgument::pointer(location)
            }
            // inout passes the caller's in/out location from the in list
            (Direction::InOut, Some(value), _) => RawArgument::pointer(value.as_pointer()),
            _ => RawArgument::zeroed(),
        };
        raws.push(raw);
    }

    if in_pos < in_values.len() {
        return Err(MarshalError::TooMany {
            pool: ValuePool::In,
            supplied: in_values.len(),
            consumed: in_pos,
        });
    }
    if out_pos < out_storage.len() {
        return Err(MarshalError::TooMany {
            pool: ValuePool::Out,
            supplied: out_storage.len(),
            consumed: out_pos,
        });
    }

    let error: Box<UnsafeCell<*mut RawNativeError>> = Box::new(UnsafeCell::new(ptr::null_mut()));
    let has_error_slot = callable.can_throw();
    if has_error_slot {
        raws.push(RawArgument::pointer(error.get() as *mut c_void));
    }

    let mut storage = raws.into_boxed_slice();
    let slots = storage.iter_mut().map(RawArgument::as_mut_ptr).collect();

    Ok(CallFrame {
        storage,
        error,
        slots,
        slot_types: types,
        has_error_slot,
    })
}
