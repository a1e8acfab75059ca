//! Argument marshalling and the call sequence.
//!
//! One call, one marshaller: validate the values against the signature,
//! give every array argument a transient device region, pack the 128-byte
//! frame, execute, sync mutated arrays back into the host buffers, decode
//! the return slot, and free every transient region. The last step runs
//! even when an earlier one failed.

use crate::client::DeviceClient;
use crate::error::CallError;
use crate::value::{ElemType, NdArray, ReturnValue, Value};
use log::{debug, warn};
use remora_proto::caps;
use remora_proto::link::Link;
use remora_toolchain::artifact::FrameLayout;
use remora_toolchain::signature::{ParamKind, ScalarType, Signature};

/// Alignment used for transient array regions.
const ARRAY_ALIGNMENT: u32 = 16;

struct Tracked {
    arg_index: usize,
    address: u32,
    size: u32,
}

struct Marshaller<'c, L: Link> {
    client: &'c mut DeviceClient<L>,
    sync_arrays: bool,
    transients: Vec<u32>,
    tracked: Vec<Tracked>,
}

/// Marshal `args`, run the entry point, and post-process.
///
/// `args` is mutable because sync-back writes device-side array mutations
/// into the caller's buffers in place.
pub fn invoke<L: Link>(
    client: &mut DeviceClient<L>,
    signature: &Signature,
    frame: &FrameLayout,
    entry_address: u32,
    sync_arrays: bool,
    args: &mut [Value],
) -> Result<ReturnValue, CallError> {
    let mut marshaller = Marshaller {
        client,
        sync_arrays,
        transients: Vec::new(),
        tracked: Vec::new(),
    };
    let result = marshaller.run(signature, frame, entry_address, args);
    marshaller.cleanup();
    result
}

impl<'c, L: Link> Marshaller<'c, L> {
    fn run(
        &mut self,
        signature: &Signature,
        frame: &FrameLayout,
        entry_address: u32,
        args: &mut [Value],
    ) -> Result<ReturnValue, CallError> {
        if args.len() != signature.params.len() {
            return Err(CallError::ArgCount {
                expected: signature.params.len(),
                got: args.len(),
            });
        }

        // Pack each argument into its slot. Unused slots (including the
        // return slot) stay zero.
        let mut slots = vec![0u32; frame.slot_count];
        for (index, (param, value)) in signature.params.iter().zip(args.iter()).enumerate() {
            slots[index] = match param.kind() {
                ParamKind::Pointer => self.marshal_array(index, param, value)?,
                ParamKind::Value => marshal_scalar(index, param, value)?,
            };
        }

        let mut frame_bytes = Vec::with_capacity(frame.frame_bytes());
        for slot in &slots {
            frame_bytes.extend_from_slice(&slot.to_le_bytes());
        }
        self.client.write_memory(frame.args_address, &frame_bytes)?;

        debug!("executing entry at {:#010X}", entry_address);
        let wrapper_status = self.client.execute(entry_address)?;
        debug!("wrapper returned {}", wrapper_status);

        if self.sync_arrays {
            self.sync_back(args)?;
        }

        let raw = self.client.read_memory(frame.return_slot_address(), 4)?;
        let word = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        Ok(ReturnValue::decode(
            word,
            signature.return_type.pointer,
            signature.return_type.scalar,
        ))
    }

    /// Stage an array argument: transient region, upload, track for
    /// sync-back. Returns the slot word (the device address).
    fn marshal_array(
        &mut self,
        index: usize,
        param: &remora_toolchain::signature::Param,
        value: &Value,
    ) -> Result<u32, CallError> {
        let array = match value {
            Value::Array(array) => array,
            other => {
                return Err(CallError::ArgType {
                    index,
                    name: param.name.clone(),
                    expected: format!("{} array", param.ty.base),
                    got: other.type_name(),
                })
            }
        };

        // Element type must match the declared pointee; void* takes
        // anything, as do pointee types outside the table.
        if let Some(scalar) = param.ty.scalar {
            if let Some(expected) = ElemType::from_scalar(scalar) {
                if expected != array.elem() {
                    return Err(CallError::DtypeMismatch {
                        index,
                        name: param.name.clone(),
                        expected: expected.name().to_owned(),
                        got: array.elem().name().to_owned(),
                    });
                }
            }
        }

        let size = array.byte_len() as u32;
        let address = self
            .client
            .allocate(size, caps::DATA_CAPS, ARRAY_ALIGNMENT)?;
        self.transients.push(address);
        if size > 0 {
            self.client.write_memory(address, array.bytes())?;
        }
        if self.sync_arrays {
            self.tracked.push(Tracked {
                arg_index: index,
                address,
                size,
            });
        }
        debug!(
            "array argument {} staged at {:#010X} ({} bytes)",
            index, address, size
        );
        Ok(address)
    }

    /// Copy device-side array contents back into the host buffers.
    fn sync_back(&mut self, args: &mut [Value]) -> Result<(), CallError> {
        for tracked in &self.tracked {
            let bytes = self.client.read_memory(tracked.address, tracked.size)?;
            match &mut args[tracked.arg_index] {
                Value::Array(array) => array.overwrite(&bytes),
                _ => unreachable!("tracked argument is always an array"),
            }
        }
        Ok(())
    }

    /// Free every transient region, keeping going past failures.
    fn cleanup(&mut self) {
        for address in self.transients.drain(..) {
            if let Err(e) = self.client.free(address) {
                warn!("failed to free transient region {:#010X}: {}", address, e);
            }
        }
        self.tracked.clear();
    }
}

fn marshal_scalar(
    index: usize,
    param: &remora_toolchain::signature::Param,
    value: &Value,
) -> Result<u32, CallError> {
    let scalar = param
        .ty
        .scalar
        .expect("value parameters always have a resolved scalar type");

    // A 0-d array is a scalar in array clothing: unwrap its single
    // element and encode that.
    if let Value::Array(array) = value {
        if array.shape().is_empty() {
            let unwrapped = zero_d_scalar(array);
            return marshal_scalar(index, param, &unwrapped);
        }
    }

    encode_scalar(value, scalar).ok_or_else(|| CallError::ArgType {
        index,
        name: param.name.clone(),
        expected: scalar_name(scalar).to_owned(),
        got: value.type_name(),
    })
}

/// Encode a scalar into its slot word: widened to 32 bits per its
/// signedness, bottom-aligned; floats keep their bit pattern.
fn encode_scalar(value: &Value, scalar: ScalarType) -> Option<u32> {
    match (scalar, value) {
        (ScalarType::I8, Value::I8(v)) => Some(*v as i32 as u32),
        (ScalarType::U8, Value::U8(v)) => Some(u32::from(*v)),
        (ScalarType::I16, Value::I16(v)) => Some(*v as i32 as u32),
        (ScalarType::U16, Value::U16(v)) => Some(u32::from(*v)),
        (ScalarType::I32, Value::I32(v)) => Some(*v as u32),
        (ScalarType::U32, Value::U32(v)) => Some(*v),
        (ScalarType::F32, Value::F32(v)) => Some(v.to_bits()),
        _ => None,
    }
}

fn scalar_name(scalar: ScalarType) -> &'static str {
    match scalar {
        ScalarType::Void => "void",
        ScalarType::I8 => "int8",
        ScalarType::U8 => "uint8",
        ScalarType::I16 => "int16",
        ScalarType::U16 => "uint16",
        ScalarType::I32 => "int32",
        ScalarType::U32 => "uint32",
        ScalarType::I64 => "int64",
        ScalarType::U64 => "uint64",
        ScalarType::F32 => "float32",
        ScalarType::F64 => "float64",
    }
}

fn zero_d_scalar(array: &NdArray) -> Value {
    let bytes = array.bytes();
    match array.elem() {
        ElemType::I8 => Value::I8(bytes[0] as i8),
        ElemType::U8 => Value::U8(bytes[0]),
        ElemType::I16 => Value::I16(i16::from_le_bytes([bytes[0], bytes[1]])),
        ElemType::U16 => Value::U16(u16::from_le_bytes([bytes[0], bytes[1]])),
        ElemType::I32 => Value::I32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        ElemType::U32 => Value::U32(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        ElemType::F32 => Value::F32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
    }
}
