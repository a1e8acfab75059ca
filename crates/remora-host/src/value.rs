//! Typed host-side argument and return values.
//!
//! The marshaller is strict: a value must match its parameter's exact
//! width and signedness, so conversions happen in the caller's hands, not
//! silently on the wire. Arrays carry their element type and shape and are
//! synced back from device memory after the call.

use remora_toolchain::signature::ScalarType;

/// Array element types the frame can describe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
}

impl ElemType {
    /// Element width in bytes
    pub fn size(self) -> usize {
        match self {
            ElemType::I8 | ElemType::U8 => 1,
            ElemType::I16 | ElemType::U16 => 2,
            ElemType::I32 | ElemType::U32 | ElemType::F32 => 4,
        }
    }

    /// Display name, numpy-style
    pub fn name(self) -> &'static str {
        match self {
            ElemType::I8 => "int8",
            ElemType::U8 => "uint8",
            ElemType::I16 => "int16",
            ElemType::U16 => "uint16",
            ElemType::I32 => "int32",
            ElemType::U32 => "uint32",
            ElemType::F32 => "float32",
        }
    }

    /// The element type matching a declared scalar, if any.
    pub fn from_scalar(scalar: ScalarType) -> Option<Self> {
        match scalar {
            ScalarType::I8 => Some(ElemType::I8),
            ScalarType::U8 => Some(ElemType::U8),
            ScalarType::I16 => Some(ElemType::I16),
            ScalarType::U16 => Some(ElemType::U16),
            ScalarType::I32 => Some(ElemType::I32),
            ScalarType::U32 => Some(ElemType::U32),
            ScalarType::F32 => Some(ElemType::F32),
            _ => None,
        }
    }
}

/// An n-dimensional array with a flat little-endian byte buffer.
///
/// Shape `[]` is a 0-d array: a scalar in array clothing, packed as its
/// single element.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    data: Vec<u8>,
    shape: Vec<usize>,
    elem: ElemType,
}

impl NdArray {
    /// Build from raw little-endian bytes. Panics if the byte length does
    /// not equal the shape's element count times the element width; array
    /// construction is host-side programmer input, not wire input.
    pub fn from_bytes(data: Vec<u8>, shape: Vec<usize>, elem: ElemType) -> Self {
        let count: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            count * elem.size(),
            "array byte length does not match shape {:?} of {}",
            shape,
            elem.name()
        );
        Self { data, shape, elem }
    }

    pub fn from_f32(values: &[f32], shape: Vec<usize>) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(data, shape, ElemType::F32)
    }

    pub fn from_i32(values: &[i32], shape: Vec<usize>) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(data, shape, ElemType::I32)
    }

    pub fn from_i16(values: &[i16], shape: Vec<usize>) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(data, shape, ElemType::I16)
    }

    pub fn from_u8(values: &[u8], shape: Vec<usize>) -> Self {
        Self::from_bytes(values.to_vec(), shape, ElemType::U8)
    }

    /// A 0-d array holding one f32.
    pub fn scalar_f32(value: f32) -> Self {
        Self::from_bytes(value.to_le_bytes().to_vec(), vec![], ElemType::F32)
    }

    pub fn elem(&self) -> ElemType {
        self.elem
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat byte view (little-endian element order).
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Total byte length.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Overwrite the backing storage from device bytes, preserving shape
    /// and element type. Length must match.
    pub(crate) fn overwrite(&mut self, bytes: &[u8]) {
        debug_assert_eq!(bytes.len(), self.data.len());
        self.data.copy_from_slice(bytes);
    }

    /// Elements decoded as f32 (valid only for float32 arrays).
    pub fn as_f32(&self) -> Vec<f32> {
        assert_eq!(self.elem, ElemType::F32);
        self.data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Elements decoded as i32 (valid only for int32 arrays).
    pub fn as_i32(&self) -> Vec<i32> {
        assert_eq!(self.elem, ElemType::I32);
        self.data
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Elements decoded as i16 (valid only for int16 arrays).
    pub fn as_i16(&self) -> Vec<i16> {
        assert_eq!(self.elem, ElemType::I16);
        self.data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }
}

/// A typed argument value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    Array(NdArray),
}

impl Value {
    /// Display name for error messages
    pub fn type_name(&self) -> String {
        match self {
            Value::I8(_) => "int8".to_owned(),
            Value::U8(_) => "uint8".to_owned(),
            Value::I16(_) => "int16".to_owned(),
            Value::U16(_) => "uint16".to_owned(),
            Value::I32(_) => "int32".to_owned(),
            Value::U32(_) => "uint32".to_owned(),
            Value::F32(_) => "float32".to_owned(),
            Value::Array(a) => format!("{} array {:?}", a.elem().name(), a.shape()),
        }
    }
}

/// A typed return value read from the last frame slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReturnValue {
    /// void return
    Void,
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    /// Pointer return: a device address
    Ptr(u32),
}

impl ReturnValue {
    /// Decode the raw slot word against a declared return type.
    pub fn decode(raw: u32, return_type_pointer: bool, scalar: Option<ScalarType>) -> Self {
        if return_type_pointer {
            return ReturnValue::Ptr(raw);
        }
        match scalar {
            None | Some(ScalarType::Void) => ReturnValue::Void,
            Some(ScalarType::I8) => ReturnValue::I8(raw as u8 as i8),
            Some(ScalarType::U8) => ReturnValue::U8(raw as u8),
            Some(ScalarType::I16) => ReturnValue::I16(raw as u16 as i16),
            Some(ScalarType::U16) => ReturnValue::U16(raw as u16),
            Some(ScalarType::I32) => ReturnValue::I32(raw as i32),
            Some(ScalarType::U32) => ReturnValue::U32(raw),
            // The wrapper stores floats (and truncated doubles) by bit
            // pattern.
            Some(ScalarType::F32) | Some(ScalarType::F64) => {
                ReturnValue::F32(f32::from_bits(raw))
            }
            // 64-bit integers are rejected at parse time.
            Some(ScalarType::I64) | Some(ScalarType::U64) => ReturnValue::U32(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndarray_roundtrip_f32() {
        let array = NdArray::from_f32(&[1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        assert_eq!(array.byte_len(), 16);
        assert_eq!(array.shape(), &[2, 2]);
        assert_eq!(array.as_f32(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_zero_d_array_is_one_element() {
        let scalar = NdArray::scalar_f32(2.5);
        assert!(scalar.shape().is_empty());
        assert_eq!(scalar.byte_len(), 4);
        assert_eq!(scalar.as_f32(), vec![2.5]);
    }

    #[test]
    #[should_panic(expected = "does not match shape")]
    fn test_shape_mismatch_panics() {
        NdArray::from_bytes(vec![0; 7], vec![2], ElemType::I32);
    }

    #[test]
    fn test_overwrite_preserves_shape() {
        let mut array = NdArray::from_i16(&[1, 2, 3], vec![3]);
        array.overwrite(&[5, 0, 6, 0, 7, 0]);
        assert_eq!(array.as_i16(), vec![5, 6, 7]);
        assert_eq!(array.shape(), &[3]);
    }

    #[test]
    fn test_return_decode_narrow_signed() {
        // Bottom byte 0xFB = -5 as int8; upper bytes are slot residue.
        let decoded = ReturnValue::decode(0xFFFF_FFFB, false, Some(ScalarType::I8));
        assert_eq!(decoded, ReturnValue::I8(-5));

        let decoded = ReturnValue::decode(0x0000_FFFB, false, Some(ScalarType::U16));
        assert_eq!(decoded, ReturnValue::U16(0xFFFB));
    }

    #[test]
    fn test_return_decode_float_bit_pattern() {
        let decoded = ReturnValue::decode(2.5f32.to_bits(), false, Some(ScalarType::F32));
        assert_eq!(decoded, ReturnValue::F32(2.5));
    }

    #[test]
    fn test_return_decode_pointer_and_void() {
        assert_eq!(
            ReturnValue::decode(0x4800_0010, true, None),
            ReturnValue::Ptr(0x4800_0010)
        );
        assert_eq!(
            ReturnValue::decode(7, false, Some(ScalarType::Void)),
            ReturnValue::Void
        );
    }
}
