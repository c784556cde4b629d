use half::{bf16, f16};

use crate::dtype::{DType, Element};
use crate::shape::Shape;

/* ========================= TensorDescriptor ========================= */

/// What the tiler needs to know about a tensor: how many elements and
/// how wide each one is. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDescriptor {
    shape: Shape,
    elem_size: usize,
    dtype: Option<DType>,
}

impl TensorDescriptor {
    pub fn new(shape: Shape, dtype: DType) -> Self {
        Self {
            shape,
            elem_size: dtype.size_bytes(),
            dtype: Some(dtype),
        }
    }

    /// Flat descriptor with no numeric kind attached. `elem_size` is not
    /// validated here; the tiler rejects zero.
    pub fn from_raw(element_count: usize, elem_size: usize) -> Self {
        Self {
            shape: Shape::vector(element_count),
            elem_size,
            dtype: None,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn element_count(&self) -> usize {
        self.shape.size()
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub fn dtype(&self) -> Option<DType> {
        self.dtype
    }

    pub fn byte_size(&self) -> usize {
        self.element_count() * self.elem_size
    }
}

/* ========================= Tensor ========================= */

/// Host-side dense tensor living in shared memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    data: Vec<T>,
    shape: Shape,
}

impl<T: Element> Tensor<T> {
    pub fn new(data: Vec<T>, shape: Shape) -> Self {
        assert_eq!(data.len(), shape.size(), "Tensor::new: data length does not match shape");
        Self { data, shape }
    }

    pub fn from_vec(data: Vec<T>) -> Self {
        let shape = Shape::vector(data.len());
        Self { data, shape }
    }

    pub fn filled(shape: Shape, value: T) -> Self {
        Self {
            data: vec![value; shape.size()],
            shape,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn descriptor(&self) -> TensorDescriptor {
        TensorDescriptor::new(self.shape.clone(), T::DTYPE)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

/* ========================= AnyTensor ========================= */

/// A tensor whose numeric kind is only known at run time.
///
/// Matching on this once picks the monomorphized kernel for the whole
/// dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyTensor {
    F16(Tensor<f16>),
    BF16(Tensor<bf16>),
    F32(Tensor<f32>),
    F64(Tensor<f64>),
    I8(Tensor<i8>),
    I16(Tensor<i16>),
    I32(Tensor<i32>),
    I64(Tensor<i64>),
    U8(Tensor<u8>),
    U16(Tensor<u16>),
    U32(Tensor<u32>),
    U64(Tensor<u64>),
}

/// Run `$body` with `$t` bound to the typed tensor inside `$any`, and
/// rewrap a `Result<Tensor<_>>` into the same variant after `wrap`.
#[macro_export]
macro_rules! dispatch_any {
    ($any:expr, $t:ident => wrap $body:expr) => {
        match $any {
            $crate::tensor::AnyTensor::F16($t) => $body.map($crate::tensor::AnyTensor::F16),
            $crate::tensor::AnyTensor::BF16($t) => $body.map($crate::tensor::AnyTensor::BF16),
            $crate::tensor::AnyTensor::F32($t) => $body.map($crate::tensor::AnyTensor::F32),
            $crate::tensor::AnyTensor::F64($t) => $body.map($crate::tensor::AnyTensor::F64),
            $crate::tensor::AnyTensor::I8($t) => $body.map($crate::tensor::AnyTensor::I8),
            $crate::tensor::AnyTensor::I16($t) => $body.map($crate::tensor::AnyTensor::I16),
            $crate::tensor::AnyTensor::I32($t) => $body.map($crate::tensor::AnyTensor::I32),
            $crate::tensor::AnyTensor::I64($t) => $body.map($crate::tensor::AnyTensor::I64),
            $crate::tensor::AnyTensor::U8($t) => $body.map($crate::tensor::AnyTensor::U8),
            $crate::tensor::AnyTensor::U16($t) => $body.map($crate::tensor::AnyTensor::U16),
            $crate::tensor::AnyTensor::U32($t) => $body.map($crate::tensor::AnyTensor::U32),
            $crate::tensor::AnyTensor::U64($t) => $body.map($crate::tensor::AnyTensor::U64),
        }
    };
    ($any:expr, $t:ident => $body:expr) => {
        match $any {
            $crate::tensor::AnyTensor::F16($t) => $body,
            $crate::tensor::AnyTensor::BF16($t) => $body,
            $crate::tensor::AnyTensor::F32($t) => $body,
            $crate::tensor::AnyTensor::F64($t) => $body,
            $crate::tensor::AnyTensor::I8($t) => $body,
            $crate::tensor::AnyTensor::I16($t) => $body,
            $crate::tensor::AnyTensor::I32($t) => $body,
            $crate::tensor::AnyTensor::I64($t) => $body,
            $crate::tensor::AnyTensor::U8($t) => $body,
            $crate::tensor::AnyTensor::U16($t) => $body,
            $crate::tensor::AnyTensor::U32($t) => $body,
            $crate::tensor::AnyTensor::U64($t) => $body,
        }
    };
}

impl AnyTensor {
    pub fn dtype(&self) -> DType {
        dispatch_any!(self, t => tensor_dtype(t))
    }

    pub fn descriptor(&self) -> TensorDescriptor {
        dispatch_any!(self, t => t.descriptor())
    }

    pub fn shape(&self) -> &Shape {
        dispatch_any!(self, t => t.shape())
    }
}

fn tensor_dtype<T: Element>(_: &Tensor<T>) -> DType {
    T::DTYPE
}

macro_rules! impl_from_tensor {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Tensor<$t>> for AnyTensor {
                fn from(t: Tensor<$t>) -> Self {
                    AnyTensor::$variant(t)
                }
            }
        )*
    };
}

impl_from_tensor!(
    f16 => F16,
    bf16 => BF16,
    f32 => F32,
    f64 => F64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
);

/* ========================= Tests ========================= */
