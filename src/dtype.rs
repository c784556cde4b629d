use core::fmt;

use half::{bf16, f16};
use serde::Deserialize;

/// Closed set of numeric kinds a kernel can be registered for.
///
/// The kind is resolved once, when a kernel is picked for a tensor; the
/// per-element code below that point is monomorphized over [`Element`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F16,
    BF16,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl DType {
    pub const ALL: [DType; 12] = [
        DType::F16,
        DType::BF16,
        DType::F32,
        DType::F64,
        DType::I8,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::U8,
        DType::U16,
        DType::U32,
        DType::U64,
    ];

    pub const fn size_bytes(self) -> usize {
        match self {
            DType::I8 | DType::U8 => 1,
            DType::F16 | DType::BF16 | DType::I16 | DType::U16 => 2,
            DType::F32 | DType::I32 | DType::U32 => 4,
            DType::F64 | DType::I64 | DType::U64 => 8,
        }
    }

    /// Alignment granularity in elements for a given copy block size.
    pub fn block_elems(self, block_bytes: usize) -> usize {
        crate::align::block_elems(block_bytes, self.size_bytes())
    }

    pub const fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    /// Stable numeric id used in the flat plan header.
    pub const fn id(self) -> u64 {
        match self {
            DType::F16 => 1,
            DType::BF16 => 2,
            DType::F32 => 3,
            DType::F64 => 4,
            DType::I8 => 5,
            DType::I16 => 6,
            DType::I32 => 7,
            DType::I64 => 8,
            DType::U8 => 9,
            DType::U16 => 10,
            DType::U32 => 11,
            DType::U64 => 12,
        }
    }

    pub fn from_id(id: u64) -> Option<DType> {
        DType::ALL.into_iter().find(|d| d.id() == id)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::U32 => "u32",
            DType::U64 => "u64",
        };
        f.write_str(name)
    }
}

/* ============================================================
   Element trait
   ============================================================ */

/// A scalar the pipeline can move and the merge buffer can combine.
///
/// Every element fits in one 64-bit merge slot: `from_slot_bits` must
/// invert `to_slot_bits` exactly.
pub trait Element: Copy + PartialOrd + Default + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    fn to_slot_bits(self) -> u64;
    fn from_slot_bits(bits: u64) -> Self;

    /// Additive identity.
    fn zero() -> Self {
        Self::default()
    }

    /// Identity of `max` (−∞ for floats).
    fn lowest() -> Self;

    /// Identity of `min` (+∞ for floats).
    fn highest() -> Self;

    /// Addition used by sum reductions; wraps for integers.
    fn accumulate(self, rhs: Self) -> Self;
}

macro_rules! impl_float_element {
    ($t:ty, $dtype:ident, $bits:ty) => {
        impl Element for $t {
            const DTYPE: DType = DType::$dtype;

            #[inline(always)]
            fn to_slot_bits(self) -> u64 {
                self.to_bits() as u64
            }

            #[inline(always)]
            fn from_slot_bits(bits: u64) -> Self {
                <$t>::from_bits(bits as $bits)
            }

            fn lowest() -> Self {
                <$t>::NEG_INFINITY
            }

            fn highest() -> Self {
                <$t>::INFINITY
            }

            #[inline(always)]
            fn accumulate(self, rhs: Self) -> Self {
                self + rhs
            }
        }
    };
}

macro_rules! impl_int_element {
    ($t:ty, $dtype:ident) => {
        impl Element for $t {
            const DTYPE: DType = DType::$dtype;

            // sign-extends; the truncating cast back restores the value
            #[inline(always)]
            fn to_slot_bits(self) -> u64 {
                self as u64
            }

            #[inline(always)]
            fn from_slot_bits(bits: u64) -> Self {
                bits as $t
            }

            fn lowest() -> Self {
                <$t>::MIN
            }

            fn highest() -> Self {
                <$t>::MAX
            }

            #[inline(always)]
            fn accumulate(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }
        }
    };
}

impl_float_element!(f16, F16, u16);
impl_float_element!(bf16, BF16, u16);
impl_float_element!(f32, F32, u32);
impl_float_element!(f64, F64, u64);

impl_int_element!(i8, I8);
impl_int_element!(i16, I16);
impl_int_element!(i32, I32);
impl_int_element!(i64, I64);
impl_int_element!(u8, U8);
impl_int_element!(u16, U16);
impl_int_element!(u32, U32);
impl_int_element!(u64, U64);
