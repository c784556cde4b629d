pub mod error;
pub mod dtype;
pub mod shape;
pub mod tensor;
pub mod platform;
pub mod runtime;

pub mod align;
pub mod partition;
pub mod scratch;
pub mod loops;
pub mod plan;
pub mod tiler;

pub mod sync;
pub mod copy;
pub mod pipeline;
pub mod merge;
pub mod launch;
pub mod ops;

pub use error::{Result, TilingError};
