/// Default copy-engine block size in bytes.
pub const BLOCK_BYTES: usize = 32;

/// Number of elements in one copy block. Never zero.
#[inline(always)]
pub fn block_elems(block_bytes: usize, elem_size: usize) -> usize {
    if elem_size == 0 {
        return 1;
    }
    (block_bytes / elem_size).max(1)
}

#[inline(always)]
pub fn ceil_div(x: usize, y: usize) -> usize {
    let y = y.max(1);
    x / y + usize::from(x % y != 0)
}

/// Round `x` up to a multiple of `block`. A zero block counts as 1.
#[inline(always)]
pub fn align_up(x: usize, block: usize) -> usize {
    let block = block.max(1);
    ceil_div(x, block) * block
}

/// Round `x` down to a multiple of `block`. A zero block counts as 1.
#[inline(always)]
pub fn align_down(x: usize, block: usize) -> usize {
    let block = block.max(1);
    x / block * block
}
