/// Copy `src` into the front of `dst` and fill the rest of `dst` with
/// `pad`.
///
/// `dst` is the block-aligned view of a scratch slot, so the copy engine
/// always moves whole blocks. Panics if `src` is longer than `dst`.
pub fn copy_in<T: Copy>(src: &[T], dst: &mut [T], pad: T) {
    assert!(
        src.len() <= dst.len(),
        "copy_in: {} elements do not fit a {}-element slot",
        src.len(),
        dst.len()
    );
    let (head, tail) = dst.split_at_mut(src.len());
    head.copy_from_slice(src);
    tail.fill(pad);
}

/// Copy exactly `dst.len()` elements from the front of `src`.
///
/// Padded lanes past the tile length stay in scratch.
pub fn copy_out<T: Copy>(src: &[T], dst: &mut [T]) {
    assert!(
        dst.len() <= src.len(),
        "copy_out: slot holds {} elements, {} requested",
        src.len(),
        dst.len()
    );
    dst.copy_from_slice(&src[..dst.len()]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_in_pads_to_slot() {
        let src = [1, 2, 3];
        let mut slot = [0; 8];
        copy_in(&src, &mut slot, -1);

        assert_eq!(slot, [1, 2, 3, -1, -1, -1, -1, -1]);
    }

    #[test]
    fn copy_in_exact_fit_writes_no_pad() {
        let src = [1.0f32, 2.0];
        let mut slot = [9.0f32; 2];
        copy_in(&src, &mut slot, f32::INFINITY);
        assert_eq!(slot, [1.0, 2.0]);
    }

    #[test]
    fn copy_out_drops_padding() {
        let slot = [5u8, 6, 7, 0, 0, 0, 0, 0];
        let mut gm = [1u8; 3];
        copy_out(&slot, &mut gm);
        assert_eq!(gm, [5, 6, 7]);
    }

    #[test]
    #[should_panic]
    fn copy_in_overflow_panics() {
        let mut slot = [0; 2];
        copy_in(&[1, 2, 3], &mut slot, 0);
    }
}
