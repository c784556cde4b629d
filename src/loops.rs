/// Number of full tiles and the size of the tail tile for one core.
///
/// When the share divides evenly the last full tile is relabeled as the
/// tail, so `tail_elems == tile_elems` and the tile count is
/// `full_tile_loops`. Otherwise the tail is one extra, shorter tile.
/// An empty share performs no iterations.
pub fn plan_loops(core_elems: usize, tile_elems: usize) -> (usize, usize) {
    if core_elems == 0 {
        return (0, 0);
    }
    if tile_elems == 0 {
        return (0, core_elems);
    }

    let full_tile_loops = core_elems / tile_elems;
    let tail_elems = match core_elems % tile_elems {
        0 => tile_elems,
        rem => rem,
    };
    (full_tile_loops, tail_elems)
}

/// Sub-tiling of one core's share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TilePlan {
    pub tile_elems: usize,
    pub full_tile_loops: usize,
    pub tail_elems: usize,
}

impl TilePlan {
    pub fn new(core_elems: usize, tile_elems: usize) -> Self {
        let (full_tile_loops, tail_elems) = plan_loops(core_elems, tile_elems);
        Self {
            tile_elems,
            full_tile_loops,
            tail_elems,
        }
    }

    /// True when the final full tile doubles as the tail tile.
    pub fn tail_relabeled(&self) -> bool {
        self.tail_elems != 0 && self.tail_elems == self.tile_elems
    }

    pub fn iterations(&self) -> usize {
        if self.tail_elems == 0 {
            0
        } else if self.tail_relabeled() {
            self.full_tile_loops
        } else {
            self.full_tile_loops + 1
        }
    }

    /// Elements moved by iteration `i`; only the final one uses the tail.
    pub fn tile_len(&self, i: usize) -> usize {
        if i + 1 == self.iterations() {
            self.tail_elems
        } else {
            self.tile_elems
        }
    }

    /// Offset of iteration `i` relative to the core's first element.
    pub fn tile_offset(&self, i: usize) -> usize {
        i * self.tile_elems
    }

    /// Elements covered by all iterations together.
    pub fn covered(&self) -> usize {
        match self.iterations() {
            0 => 0,
            n => (n - 1) * self.tile_elems + self.tail_elems,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn even_split_relabels_tail() {
        let t = TilePlan::new(128, 128);

        assert_eq!((t.full_tile_loops, t.tail_elems), (1, 128));
        assert!(t.tail_relabeled());
        assert_eq!(t.iterations(), 1);
        assert_eq!(t.tile_len(0), 128);
    }

    #[test]
    fn uneven_split_adds_short_tail() {
        let t = TilePlan::new(1000, 256);

        assert_eq!((t.full_tile_loops, t.tail_elems), (3, 232));
        assert_eq!(t.iterations(), 4);
        assert_eq!(t.tile_len(2), 256);
        assert_eq!(t.tile_len(3), 232);
        assert_eq!(t.tile_offset(3), 768);
    }

    #[test]
    fn empty_share_does_nothing() {
        assert_eq!(plan_loops(0, 256), (0, 0));
        assert_eq!(TilePlan::new(0, 256).iterations(), 0);
    }

    #[test]
    fn tile_larger_than_share_is_one_tail() {
        let t = TilePlan::new(5, 8);
        assert_eq!((t.full_tile_loops, t.tail_elems), (0, 5));
        assert_eq!(t.iterations(), 1);
        assert_eq!(t.tile_len(0), 5);
    }

    proptest! {
        #[test]
        fn loops_cover_share_exactly(core in 0usize..1_000_000, tile in 1usize..4096) {
            let t = TilePlan::new(core, tile);

            if t.tail_elems != t.tile_elems {
                prop_assert_eq!(t.full_tile_loops * tile + t.tail_elems, core);
            } else {
                prop_assert_eq!((t.full_tile_loops - 1) * tile + t.tail_elems, core);
            }
            prop_assert_eq!(t.covered(), core);
            prop_assert_eq!((0..t.iterations()).map(|i| t.tile_len(i)).sum::<usize>(), core);
        }
    }
}
