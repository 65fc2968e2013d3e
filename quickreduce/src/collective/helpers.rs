/// Split `count` units into `world` contiguous chunks of near-equal size.
///
/// The first `count % world` chunks get one extra unit. The collective splits
/// whole codec groups rather than elements, so every chunk starts on a group
/// boundary of the encoded buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkLayout {
    /// `world + 1` prefix offsets; chunk `i` is `offsets[i]..offsets[i + 1]`.
    pub offsets: Vec<usize>,
}

impl ChunkLayout {
    pub fn new(count: usize, world: usize) -> Self {
        let world = world.max(1);
        let base = count / world;
        let remainder = count % world;
        let mut offsets = Vec::with_capacity(world + 1);
        let mut off = 0;
        offsets.push(off);
        for i in 0..world {
            off += base + usize::from(i < remainder);
            offsets.push(off);
        }
        Self { offsets }
    }

    pub fn chunk_count(&self, i: usize) -> usize {
        self.offsets[i + 1] - self.offsets[i]
    }

    pub fn range(&self, i: usize) -> std::ops::Range<usize> {
        self.offsets[i]..self.offsets[i + 1]
    }
}
