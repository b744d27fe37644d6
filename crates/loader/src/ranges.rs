pub const RANGE_ALIGNMENT: u64 = 4;

pub fn round_up4(size: u64) -> u64 {
    (size + RANGE_ALIGNMENT - 1) & !(RANGE_ALIGNMENT - 1)
}

/// Byte range inside one of the batch buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Range {
    pub byte_offset: u64,
    pub byte_size: u64,
}

impl Range {
    pub fn end(&self) -> u64 {
        self.byte_offset + self.byte_size
    }

    pub fn overlaps(&self, other: &Range) -> bool {
        self.byte_offset < other.end() && other.byte_offset < self.end()
    }

    pub(crate) fn as_usize(&self) -> std::ops::Range<usize> {
        self.byte_offset as usize..self.end() as usize
    }
}

/// Logical buffers a batch sub-allocates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Host-writable upload memory.
    Staging,
    /// GPU-decompressed buffer data.
    Temp,
    /// Destination of buffer tasks.
    Final,
    /// Compressed latent payloads.
    Compressed,
    /// GPU-decompressed latent data.
    Decompressed,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Staging,
        Category::Temp,
        Category::Final,
        Category::Compressed,
        Category::Decompressed,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Byte size of each category buffer once planning is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSizes([u64; 5]);

impl BatchSizes {
    pub fn get(&self, category: Category) -> u64 {
        self.0[category.index()]
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }
}

/// One bump pointer per category. Ranges are handed out in call order and never freed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RangeAllocator {
    totals: [u64; 5],
}

impl RangeAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, category: Category, size: u64) -> Range {
        let total = &mut self.totals[category.index()];
        let range = Range {
            byte_offset: *total,
            byte_size: size,
        };
        *total += round_up4(size);
        range
    }

    pub fn total(&self, category: Category) -> u64 {
        self.totals[category.index()]
    }

    pub fn sizes(&self) -> BatchSizes {
        BatchSizes(self.totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up() {
        assert_eq!(round_up4(0), 0);
        assert_eq!(round_up4(1), 4);
        assert_eq!(round_up4(4), 4);
        assert_eq!(round_up4(4095), 4096);
    }

    #[test]
    fn ranges_are_aligned_and_disjoint() {
        let sizes = [100u64, 1, 0, 7, 4096, 3];
        let mut alloc = RangeAllocator::new();
        let ranges: Vec<Range> = sizes
            .iter()
            .map(|&s| alloc.append(Category::Staging, s))
            .collect();

        for (i, a) in ranges.iter().enumerate() {
            assert_eq!(a.byte_offset % RANGE_ALIGNMENT, 0);
            for b in &ranges[i + 1..] {
                assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
            }
        }
        let expected: u64 = sizes.iter().map(|&s| round_up4(s)).sum();
        assert_eq!(alloc.total(Category::Staging), expected);
    }

    #[test]
    fn categories_are_independent() {
        let mut alloc = RangeAllocator::new();
        alloc.append(Category::Staging, 10);
        let r = alloc.append(Category::Final, 6);
        assert_eq!(r.byte_offset, 0);
        assert_eq!(alloc.sizes().get(Category::Staging), 12);
        assert_eq!(alloc.sizes().get(Category::Final), 8);
        assert_eq!(alloc.sizes().get(Category::Temp), 0);
        assert_eq!(alloc.sizes().total(), 20);
    }
}
