/// Series palette, pairs of dark/light variants of each hue.
pub const PALETTE: [&str; 12] = [
    "#e45629", "#e06c95", "#50a14f", "#98c379", "#c18401", "#e5c07b", "#0184bc", "#61afef",
    "#c636b4", "#c678dd", "#0997b3", "#56b6c2",
];

/// Hands out palette colors in order, wrapping around once exhausted.
///
/// Each chart build owns its allocator so that the same marathon order always produces the
/// same colors.
#[derive(Clone, Debug, Default)]
pub struct ColorAllocator {
    next: usize,
}

impl ColorAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_color(&mut self) -> &'static str {
        let color = PALETTE[self.next];
        self.next = (self.next + 1) % PALETTE.len();
        color
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_in_cyclic_order() {
        let mut colors = ColorAllocator::new();
        let first: Vec<_> = (0..PALETTE.len()).map(|_| colors.next_color()).collect();
        assert_eq!(first, PALETTE.to_vec());
        let again: Vec<_> = (0..3).map(|_| colors.next_color()).collect();
        assert_eq!(again, vec!["#e45629", "#e06c95", "#50a14f"]);
    }

    #[test]
    fn fresh_allocators_agree() {
        let mut a = ColorAllocator::new();
        let mut b = ColorAllocator::new();
        for _ in 0..20 {
            assert_eq!(a.next_color(), b.next_color());
        }
    }
}
