//! Windowing over the display sequence.
//!
//! Rows are laid out with a fixed estimated height. Rows that were actually
//! rendered can report their measured height, the difference to the estimate
//! is kept in a Fenwick tree so offsets of later rows shift accordingly
//! without walking every row.
use std::collections::HashMap;
use std::ops::Range;

use tracing::trace;

/// Prefix sums over per-row height deltas.
#[derive(Debug, Clone, Default)]
struct Fenwick {
    tree: Vec<i64>,
}

impl Fenwick {
    fn with_len(len: usize) -> Self {
        Fenwick { tree: vec![0; len] }
    }

    fn add(&mut self, idx: usize, delta: i64) {
        let mut i = idx + 1;
        while i <= self.tree.len() {
            self.tree[i - 1] += delta;
            i += i & i.wrapping_neg();
        }
    }

    /// Sum of the deltas of rows `0..idx`.
    fn prefix(&self, idx: usize) -> i64 {
        let mut i = idx.min(self.tree.len());
        let mut sum = 0;
        while i > 0 {
            sum += self.tree[i - 1];
            i -= i & i.wrapping_neg();
        }
        sum
    }
}

/// The rows to render for the current scroll position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VirtualWindow {
    /// First rendered index, overscan included.
    pub start: usize,
    /// One past the last rendered index.
    pub end: usize,
    pub first_visible: usize,
    pub last_visible: usize,
    /// Space to leave above the first rendered row.
    pub top_spacer: usize,
    /// Space to leave below the last rendered row.
    pub bottom_spacer: usize,
    pub total_extent: usize,
}

impl VirtualWindow {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

#[derive(Debug, Clone)]
pub struct Viewport {
    row_height: usize,
    overscan: usize,
    threshold: usize,
    height: usize,
    scroll_offset: usize,
    count: usize,
    measured: HashMap<usize, usize>,
    deltas: Fenwick,
}

impl Viewport {
    pub fn new(row_height: usize, overscan: usize, threshold: usize) -> Self {
        Viewport {
            row_height: row_height.max(1),
            overscan,
            threshold,
            height: 0,
            scroll_offset: 0,
            count: 0,
            measured: HashMap::new(),
            deltas: Fenwick::default(),
        }
    }

    pub fn row_height(&self) -> usize {
        self.row_height
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// A different display sequence: measurements are dropped and the view
    /// goes back to the top.
    pub fn reset(&mut self, count: usize) {
        self.count = count;
        self.measured.clear();
        self.deltas = Fenwick::with_len(count);
        self.scroll_offset = 0;
    }

    /// The same display sequence grew or shrank at its end. Measurements of
    /// rows that still exist are kept.
    pub fn set_count(&mut self, count: usize) {
        if count == self.count {
            return;
        }
        self.count = count;
        self.measured.retain(|idx, _| *idx < count);
        self.deltas = Fenwick::with_len(count);
        for (idx, height) in self.measured.iter() {
            self.deltas.add(*idx, *height as i64 - self.row_height as i64);
        }
        self.clamp_scroll();
    }

    pub fn set_height(&mut self, height: usize) {
        self.height = height;
        self.clamp_scroll();
    }

    /// Records the rendered height of row `idx`.
    pub fn measure(&mut self, idx: usize, height: usize) {
        if idx >= self.count {
            return;
        }
        let previous = self.measured.insert(idx, height).unwrap_or(self.row_height);
        let delta = height as i64 - previous as i64;
        if delta != 0 {
            trace!("Row {idx} measured {height} (was {previous})");
            self.deltas.add(idx, delta);
        }
    }

    pub fn row_size(&self, idx: usize) -> usize {
        self.measured.get(&idx).copied().unwrap_or(self.row_height)
    }

    /// Start position of row `idx`; `idx == count` gives the total extent.
    pub fn row_offset(&self, idx: usize) -> usize {
        let idx = idx.min(self.count);
        let offset = (idx * self.row_height) as i64 + self.deltas.prefix(idx);
        offset.max(0) as usize
    }

    pub fn total_extent(&self) -> usize {
        self.row_offset(self.count)
    }

    fn max_scroll(&self) -> usize {
        self.total_extent().saturating_sub(self.height)
    }

    fn clamp_scroll(&mut self) {
        self.scroll_offset = self.scroll_offset.min(self.max_scroll());
    }

    pub fn scroll_to(&mut self, offset: usize) {
        self.scroll_offset = offset;
        self.clamp_scroll();
    }

    pub fn scroll_by(&mut self, delta: isize) {
        let offset = self.scroll_offset.saturating_add_signed(delta);
        self.scroll_to(offset);
    }

    /// Scrolls the least amount that shows row `idx` completely.
    pub fn scroll_into_view(&mut self, idx: usize) {
        if idx >= self.count {
            return;
        }
        let top = self.row_offset(idx);
        let bottom = top + self.row_size(idx);
        if top < self.scroll_offset {
            self.scroll_to(top);
        } else if bottom > self.scroll_offset + self.height {
            self.scroll_to(bottom.saturating_sub(self.height));
        }
    }

    /// Row covering `offset`: the last row starting at or before it.
    pub fn index_at(&self, offset: usize) -> usize {
        if self.count == 0 {
            return 0;
        }
        let (mut lo, mut hi) = (0, self.count - 1);
        while lo < hi {
            let mid = lo + (hi - lo).div_ceil(2);
            if self.row_offset(mid) <= offset {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        lo
    }

    pub fn window(&self) -> VirtualWindow {
        let total_extent = self.total_extent();
        if self.count == 0 {
            return VirtualWindow {
                total_extent,
                ..VirtualWindow::default()
            };
        }
        let first_visible = self.index_at(self.scroll_offset);
        let bottom = self.scroll_offset + self.height;
        let last_visible = self.index_at(bottom.saturating_sub(1)).max(first_visible);

        let start = first_visible.saturating_sub(self.overscan);
        let end = (last_visible + self.overscan + 1).min(self.count);
        let top_spacer = self.row_offset(start);
        let bottom_spacer = total_extent.saturating_sub(self.row_offset(end));
        VirtualWindow {
            start,
            end,
            first_visible,
            last_visible,
            top_spacer,
            bottom_spacer,
            total_extent,
        }
    }

    /// Whether the last visible row of `window` is within the load threshold
    /// of the end of the display sequence. Overscan does not count.
    pub fn near_end(&self, window: &VirtualWindow) -> bool {
        !window.is_empty() && window.last_visible + 1 + self.threshold >= self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport(count: usize) -> Viewport {
        let mut viewport = Viewport::new(40, 5, 10);
        viewport.reset(count);
        viewport.set_height(600);
        viewport
    }

    #[test]
    fn window_covers_viewport_plus_overscan() {
        let viewport = viewport(1000);
        let window = viewport.window();
        assert_eq!(window.first_visible, 0);
        assert_eq!(window.last_visible, 14);
        assert_eq!(window.range(), 0..20);
        assert_eq!(window.total_extent, 40_000);
        assert_eq!(window.top_spacer, 0);
        assert_eq!(window.bottom_spacer, 40_000 - 20 * 40);
    }

    #[test]
    fn overscan_applies_on_both_edges() {
        let mut viewport = viewport(1000);
        viewport.scroll_to(4000);
        let window = viewport.window();
        assert_eq!(window.first_visible, 100);
        assert_eq!(window.last_visible, 114);
        assert_eq!(window.range(), 95..120);
        assert_eq!(window.top_spacer, 95 * 40);
        let rendered = (window.end - window.start) * 40;
        assert_eq!(window.top_spacer + rendered + window.bottom_spacer, 40_000);
    }

    #[test]
    fn scrolling_is_clamped_to_the_extent() {
        let mut viewport = viewport(100);
        viewport.scroll_to(1_000_000);
        assert_eq!(viewport.scroll_offset(), 4000 - 600);
        let window = viewport.window();
        assert_eq!(window.end, 100);
        assert_eq!(window.last_visible, 99);
        viewport.scroll_by(-10_000);
        assert_eq!(viewport.scroll_offset(), 0);
    }

    #[test]
    fn measured_rows_shift_later_offsets() {
        let mut viewport = viewport(1000);
        viewport.measure(2, 100);
        assert_eq!(viewport.row_offset(2), 80);
        assert_eq!(viewport.row_offset(3), 180);
        assert_eq!(viewport.total_extent(), 40_060);
        viewport.measure(2, 40);
        assert_eq!(viewport.row_offset(3), 120);
        assert_eq!(viewport.index_at(125), 3);
    }

    #[test]
    fn growing_keeps_measurements() {
        let mut viewport = viewport(100);
        viewport.measure(10, 80);
        viewport.set_count(200);
        assert_eq!(viewport.total_extent(), 200 * 40 + 40);
        viewport.reset(200);
        assert_eq!(viewport.total_extent(), 200 * 40);
    }

    #[test]
    fn empty_sequences_render_nothing() {
        let viewport = viewport(0);
        let window = viewport.window();
        assert!(window.is_empty());
        assert_eq!(window.total_extent, 0);
        assert!(!viewport.near_end(&window));
    }

    #[test]
    fn load_trigger_fires_near_the_end() {
        let mut viewport = viewport(100);
        assert!(!viewport.near_end(&viewport.window()));
        viewport.scroll_to(100 * 40);
        assert!(viewport.near_end(&viewport.window()));

        let short = self::viewport(12);
        assert!(short.near_end(&short.window()));
    }

    #[test]
    fn load_trigger_ignores_overscan() {
        let mut viewport = viewport(100);
        viewport.scroll_to(72 * 40);
        let window = viewport.window();
        assert_eq!(window.last_visible, 86);
        assert_eq!(window.end, 92);
        assert!(!viewport.near_end(&window));

        viewport.scroll_to(75 * 40);
        assert_eq!(viewport.window().last_visible, 89);
        assert!(viewport.near_end(&viewport.window()));
    }

    #[test]
    fn scroll_into_view_moves_minimally() {
        let mut viewport = viewport(1000);
        viewport.scroll_into_view(20);
        assert_eq!(viewport.scroll_offset(), 21 * 40 - 600);
        viewport.scroll_into_view(3);
        assert_eq!(viewport.scroll_offset(), 3 * 40);
        viewport.scroll_into_view(5);
        assert_eq!(viewport.scroll_offset(), 3 * 40);
    }
}
