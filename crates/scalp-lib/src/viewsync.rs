use crate::signal::ViewRange;

/// The two charts a link mirrors between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartSlot {
    Raw,
    Cleaned,
}

impl ChartSlot {
    fn index(self) -> usize {
        match self {
            ChartSlot::Raw => 0,
            ChartSlot::Cleaned => 1,
        }
    }

    fn peer(self) -> ChartSlot {
        match self {
            ChartSlot::Raw => ChartSlot::Cleaned,
            ChartSlot::Cleaned => ChartSlot::Raw,
        }
    }
}

/// A view change waiting to be applied to a chart before it next draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PendingView {
    /// Apply an explicit horizontal range, immediately and unanimated.
    Range(ViewRange),
    /// Reset to the chart's own full-data extents.
    Full,
}

/// Mirrors the horizontal view range between a raw/cleaned chart pair.
///
/// Each frame a chart first consumes its pending view (if any) and applies it
/// before drawing, then reports the range it actually displayed. A report
/// that differs from the recorded range is treated as a user gesture and
/// queued for the peer; the peer's record is updated at the same time, so
/// applying the mirrored range never echoes back.
#[derive(Debug, Default)]
pub struct ViewLink {
    recorded: [Option<ViewRange>; 2],
    pending: [Option<PendingView>; 2],
}

impl ViewLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the view change the given chart should apply this frame.
    pub fn take_pending(&mut self, slot: ChartSlot) -> Option<PendingView> {
        self.pending[slot.index()].take()
    }

    /// Records the range a chart displayed; mirrors it to the peer when it
    /// changed. Invalid ranges (no data yet) are ignored.
    pub fn report(&mut self, slot: ChartSlot, range: ViewRange) {
        if !range.is_valid() {
            return;
        }
        let idx = slot.index();
        let changed = match self.recorded[idx] {
            Some(prev) => !prev.approx_eq(&range),
            None => true,
        };
        self.recorded[idx] = Some(range);
        if changed {
            let peer = slot.peer().index();
            self.recorded[peer] = Some(range);
            self.pending[peer] = Some(PendingView::Range(range));
        }
    }

    /// Queues a reset to full-data extents for both charts, whichever
    /// chart's button was pressed.
    pub fn request_reset(&mut self) {
        self.recorded = [None, None];
        self.pending = [Some(PendingView::Full), Some(PendingView::Full)];
    }

    /// Forgets all view state, for when the underlying dataset changes.
    pub fn clear(&mut self) {
        self.recorded = [None, None];
        self.pending = [None, None];
    }
}
