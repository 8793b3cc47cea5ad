//! Text selection across pages.
//!
//! A [`SelectionRange`] runs from `start` to an exclusive `end`; an absent end means only the
//! anchor is known. [`TextSelection`] drives the pointer gestures on top of it.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::engine::DocumentEngine;
use crate::geometry::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TextPosition {
    pub page: usize,
    pub index: usize,
}

impl TextPosition {
    pub fn new(page: usize, index: usize) -> Self {
        Self { page, index }
    }

    /// The character just before this one. Index 0 steps back to the end of the previous
    /// page, written as `usize::MAX` and clamped when the page text is read.
    pub fn previous(self) -> Self {
        match (self.page, self.index) {
            (page, 0) if page > 0 => Self::new(page - 1, usize::MAX),
            (page, 0) => Self::new(page, 0),
            (page, index) => Self::new(page, index - 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub start: TextPosition,
    pub end: Option<TextPosition>,
}

impl SelectionRange {
    pub fn anchored(start: TextPosition) -> Self {
        Self { start, end: None }
    }

    pub fn spanning(start: TextPosition, end: TextPosition) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn is_anchor_only(&self) -> bool {
        self.end.is_none()
    }

    /// Swaps the ends of a backwards range. Anchor-only and forward ranges come back as is.
    pub fn normalized(self) -> Self {
        match self.end {
            Some(end) if end < self.start => Self::spanning(end, self.start),
            _ => self,
        }
    }

    /// Combines two ranges into one covering both, ordered by start position.
    pub fn merge(self, other: SelectionRange) -> SelectionRange {
        let (earlier, later) = {
            let a = self.normalized();
            let b = other.normalized();
            if b.start < a.start {
                (b, a)
            } else {
                (a, b)
            }
        };

        let bridge = later.start.previous().max(earlier.start);
        let end = match (earlier.end, later.end) {
            (None, _) => bridge,
            (Some(earlier_end), None) => earlier_end.max(bridge),
            (Some(earlier_end), Some(later_end)) => earlier_end.max(later_end),
        };
        SelectionRange::spanning(earlier.start, end)
    }

    /// Character span `[start, end)` the range covers on each page it touches, given a
    /// per-page character count.
    pub fn page_spans<F>(&self, mut char_count: F) -> Result<Vec<PageSpan>>
    where
        F: FnMut(usize) -> Result<usize>,
    {
        let range = self.normalized();
        let Some(end) = range.end else {
            return Ok(Vec::new());
        };

        let mut spans = Vec::with_capacity(end.page - range.start.page + 1);
        for page in range.start.page..=end.page {
            let count = char_count(page)?;
            let first = if page == range.start.page {
                range.start.index.min(count)
            } else {
                0
            };
            let last = if page == end.page {
                end.index.min(count)
            } else {
                count
            };
            spans.push(PageSpan {
                page,
                start: first,
                end: last.max(first),
            });
        }
        Ok(spans)
    }

    pub fn span_on_page<F>(&self, page: usize, char_count: F) -> Result<Option<PageSpan>>
    where
        F: FnMut(usize) -> Result<usize>,
    {
        let range = self.normalized();
        match range.end {
            Some(end) if page >= range.start.page && page <= end.page => {
                let single = SelectionRange::spanning(
                    if page == range.start.page {
                        range.start
                    } else {
                        TextPosition::new(page, 0)
                    },
                    if page == end.page {
                        end
                    } else {
                        TextPosition::new(page, usize::MAX)
                    },
                );
                Ok(single.page_spans(char_count)?.into_iter().next())
            }
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpan {
    pub page: usize,
    pub start: usize,
    pub end: usize,
}

impl PageSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Text under the range, one engine extraction per page, pages separated by `\n`.
pub fn selected_text(range: &SelectionRange, engine: &dyn DocumentEngine) -> Result<String> {
    let spans = range.page_spans(|page| engine.char_count(page))?;
    let mut text = String::new();
    for (position, span) in spans.iter().enumerate() {
        if position > 0 {
            text.push('\n');
        }
        text.push_str(&engine.extract_text(span.page, span.start, span.len())?);
    }
    Ok(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPhase {
    #[default]
    Idle,
    Anchored,
    Extending,
    Settled,
}

#[derive(Debug, Default)]
pub struct TextSelection {
    range: Option<SelectionRange>,
    phase: SelectionPhase,
}

impl TextSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SelectionPhase {
        self.phase
    }

    pub fn range(&self) -> Option<SelectionRange> {
        self.range
    }

    pub fn normalized(&self) -> Option<SelectionRange> {
        self.range.map(SelectionRange::normalized)
    }

    /// Pointer input belongs to the selection while a drag is in progress.
    pub fn is_captured(&self) -> bool {
        matches!(
            self.phase,
            SelectionPhase::Anchored | SelectionPhase::Extending
        )
    }

    pub fn is_text_selected(&self) -> bool {
        self.normalized()
            .map(|range| !range.is_anchor_only())
            .unwrap_or(false)
    }

    /// Starts a drag at `hit`, or drops the selection when nothing was hit. Returns whether
    /// pointer capture is now held.
    pub fn pointer_down(&mut self, hit: Option<TextPosition>) -> bool {
        match hit {
            Some(position) => {
                self.range = Some(SelectionRange::anchored(position));
                self.phase = SelectionPhase::Anchored;
                true
            }
            None => {
                self.reset();
                false
            }
        }
    }

    /// Returns whether the range changed.
    pub fn pointer_move(&mut self, hit: Option<TextPosition>) -> bool {
        if !self.is_captured() {
            return false;
        }
        let (Some(position), Some(range)) = (hit, self.range.as_mut()) else {
            return false;
        };
        let changed = range.end != Some(position);
        range.end = Some(position);
        self.phase = SelectionPhase::Extending;
        changed
    }

    pub fn pointer_up(&mut self) {
        if self.is_captured() {
            self.phase = SelectionPhase::Settled;
        }
    }

    /// Merges the committed range with a new anchor at `position`. Refused while a drag holds
    /// capture or when nothing is committed.
    pub fn extend(&mut self, position: TextPosition) -> bool {
        if self.is_captured() {
            return false;
        }
        let Some(committed) = self.range else {
            return false;
        };
        let merged = committed.merge(SelectionRange::anchored(position));
        if merged == committed {
            return false;
        }
        self.range = Some(merged);
        self.phase = SelectionPhase::Settled;
        true
    }

    /// Settles on a whole word. Refused while a drag holds capture.
    pub fn select_word(&mut self, page: usize, offset: usize, length: usize) -> bool {
        self.settle(SelectionRange::spanning(
            TextPosition::new(page, offset),
            TextPosition::new(page, offset + length),
        ))
    }

    /// Settles on an explicit range (select all, select page). Refused while a drag holds
    /// capture.
    pub fn settle(&mut self, range: SelectionRange) -> bool {
        if self.is_captured() {
            return false;
        }
        self.range = Some(range);
        self.phase = SelectionPhase::Settled;
        true
    }

    pub fn reset(&mut self) {
        self.range = None;
        self.phase = SelectionPhase::Idle;
    }
}

/// Result of resolving a pointer position against a page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerResolution {
    pub device: Point,
    pub page: usize,
    pub document: Option<Point>,
    pub char_index: Option<usize>,
}

/// Remembers the last pointer resolution; hosts deliver the same position repeatedly.
#[derive(Debug, Default)]
pub struct PointerCache {
    last: Option<PointerResolution>,
}

impl PointerCache {
    pub fn resolve<F>(&mut self, page: usize, device: Point, compute: F) -> PointerResolution
    where
        F: FnOnce() -> PointerResolution,
    {
        if let Some(cached) = self.last {
            if cached.page == page && cached.device == device {
                return cached;
            }
        }
        let resolved = compute();
        self.last = Some(resolved);
        resolved
    }

    pub fn invalidate(&mut self) {
        self.last = None;
    }
}
