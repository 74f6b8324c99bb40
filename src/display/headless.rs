//! Windowless display: overlays are composed and counted but never shown.

use std::collections::BTreeMap;

use tracing::debug;

use super::overlay::{Compositor, Placement, Rect, Surface, TextPainter, TextStyle};
use super::DisplayError;
use crate::capture::FrameSnapshot;

/// Every this many presents a debug line reports progress
const REPORT_EVERY: u64 = 100;

/// Keeps the latest surface per layer in memory
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    width: u32,
    height: u32,
    pending: BTreeMap<u8, (Placement, Surface)>,
    shown: BTreeMap<u8, (Placement, Surface)>,
    previews: u64,
    presents: u64,
}

impl HeadlessDisplay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }

    pub fn previews(&self) -> u64 {
        self.previews
    }

    /// Surface and placement of `layer` as of the last present
    pub fn layer(&self, layer: u8) -> Option<&(Placement, Surface)> {
        self.shown.get(&layer)
    }
}

impl Compositor for HeadlessDisplay {
    fn composite(&mut self, surface: &Surface, placement: Placement) -> Result<(), DisplayError> {
        match self.pending.get_mut(&placement.layer) {
            Some((p, s)) if s.width() == surface.width() && s.height() == surface.height() => {
                *p = placement;
                s.as_bytes_mut().copy_from_slice(surface.as_bytes());
            }
            _ => {
                self.pending.insert(placement.layer, (placement, surface.clone()));
            }
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), DisplayError> {
        std::mem::swap(&mut self.pending, &mut self.shown);
        self.presents += 1;
        if self.presents % REPORT_EVERY == 0 {
            debug!(presents = self.presents, previews = self.previews, "headless display");
        }
        Ok(())
    }

    fn preview(&mut self, _frame: &FrameSnapshot) -> Result<(), DisplayError> {
        self.previews += 1;
        Ok(())
    }

    fn display_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Text painter for headless runs: clears the area to the background, no glyphs
#[derive(Debug, Default)]
pub struct HeadlessText;

impl TextPainter for HeadlessText {
    fn paint_text(
        &mut self,
        surface: &mut Surface,
        area: Rect,
        _text: &str,
        style: TextStyle,
    ) -> Result<(), DisplayError> {
        surface.fill_rect(area, style.background);
        Ok(())
    }
}
