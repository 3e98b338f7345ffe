//! Phone regions indexed by their validity windows

use serde::{Deserialize, Serialize};

use crate::vision::Rect;

/// A rectangle to redact over an inclusive range of frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneRegion {
    pub rect: Rect,
    pub text: String,
    pub confidence: f32,
    pub valid_from: usize,
    pub valid_to: usize,
}

impl PhoneRegion {
    pub fn covers(&self, frame: usize) -> bool {
        self.valid_from <= frame && frame <= self.valid_to
    }
}

/// Regions of one video, sorted by `valid_from`.
///
/// [`RegionTimeline::advance`] sweeps forward with a cursor and an active set,
/// so a full pass costs O(frames + regions) instead of a scan per frame.
#[derive(Debug, Clone, Default)]
pub struct RegionTimeline {
    regions: Vec<PhoneRegion>,
    next: usize,
    active: Vec<usize>,
    last_frame: Option<usize>,
}

impl RegionTimeline {
    /// Build a timeline for a video of `total_frames` frames.
    ///
    /// Windows are clamped to `[0, total_frames - 1]`; regions starting past
    /// the last frame are dropped.
    pub fn new(mut regions: Vec<PhoneRegion>, total_frames: usize) -> Self {
        regions.retain(|r| r.valid_from < total_frames && r.valid_from <= r.valid_to);
        for region in &mut regions {
            region.valid_to = region.valid_to.min(total_frames - 1);
        }
        regions.sort_by_key(|r| r.valid_from);

        Self {
            regions,
            next: 0,
            active: Vec::new(),
            last_frame: None,
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn regions(&self) -> &[PhoneRegion] {
        &self.regions
    }

    /// Regions covering `frame`, without moving the cursor
    pub fn regions_at(&self, frame: usize) -> Vec<&PhoneRegion> {
        self.regions.iter().filter(|r| r.covers(frame)).collect()
    }

    /// Regions covering `frame`, in `valid_from` order.
    ///
    /// Frames must be visited in non-decreasing order; going backwards
    /// restarts the sweep.
    pub fn advance(&mut self, frame: usize) -> impl Iterator<Item = &PhoneRegion> + '_ {
        if self.last_frame.is_some_and(|last| frame < last) {
            self.next = 0;
            self.active.clear();
        }
        self.last_frame = Some(frame);

        while let Some(region) = self.regions.get(self.next) {
            if region.valid_from > frame {
                break;
            }
            self.active.push(self.next);
            self.next += 1;
        }

        let regions = &self.regions;
        self.active.retain(|&i| regions[i].valid_to >= frame);
        self.active.iter().map(move |&i| &regions[i])
    }
}
