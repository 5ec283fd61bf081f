//! The fitter: all regions of one spectrum and the editing surface over
//! them.
//!
//! Regions are keyed by their integer left channel and never overlap.
//! Every mutator that can take long accepts a [`CancelToken`], polled
//! between regions, never inside a single solve.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use std::collections::BTreeMap;
use std::sync::Arc;

use gammafit_core::{CancelToken, FitSettings, Histogram, Spectrum};
use log::{debug, info};

use crate::finder::Finder;
use crate::hypermet::Hypermet;
use crate::optimizer::{LevenbergMarquardt, Optimizer};
use crate::peak::{CenterKey, Peak};
use crate::report;
use crate::roi::{Roi, RoiRecord};

/// Progress of a batch fit, reported after each region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitProgress {
    pub completed: usize,
    pub total: usize,
    /// Left channel of the region just fitted.
    pub roi: usize,
}

impl FitProgress {
    #[must_use]
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f32 / self.total as f32
        }
    }
}

/// Merges finder windows lying closer than `threshold · margin(R)` to the
/// running right edge `R`.
///
/// Windows are processed in order of their left edge; the result is
/// sorted and disjoint.
#[must_use]
pub fn merge_candidates(
    lefts: &[usize],
    rights: &[usize],
    threshold: f64,
    margin: impl Fn(usize) -> f64,
) -> Vec<(usize, usize)> {
    let mut windows: Vec<(usize, usize)> = lefts
        .iter()
        .zip(rights)
        .map(|(&l, &r)| (l.min(r), l.max(r)))
        .collect();
    windows.sort_unstable();

    let mut merged = Vec::new();
    let mut iter = windows.into_iter();
    let Some(mut current) = iter.next() else {
        return merged;
    };
    for (l, r) in iter {
        if (l as f64) < current.1 as f64 + threshold * margin(current.1) {
            current.1 = current.1.max(r);
        } else {
            merged.push(current);
            current = (l, r);
        }
    }
    merged.push(current);
    merged
}

/// Makes consecutive windows touch by moving both sides of every gap or
/// overlap to its midpoint.
fn close_gaps(windows: &mut [(usize, usize)]) {
    for i in 1..windows.len() {
        let (prev_right, next_left) = (windows[i - 1].1, windows[i].0);
        if prev_right + 1 != next_left {
            let mid = (prev_right + next_left) / 2;
            windows[i - 1].1 = mid;
            windows[i].0 = mid + 1;
        }
    }
}

/// Owner of every region of one spectrum.
#[derive(Debug, Clone)]
pub struct Fitter {
    settings: FitSettings,
    detector: String,
    histogram: Histogram,
    finder: Finder,
    regions: BTreeMap<usize, Roi>,
    optimizer: Arc<dyn Optimizer>,
}

impl Default for Fitter {
    fn default() -> Self {
        Self::new(FitSettings::default())
    }
}

impl Fitter {
    /// Creates an empty fitter using the Levenberg-Marquardt backend.
    #[must_use]
    pub fn new(settings: FitSettings) -> Self {
        Self {
            settings,
            detector: String::new(),
            histogram: Histogram::default(),
            finder: Finder::default(),
            regions: BTreeMap::new(),
            optimizer: Arc::new(LevenbergMarquardt::default()),
        }
    }

    /// Swaps the optimizer backend.
    #[must_use]
    pub fn with_optimizer(mut self, optimizer: Arc<dyn Optimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &FitSettings {
        &self.settings
    }

    #[must_use]
    pub fn detector(&self) -> &str {
        &self.detector
    }

    /// The trimmed data the regions are fitted against.
    #[must_use]
    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    #[must_use]
    pub fn finder(&self) -> &Finder {
        &self.finder
    }

    #[must_use]
    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    /// Regions keyed by left channel.
    #[must_use]
    pub fn regions(&self) -> &BTreeMap<usize, Roi> {
        &self.regions
    }

    #[must_use]
    pub fn region(&self, left: usize) -> Option<&Roi> {
        self.regions.get(&left)
    }

    /// Loads a spectrum: copies its calibrations and times into the
    /// settings, trims the counts and runs the finder. Existing regions
    /// are dropped.
    pub fn set_data(&mut self, spectrum: &Spectrum) {
        self.settings.bits = spectrum.bits;
        self.settings.live_seconds = spectrum.live_seconds;
        self.settings.real_seconds = spectrum.real_seconds;
        self.settings.energy_calibration = spectrum.energy_calibration.clone();
        self.settings.fwhm_calibration = spectrum.fwhm_calibration.clone();
        self.detector.clone_from(&spectrum.detector);
        self.histogram = Histogram::from_spectrum(spectrum);
        self.finder
            .find(&self.histogram.x, &self.histogram.y, &self.settings);
        self.regions.clear();
        debug!(
            "loaded {} channels, {} finder candidates",
            self.histogram.len(),
            self.finder.len()
        );
    }

    /// Drops every region, keeping the data.
    pub fn clear(&mut self) {
        self.regions.clear();
    }

    /// Background margin at `channel`, in whole channels.
    fn margin(&self, channel: usize) -> usize {
        (self.settings.roi_extend_peaks * self.settings.fwhm_at(channel as f64)).ceil() as usize
    }

    fn below_cutoff(&self, right: usize) -> bool {
        self.settings.energy_calibration.is_valid()
            && self
                .settings
                .energy_calibration
                .transform_bits(right as f64, self.settings.bits)
                < self.settings.energy_cutoff
    }

    /// Rebuilds every region from the finder candidates.
    ///
    /// Candidates are merged, expanded by the background margin, clamped
    /// to the data and made disjoint; regions below the energy cutoff are
    /// dropped. Returns the number of regions.
    pub fn find_regions(&mut self, cancel: &CancelToken) -> usize {
        self.regions.clear();
        if cancel.is_cancelled() || self.histogram.is_empty() {
            return 0;
        }
        let (Some(first), Some(last)) = (
            self.histogram.first_channel(),
            self.histogram.last_channel(),
        ) else {
            return 0;
        };

        let mut windows: Vec<(usize, usize)> = merge_candidates(
            &self.finder.lefts,
            &self.finder.rights,
            self.settings.roi_merge_threshold,
            |r| self.settings.roi_extend_peaks * self.settings.fwhm_at(r as f64),
        )
        .into_iter()
        .map(|(l, r)| {
            let margin = self.margin(r);
            (l.saturating_sub(margin).max(first), (r + margin).min(last))
        })
        .collect();
        close_gaps(&mut windows);

        for (l, r) in windows {
            if self.below_cutoff(r) {
                debug!("region [{l}, {r}] below energy cutoff");
                continue;
            }
            let mut roi = Roi::new(self.settings.clone());
            if roi.set_data(&self.histogram, l, r) {
                self.regions.insert(roi.left(), roi);
            }
        }
        info!(
            "{} regions from {} candidates",
            self.regions.len(),
            self.finder.len()
        );
        self.regions.len()
    }

    /// Fits every region in order, calling `observer` after each.
    ///
    /// Stops before the next region once `cancel` is set; regions already
    /// fitted keep their results. Returns the number of regions fitted.
    pub fn auto_fit(
        &mut self,
        cancel: &CancelToken,
        mut observer: impl FnMut(FitProgress),
    ) -> usize {
        let keys: Vec<usize> = self.regions.keys().copied().collect();
        let total = keys.len();
        let mut fitted = 0;
        for key in keys {
            if cancel.is_cancelled() {
                info!("auto fit cancelled after {fitted} of {total} regions");
                break;
            }
            if let Some(roi) = self.regions.get_mut(&key) {
                roi.auto_fit(&self.histogram, self.optimizer.as_ref());
            }
            fitted += 1;
            observer(FitProgress {
                completed: fitted,
                total,
                roi: key,
            });
        }
        info!("fitted {fitted} regions, {} peaks", self.peak_count());
        fitted
    }

    /// Refits one region with its current peaks.
    pub fn refit_roi(&mut self, left: usize, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let Some(roi) = self.regions.get_mut(&left) else {
            return false;
        };
        roi.refit(&self.histogram, self.optimizer.as_ref())
    }

    /// Whether `[left, right]` stays clear of every region except `except`.
    fn is_free(&self, left: usize, right: usize, except: Option<usize>) -> bool {
        self.regions
            .iter()
            .filter(|(&key, _)| Some(key) != except)
            .all(|(_, roi)| !roi.overlaps(left, right))
    }

    /// Puts a region back under its (possibly new) left channel.
    fn reinsert(&mut self, roi: Roi) {
        self.regions.insert(roi.left(), roi);
    }

    /// Adds a peak with SUM4 window `[left, right]`.
    ///
    /// Joins the region overlapping the window, or creates one around it
    /// with the background margin, shrunk to stay clear of neighbours.
    pub fn add_peak(&mut self, left: usize, right: usize, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() || left > right {
            return false;
        }
        let parent = self
            .regions
            .iter()
            .find(|(_, roi)| roi.overlaps(left, right))
            .map(|(&key, _)| key);

        if let Some(key) = parent {
            let Some(original) = self.regions.remove(&key) else {
                return false;
            };
            let mut roi = original.clone();
            let added = roi.add_peak(&self.histogram, self.optimizer.as_ref(), left, right);
            if added && self.is_free(roi.left(), roi.right(), None) {
                self.reinsert(roi);
                return true;
            }
            self.reinsert(original);
            return false;
        }

        let margin = self
            .margin(right)
            .max(self.settings.background_edge_samples);
        let mut lo = left.saturating_sub(margin);
        let mut hi = right + margin;
        if let Some((_, prev)) = self.regions.range(..left).next_back() {
            lo = lo.max(prev.right() + 1);
        }
        if let Some((_, next)) = self.regions.range(left..).next() {
            hi = hi.min(next.left().saturating_sub(1));
        }
        let mut roi = Roi::new(self.settings.clone());
        if !roi.set_data(&self.histogram, lo, hi)
            || !roi.add_peak(&self.histogram, self.optimizer.as_ref(), left, right)
            || !self.is_free(roi.left(), roi.right(), None)
        {
            return false;
        }
        self.reinsert(roi);
        true
    }

    /// Removes the peaks at `centers`. Regions left without peaks are
    /// deleted.
    pub fn remove_peaks(&mut self, centers: &[f64], cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let mut by_region: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
        for &center in centers {
            if let Some(key) = self.parent_of(center) {
                by_region.entry(key).or_default().push(center);
            }
        }
        let mut removed = false;
        for (key, group) in by_region {
            let Some(roi) = self.regions.get_mut(&key) else {
                continue;
            };
            removed |= roi.remove_peaks(&self.histogram, self.optimizer.as_ref(), &group);
            if roi.peaks().is_empty() {
                self.regions.remove(&key);
            }
        }
        removed
    }

    /// Replaces the Hypermet of the peak at `center` without refitting.
    pub fn replace_hypermet(&mut self, center: f64, hypermet: Hypermet) -> bool {
        let Some(key) = self.parent_of(center) else {
            return false;
        };
        match self.regions.get_mut(&key) {
            Some(roi) => roi.replace_hypermet(&self.histogram, center, hypermet),
            None => false,
        }
    }

    /// Runs `edit` on the region at `key`, keeping the result only when it
    /// succeeds and stays clear of the other regions.
    fn edit_region(
        &mut self,
        key: usize,
        edit: impl FnOnce(&mut Roi, &Histogram, &dyn Optimizer) -> bool,
    ) -> bool {
        let Some(original) = self.regions.remove(&key) else {
            return false;
        };
        let mut roi = original.clone();
        if edit(&mut roi, &self.histogram, self.optimizer.as_ref())
            && self.is_free(roi.left(), roi.right(), None)
        {
            self.reinsert(roi);
            true
        } else {
            self.reinsert(original);
            false
        }
    }

    /// Moves both bounds of the region at `roi`.
    pub fn adjust_bounds(
        &mut self,
        roi: usize,
        left: usize,
        right: usize,
        cancel: &CancelToken,
    ) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        self.edit_region(roi, |r, hist, opt| r.adjust_bounds(hist, opt, left, right))
    }

    /// Replaces the left background edge of the region at `roi`.
    pub fn adjust_lb(
        &mut self,
        roi: usize,
        left: usize,
        right: usize,
        cancel: &CancelToken,
    ) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        self.edit_region(roi, |r, hist, opt| r.adjust_lb(hist, opt, left, right))
    }

    /// Replaces the right background edge of the region at `roi`.
    pub fn adjust_rb(
        &mut self,
        roi: usize,
        left: usize,
        right: usize,
        cancel: &CancelToken,
    ) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        self.edit_region(roi, |r, hist, opt| r.adjust_rb(hist, opt, left, right))
    }

    /// Deletes the region at `left`.
    pub fn delete_roi(&mut self, left: usize) -> bool {
        self.regions.remove(&left).is_some()
    }

    /// Left channel of the region holding the peak at `center`.
    #[must_use]
    pub fn parent_of(&self, center: f64) -> Option<usize> {
        self.regions
            .iter()
            .find(|(_, roi)| roi.contains_peak(center))
            .map(|(&key, _)| key)
    }

    /// Every peak of every region, by center.
    #[must_use]
    pub fn peaks(&self) -> BTreeMap<CenterKey, &Peak> {
        self.regions
            .values()
            .flat_map(|roi| roi.peaks().iter().map(|(k, p)| (*k, p)))
            .collect()
    }

    #[must_use]
    pub fn peak_count(&self) -> usize {
        self.regions.values().map(|roi| roi.peaks().len()).sum()
    }

    /// Persistable state of every region.
    #[must_use]
    pub fn records(&self) -> Vec<RoiRecord> {
        self.regions.values().map(Roi::record).collect()
    }

    /// Replaces the regions with ones rebuilt from `records` against the
    /// current histogram. Returns how many could be rebuilt.
    pub fn restore(&mut self, records: &[RoiRecord]) -> usize {
        self.regions.clear();
        for record in records {
            if let Some(roi) = Roi::restore(&self.histogram, record) {
                if self.is_free(roi.left(), roi.right(), None) {
                    self.reinsert(roi);
                }
            }
        }
        self.regions.len()
    }

    /// Human-readable, column-aligned peak table.
    #[must_use]
    pub fn report(&self) -> String {
        report::render(self)
    }
}
