//! Regions of interest: one background model and a multiplet of peaks.
//!
//! An ROI covers `[left, right]`. Its first and last
//! `background_edge_samples` channels are the SUM4 background edges; the
//! channels between them form the peak zone. Every operation that moves a
//! bound rebuilds the edges and refits the surviving peaks.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use std::collections::BTreeMap;

use gammafit_core::{Curve, FitSettings, Histogram, Polynomial};
use log::debug;

use crate::finder::Finder;
use crate::hypermet::{fwhm_to_width, Hypermet};
use crate::optimizer::{Optimizer, WidthPolicy};
use crate::peak::{CenterKey, Peak};
use crate::sum4::{Sum4, Sum4Edge};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Centers closer than this are the same peak.
const CENTER_TOLERANCE: f64 = 1e-6;

/// Narrowest region that still has an edge on each side of one channel.
const MIN_WIDTH: usize = 3;

/// Lifecycle of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoiState {
    Empty,
    BackgroundOnly,
    HasPeaks(usize),
}

/// Persistable description of one peak.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakRecord {
    pub hypermet: Hypermet,
    /// SUM4 window, absent when the SUM4 result was invalid.
    pub sum4_bounds: Option<(usize, usize)>,
}

/// Everything needed to rebuild an ROI against its histogram.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RoiRecord {
    pub left: usize,
    pub right: usize,
    pub lb: (usize, usize),
    pub rb: (usize, usize),
    pub background: Polynomial,
    pub settings: FitSettings,
    pub peaks: Vec<PeakRecord>,
}

/// Starting point for one peak of a multiplet fit.
#[derive(Debug, Clone)]
struct Guess {
    hypermet: Hypermet,
    sum4_bounds: Option<(usize, usize)>,
}

/// A contiguous channel window fitted as one background plus peaks.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    settings: FitSettings,
    left: usize,
    right: usize,
    lb: Sum4Edge,
    rb: Sum4Edge,
    background: Polynomial,
    peaks: BTreeMap<CenterKey, Peak>,
}

impl Roi {
    /// An empty region carrying a settings snapshot.
    #[must_use]
    pub fn new(settings: FitSettings) -> Self {
        Self {
            settings,
            left: 0,
            right: 0,
            lb: Sum4Edge::default(),
            rb: Sum4Edge::default(),
            background: Polynomial::default(),
            peaks: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &FitSettings {
        &self.settings
    }

    #[must_use]
    pub fn left(&self) -> usize {
        self.left
    }

    #[must_use]
    pub fn right(&self) -> usize {
        self.right
    }

    /// Left background edge.
    #[must_use]
    pub fn lb(&self) -> &Sum4Edge {
        &self.lb
    }

    /// Right background edge.
    #[must_use]
    pub fn rb(&self) -> &Sum4Edge {
        &self.rb
    }

    #[must_use]
    pub fn background(&self) -> &Polynomial {
        &self.background
    }

    /// Peaks ordered by center.
    #[must_use]
    pub fn peaks(&self) -> &BTreeMap<CenterKey, Peak> {
        &self.peaks
    }

    #[must_use]
    pub fn state(&self) -> RoiState {
        if !self.lb.is_valid() || !self.rb.is_valid() {
            RoiState::Empty
        } else if self.peaks.is_empty() {
            RoiState::BackgroundOnly
        } else {
            RoiState::HasPeaks(self.peaks.len())
        }
    }

    /// Channels between the background edges.
    #[must_use]
    pub fn peak_zone(&self) -> (usize, usize) {
        (self.lb.right() + 1, self.rb.left().saturating_sub(1))
    }

    /// Whether `[left, right]` intersects the region.
    #[must_use]
    pub fn overlaps(&self, left: usize, right: usize) -> bool {
        self.state() != RoiState::Empty && left <= self.right && self.left <= right
    }

    /// Whether a peak with this center belongs to the region.
    #[must_use]
    pub fn contains_peak(&self, center: f64) -> bool {
        self.find_key(center).is_some()
    }

    /// Places the region on `[left, right]` with default edges and a
    /// background through them. Existing peaks are dropped.
    ///
    /// Returns `false` and leaves the region unchanged when the range is
    /// too narrow or outside the histogram.
    pub fn set_data(&mut self, hist: &Histogram, left: usize, right: usize) -> bool {
        let Some((left, right)) = hist.clamp_range(left, right) else {
            return false;
        };
        let width = right - left + 1;
        if width < MIN_WIDTH {
            return false;
        }
        let samples = self
            .settings
            .background_edge_samples
            .max(1)
            .min((width - 1) / 2);
        let lb = Sum4Edge::new(hist, left, left + samples - 1);
        let rb = Sum4Edge::new(hist, right + 1 - samples, right);
        if !lb.is_valid() || !rb.is_valid() {
            return false;
        }
        self.left = left;
        self.right = right;
        self.lb = lb;
        self.rb = rb;
        self.peaks.clear();
        self.background = self.edge_background();
        true
    }

    /// Finds peaks inside the peak zone and fits them as one multiplet.
    ///
    /// Returns `false` when no usable peak results; the region is then
    /// background-only.
    pub fn auto_fit(&mut self, hist: &Histogram, optimizer: &dyn Optimizer) -> bool {
        let Some((x, y)) = hist.window(self.left, self.right) else {
            return false;
        };
        let finder = Finder::new(x, y, &self.settings);
        let (zl, zr) = self.peak_zone();
        let guesses: Vec<Guess> = finder
            .candidates_within(zl, zr)
            .map(|c| self.guess_at(hist, c.center, Some(c.height), None))
            .collect();
        let fitted = self.fit_guesses(hist, optimizer, guesses);
        if fitted && self.settings.residual_refine {
            self.refine_residuals(hist, optimizer);
        }
        fitted
    }

    /// Refits the current peaks, keeping their SUM4 windows.
    pub fn refit(&mut self, hist: &Histogram, optimizer: &dyn Optimizer) -> bool {
        if self.peaks.is_empty() {
            return self.auto_fit(hist, optimizer);
        }
        let guesses = self.current_guesses(hist);
        self.fit_guesses(hist, optimizer, guesses)
    }

    /// Adds a peak whose SUM4 window is `[left, right]` and refits the
    /// multiplet. The region grows when the window reaches into an edge.
    pub fn add_peak(
        &mut self,
        hist: &Histogram,
        optimizer: &dyn Optimizer,
        left: usize,
        right: usize,
    ) -> bool {
        if left > right || self.state() == RoiState::Empty {
            return false;
        }
        let guesses = self.current_guesses(hist);
        let (zl, zr) = self.peak_zone();
        if left < zl || right > zr {
            let margin = self.margin(right).max(self.settings.background_edge_samples);
            let new_left = self.left.min(left.saturating_sub(margin));
            let new_right = self.right.max(right + margin);
            let saved = self.clone();
            if !self.set_data(hist, new_left, new_right) {
                return false;
            }
            let (zl, zr) = self.peak_zone();
            if left < zl || right > zr {
                *self = saved;
                return false;
            }
        }

        let Some((x, y)) = hist.window(left, right) else {
            return false;
        };
        let Some((index, _)) = y.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1)) else {
            return false;
        };
        let mut guesses = guesses;
        guesses.push(self.guess_at(hist, x[index], None, Some((left, right))));
        self.fit_guesses(hist, optimizer, guesses)
    }

    /// Removes the peaks at `centers` and refits the survivors.
    ///
    /// Returns `false` when no center matched.
    pub fn remove_peaks(
        &mut self,
        hist: &Histogram,
        optimizer: &dyn Optimizer,
        centers: &[f64],
    ) -> bool {
        let before = self.peaks.len();
        let keys: Vec<CenterKey> = centers.iter().filter_map(|&c| self.find_key(c)).collect();
        for key in &keys {
            self.peaks.remove(key);
        }
        if self.peaks.len() == before {
            return false;
        }
        if self.peaks.is_empty() {
            self.background = self.edge_background();
        } else {
            let guesses = self.current_guesses(hist);
            self.fit_guesses(hist, optimizer, guesses);
        }
        true
    }

    /// Swaps in an externally edited Hypermet for the peak at `center`.
    ///
    /// The new center must lie inside the region.
    pub fn replace_hypermet(&mut self, hist: &Histogram, center: f64, hypermet: Hypermet) -> bool {
        let Some(key) = self.find_key(center) else {
            return false;
        };
        let new_center = hypermet.center.value;
        if !(new_center >= self.left as f64 && new_center <= self.right as f64) {
            return false;
        }
        let Some(old) = self.peaks.remove(&key) else {
            return false;
        };
        let (l, r) = if old.sum4().is_valid() {
            (old.sum4().left(), old.sum4().right())
        } else {
            self.sum4_window(new_center, &hypermet)
        };
        let sum4 = Sum4::new(hist, l, r, &self.lb, &self.rb);
        let peak = Peak::new(hypermet, sum4, &self.settings);
        self.peaks.insert(peak.key(), peak);
        true
    }

    /// Moves both bounds, rebuilding default edges and refitting the
    /// peaks that remain inside.
    pub fn adjust_bounds(
        &mut self,
        hist: &Histogram,
        optimizer: &dyn Optimizer,
        left: usize,
        right: usize,
    ) -> bool {
        let guesses = self.current_guesses(hist);
        if !self.set_data(hist, left, right) {
            return false;
        }
        let (zl, zr) = self.peak_zone();
        let kept: Vec<Guess> = guesses
            .into_iter()
            .filter(|g| g.hypermet.center.value >= zl as f64 && g.hypermet.center.value <= zr as f64)
            .collect();
        if kept.is_empty() {
            self.auto_fit(hist, optimizer);
        } else {
            self.fit_guesses(hist, optimizer, kept);
        }
        true
    }

    /// Replaces the left background edge with `[left, right]`.
    ///
    /// The region's left bound follows the edge. Rejected when the edge
    /// is invalid or would cover a peak or the right edge.
    pub fn adjust_lb(
        &mut self,
        hist: &Histogram,
        optimizer: &dyn Optimizer,
        left: usize,
        right: usize,
    ) -> bool {
        let edge = Sum4Edge::new(hist, left, right);
        if !edge.is_valid() || right >= self.rb.left() || self.peak_at_or_below(right as f64) {
            return false;
        }
        let guesses = self.current_guesses(hist);
        self.left = left;
        self.lb = edge;
        self.rebuild(hist, optimizer, guesses);
        true
    }

    /// Replaces the right background edge with `[left, right]`.
    pub fn adjust_rb(
        &mut self,
        hist: &Histogram,
        optimizer: &dyn Optimizer,
        left: usize,
        right: usize,
    ) -> bool {
        let edge = Sum4Edge::new(hist, left, right);
        if !edge.is_valid() || left <= self.lb.right() || self.peak_at_or_above(left as f64) {
            return false;
        }
        let guesses = self.current_guesses(hist);
        self.right = right;
        self.rb = edge;
        self.rebuild(hist, optimizer, guesses);
        true
    }

    /// Background model at `x`.
    #[must_use]
    pub fn background_at(&self, x: f64) -> f64 {
        self.background.evaluate(x)
    }

    /// Background plus every converged peak shape at `x`.
    #[must_use]
    pub fn model_at(&self, x: f64) -> f64 {
        self.background_at(x)
            + self
                .peaks
                .values()
                .map(Peak::hypermet)
                .filter(|h| h.height_finite_positive())
                .map(|h| h.evaluate(x))
                .sum::<f64>()
    }

    /// Data minus model over the region.
    #[must_use]
    pub fn residuals(&self, hist: &Histogram) -> Vec<f64> {
        hist.window(self.left, self.right)
            .map(|(x, y)| x.iter().zip(y).map(|(&x, &y)| y - self.model_at(x)).collect())
            .unwrap_or_default()
    }

    /// Reduced χ² of the model with Poisson weights.
    #[must_use]
    pub fn chi_squared(&self, hist: &Histogram) -> f64 {
        let Some((x, y)) = hist.window(self.left, self.right) else {
            return f64::NAN;
        };
        let sum: f64 = x
            .iter()
            .zip(y)
            .map(|(&x, &y)| (y - self.model_at(x)).powi(2) / y.max(1.0))
            .sum();
        let dof = x.len().saturating_sub(self.free_parameter_count()).max(1);
        sum / dof as f64
    }

    /// Captures the region for later reconstruction.
    #[must_use]
    pub fn record(&self) -> RoiRecord {
        RoiRecord {
            left: self.left,
            right: self.right,
            lb: (self.lb.left(), self.lb.right()),
            rb: (self.rb.left(), self.rb.right()),
            background: self.background.clone(),
            settings: self.settings.clone(),
            peaks: self
                .peaks
                .values()
                .map(|p| PeakRecord {
                    hypermet: p.hypermet().clone(),
                    sum4_bounds: p.sum4().is_valid().then(|| (p.sum4().left(), p.sum4().right())),
                })
                .collect(),
        }
    }

    /// Rebuilds a region from a record; `None` when its edges no longer
    /// fit the histogram.
    #[must_use]
    pub fn restore(hist: &Histogram, record: &RoiRecord) -> Option<Self> {
        let lb = Sum4Edge::new(hist, record.lb.0, record.lb.1);
        let rb = Sum4Edge::new(hist, record.rb.0, record.rb.1);
        if !lb.is_valid() || !rb.is_valid() || record.left > record.right {
            return None;
        }
        let mut roi = Self {
            settings: record.settings.clone(),
            left: record.left,
            right: record.right,
            lb,
            rb,
            background: record.background.clone(),
            peaks: BTreeMap::new(),
        };
        for saved in &record.peaks {
            let sum4 = saved
                .sum4_bounds
                .map(|(l, r)| Sum4::new(hist, l, r, &roi.lb, &roi.rb))
                .unwrap_or_default();
            let peak = Peak::new(saved.hypermet.clone(), sum4, &roi.settings);
            if roi.usable(&peak) {
                roi.peaks.insert(peak.key(), peak);
            }
        }
        Some(roi)
    }

    /// Background margin at `channel`, in whole channels.
    #[must_use]
    pub fn margin(&self, channel: usize) -> usize {
        (self.settings.roi_extend_peaks * self.settings.fwhm_at(channel as f64)).ceil() as usize
    }

    fn find_key(&self, center: f64) -> Option<CenterKey> {
        self.peaks
            .keys()
            .find(|k| (k.0 - center).abs() <= CENTER_TOLERANCE)
            .copied()
    }

    fn peak_at_or_below(&self, channel: f64) -> bool {
        self.peaks.keys().any(|k| k.0 <= channel)
    }

    fn peak_at_or_above(&self, channel: f64) -> bool {
        self.peaks.keys().any(|k| k.0 >= channel)
    }

    fn edge_background(&self) -> Polynomial {
        Polynomial::through(
            self.lb.midpoint(),
            self.lb.average().value(),
            self.rb.midpoint(),
            self.rb.average().value(),
        )
        .resized(self.settings.background_degree + 1)
    }

    fn free_parameter_count(&self) -> usize {
        self.background.coeff_count()
            + self
                .peaks
                .values()
                .map(|p| p.hypermet().params().iter().filter(|q| q.is_free()).count())
                .sum::<usize>()
    }

    fn usable(&self, peak: &Peak) -> bool {
        let center = peak.center().value();
        center >= self.left as f64
            && center <= self.right as f64
            && (peak.hypermet().height_finite_positive() || peak.sum4().is_valid())
    }

    /// SUM4 window of `sum4_extent` FWHM either side of `center`, kept
    /// inside the peak zone.
    fn sum4_window(&self, center: f64, hypermet: &Hypermet) -> (usize, usize) {
        let fwhm = if hypermet.height_finite_positive() {
            hypermet.fwhm_channels().value()
        } else {
            self.settings.fwhm_at(center)
        };
        let extent = self.settings.sum4_extent * fwhm;
        let (zl, zr) = self.peak_zone();
        let l = (center - extent).floor().max(zl as f64) as usize;
        let r = (center + extent).ceil().min(zr as f64).max(0.0) as usize;
        (l, r)
    }

    fn guess_at(
        &self,
        hist: &Histogram,
        center: f64,
        height: Option<f64>,
        sum4_bounds: Option<(usize, usize)>,
    ) -> Guess {
        let above_background = || {
            let channel = center.round().max(0.0) as usize;
            hist.counts_at(channel) - self.background_at(center)
        };
        let height = height.unwrap_or_else(above_background).max(1.0);
        let width = fwhm_to_width(self.settings.fwhm_at(center));
        Guess {
            hypermet: Hypermet::guess(center, height, width, &self.settings),
            sum4_bounds,
        }
    }

    fn current_guesses(&self, hist: &Histogram) -> Vec<Guess> {
        self.peaks
            .values()
            .map(|p| {
                let hyp = p.hypermet();
                let height = hyp.height_finite_positive().then_some(hyp.height.value);
                let bounds = p
                    .sum4()
                    .is_valid()
                    .then(|| (p.sum4().left(), p.sum4().right()));
                self.guess_at(hist, p.center().value(), height, bounds)
            })
            .collect()
    }

    fn rebuild(&mut self, hist: &Histogram, optimizer: &dyn Optimizer, guesses: Vec<Guess>) {
        self.peaks.clear();
        self.background = self.edge_background();
        if !guesses.is_empty() {
            self.fit_guesses(hist, optimizer, guesses);
        }
    }

    /// Fits `guesses` as one multiplet and replaces the peaks.
    fn fit_guesses(
        &mut self,
        hist: &Histogram,
        optimizer: &dyn Optimizer,
        guesses: Vec<Guess>,
    ) -> bool {
        self.peaks.clear();
        self.background = self.edge_background();
        if guesses.is_empty() {
            return false;
        }
        let Some((x, y)) = hist.window(self.left, self.right) else {
            return false;
        };

        let initial: Vec<f64> = guesses.iter().map(|g| g.hypermet.center.value).collect();
        let (mut hyps, bounds): (Vec<Hypermet>, Vec<Option<(usize, usize)>>) = guesses
            .into_iter()
            .map(|g| (g.hypermet, g.sum4_bounds))
            .unzip();

        if self.settings.sum4_only {
            hyps.iter_mut().for_each(Hypermet::invalidate);
        } else {
            let mut background = self.background.clone();
            let report = optimizer.fit_peaks(
                x,
                y,
                &mut hyps,
                &mut background,
                WidthPolicy::from_settings(&self.settings),
                &self.settings,
            );
            debug!(
                "roi [{}, {}]: {} peak(s), {} χ²/ν = {:.3} after {} iterations",
                self.left,
                self.right,
                hyps.len(),
                optimizer.name(),
                report.chi_squared,
                report.iterations
            );
            if report.committed {
                self.background = background;
            }
        }

        let (zl, zr) = self.peak_zone();
        for ((hyp, bounds), start) in hyps.into_iter().zip(bounds).zip(initial) {
            let center = if hyp.height_finite_positive() {
                hyp.center.value
            } else {
                start
            };
            let (l, r) = match bounds {
                Some((l, r)) => (l.max(zl), r.min(zr)),
                None => self.sum4_window(center, &hyp),
            };
            let sum4 = Sum4::new(hist, l, r, &self.lb, &self.rb);
            let peak = Peak::new(hyp, sum4, &self.settings);
            if self.usable(&peak) {
                self.peaks.insert(peak.key(), peak);
            }
        }

        if self.peaks.is_empty() {
            debug!("roi [{}, {}]: no usable peaks", self.left, self.right);
            self.background = self.edge_background();
            return false;
        }
        true
    }

    /// Searches the residuals for missed peaks, keeping each addition only
    /// if the reduced χ² improves.
    fn refine_residuals(&mut self, hist: &Histogram, optimizer: &dyn Optimizer) {
        let Some((x, _)) = hist.window(self.left, self.right) else {
            return;
        };
        let x = x.to_vec();
        for _ in 0..self.settings.residual_max_iterations {
            let before = self.chi_squared(hist);
            let residuals = self.residuals(hist);
            let finder = Finder::new(&x, &residuals, &self.settings);
            let (zl, zr) = self.peak_zone();
            let candidate = finder
                .candidates_within(zl, zr)
                .filter(|c| c.height >= self.settings.residual_min_amplitude)
                .filter(|c| {
                    let too_close = self.settings.residual_too_close * self.settings.fwhm_at(c.center);
                    self.peaks.keys().all(|k| (k.0 - c.center).abs() >= too_close)
                })
                .max_by(|a, b| a.height.total_cmp(&b.height));
            let Some(candidate) = candidate else {
                break;
            };

            let snapshot = self.clone();
            let mut guesses = self.current_guesses(hist);
            guesses.push(self.guess_at(hist, candidate.center, Some(candidate.height), None));
            if !self.fit_guesses(hist, optimizer, guesses) || self.chi_squared(hist) >= before {
                *self = snapshot;
                break;
            }
            debug!("roi [{}, {}]: residual peak at {:.2}", self.left, self.right, candidate.center);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::LevenbergMarquardt;
    use approx::assert_abs_diff_eq;

    fn single() -> Histogram {
        let mut counts = vec![0.0; 50];
        counts.extend([5.0, 20.0, 80.0, 200.0, 80.0, 20.0, 5.0]);
        counts.extend(vec![0.0; 50]);
        Histogram::from_counts(&counts)
    }

    fn doublet() -> Histogram {
        let counts: Vec<f64> = (0..120)
            .map(|i| {
                let x = f64::from(i);
                5.0 + 300.0 * (-((x - 40.0) / 2.0f64).powi(2)).exp()
                    + 200.0 * (-((x - 60.0) / 2.0f64).powi(2)).exp()
            })
            .collect();
        Histogram::from_counts(&counts)
    }

    fn fitted_single() -> (Histogram, Roi) {
        let hist = single();
        let mut roi = Roi::new(FitSettings::default());
        assert!(roi.set_data(&hist, 45, 61));
        assert!(roi.auto_fit(&hist, &LevenbergMarquardt::default()));
        (hist, roi)
    }

    #[test]
    fn test_set_data_builds_edges() {
        let hist = single();
        let mut roi = Roi::new(FitSettings::default());
        assert_eq!(roi.state(), RoiState::Empty);
        assert!(roi.set_data(&hist, 45, 61));
        assert_eq!(roi.state(), RoiState::BackgroundOnly);
        assert_eq!((roi.lb().left(), roi.lb().right()), (45, 47));
        assert_eq!((roi.rb().left(), roi.rb().right()), (59, 61));
        assert_eq!(roi.peak_zone(), (48, 58));
        assert!(!roi.set_data(&hist, 300, 400));
        assert_eq!(roi.left(), 45);
    }

    #[test]
    fn test_auto_fit_single_peak() {
        let (_, roi) = fitted_single();
        assert_eq!(roi.state(), RoiState::HasPeaks(1));
        let peak = roi.peaks().values().next().unwrap();
        assert_abs_diff_eq!(peak.center().value(), 53.0, epsilon = 1.0);
        assert!(peak.sum4().is_valid());
        assert_eq!(peak.sum4().quality(), 1);
    }

    #[test]
    fn test_auto_fit_doublet() {
        let hist = doublet();
        let mut roi = Roi::new(FitSettings::default());
        assert!(roi.set_data(&hist, 25, 75));
        assert!(roi.auto_fit(&hist, &LevenbergMarquardt::default()));
        let centers: Vec<f64> = roi.peaks().keys().map(|k| k.0).collect();
        assert_eq!(centers.len(), 2);
        assert_abs_diff_eq!(centers[0], 40.0, epsilon = 0.5);
        assert_abs_diff_eq!(centers[1], 60.0, epsilon = 0.5);
        assert!(roi.chi_squared(&hist) < 5.0);
    }

    #[test]
    fn test_flat_region_stays_background_only() {
        let hist = Histogram::from_counts(&[7.0; 40]);
        let mut roi = Roi::new(FitSettings::default());
        assert!(roi.set_data(&hist, 5, 30));
        assert!(!roi.auto_fit(&hist, &LevenbergMarquardt::default()));
        assert_eq!(roi.state(), RoiState::BackgroundOnly);
        assert_abs_diff_eq!(roi.background_at(17.0), 7.0, epsilon = 1e-9);
    }

    #[test]
    fn test_remove_last_peak_reverts_to_background() {
        let (hist, mut roi) = fitted_single();
        let center = roi.peaks().keys().next().unwrap().0;
        let lm = LevenbergMarquardt::default();
        assert!(!roi.remove_peaks(&hist, &lm, &[center + 5.0]));
        assert!(roi.remove_peaks(&hist, &lm, &[center]));
        assert_eq!(roi.state(), RoiState::BackgroundOnly);
    }

    #[test]
    fn test_add_peak_keeps_manual_window() {
        let hist = doublet();
        let lm = LevenbergMarquardt::default();
        let mut roi = Roi::new(FitSettings::default());
        assert!(roi.set_data(&hist, 25, 50));
        assert!(roi.auto_fit(&hist, &lm));
        assert_eq!(roi.state(), RoiState::HasPeaks(1));

        assert!(roi.add_peak(&hist, &lm, 57, 63));
        assert!(roi.right() >= 63 + 3);
        assert_eq!(roi.state(), RoiState::HasPeaks(2));
        let added = roi.peaks().values().last().unwrap();
        assert_eq!((added.sum4().left(), added.sum4().right()), (57, 63));
        assert_abs_diff_eq!(added.center().value(), 60.0, epsilon = 0.5);
    }

    #[test]
    fn test_adjust_bounds_refits_survivors() {
        let hist = doublet();
        let lm = LevenbergMarquardt::default();
        let mut roi = Roi::new(FitSettings::default());
        assert!(roi.set_data(&hist, 25, 75));
        assert!(roi.auto_fit(&hist, &lm));
        assert!(roi.adjust_bounds(&hist, &lm, 25, 50));
        assert_eq!((roi.left(), roi.right()), (25, 50));
        assert_eq!(roi.state(), RoiState::HasPeaks(1));
    }

    #[test]
    fn test_adjust_edges() {
        let (hist, mut roi) = fitted_single();
        let lm = LevenbergMarquardt::default();
        assert!(!roi.adjust_lb(&hist, &lm, 50, 54));
        assert!(roi.adjust_lb(&hist, &lm, 40, 44));
        assert_eq!(roi.left(), 40);
        assert!(roi.adjust_rb(&hist, &lm, 62, 66));
        assert_eq!(roi.right(), 66);
        assert_eq!(roi.state(), RoiState::HasPeaks(1));
        assert!(!roi.adjust_rb(&hist, &lm, 52, 60));
    }

    #[test]
    fn test_replace_hypermet() {
        let (hist, mut roi) = fitted_single();
        let center = roi.peaks().keys().next().unwrap().0;
        let replacement = Hypermet::gaussian(52.5, 150.0, 1.0);
        assert!(!roi.replace_hypermet(&hist, center + 3.0, replacement.clone()));
        assert!(roi.replace_hypermet(&hist, center, replacement));
        assert!(roi.contains_peak(52.5));
        assert!(!roi.replace_hypermet(&hist, 52.5, Hypermet::gaussian(10.0, 1.0, 1.0)));
    }

    #[test]
    fn test_record_restore() {
        let (hist, roi) = fitted_single();
        let record = roi.record();
        let restored = Roi::restore(&hist, &record).unwrap();
        assert_eq!((restored.left(), restored.right()), (roi.left(), roi.right()));
        assert_eq!(restored.lb(), roi.lb());
        assert_eq!(restored.rb(), roi.rb());
        assert_eq!(restored.background(), roi.background());
        let keys = |r: &Roi| r.peaks().keys().copied().collect::<Vec<_>>();
        assert_eq!(keys(&restored), keys(&roi));
        for (a, b) in restored.peaks().values().zip(roi.peaks().values()) {
            assert_eq!(a.area_sum4().value(), b.area_sum4().value());
        }
        assert!(Roi::restore(&Histogram::from_counts(&[1.0; 20]), &record).is_none());
    }

    #[test]
    fn test_residual_refinement_never_worsens_fit() {
        let (hist, plain) = fitted_single();
        let mut refined = Roi::new(FitSettings::default().with_residual_refine(true));
        assert!(refined.set_data(&hist, 45, 61));
        assert!(refined.auto_fit(&hist, &LevenbergMarquardt::default()));
        assert!(!refined.peaks().is_empty());
        assert!(refined.chi_squared(&hist) <= plain.chi_squared(&hist) + 1e-9);
    }

    #[test]
    fn test_sum4_only() {
        let hist = single();
        let mut roi = Roi::new(FitSettings::default().with_sum4_only(true));
        assert!(roi.set_data(&hist, 45, 61));
        assert!(roi.auto_fit(&hist, &LevenbergMarquardt::default()));
        let peak = roi.peaks().values().next().unwrap();
        assert!(!peak.hypermet().height_finite_positive());
        assert_eq!(peak.center(), peak.sum4().centroid());
    }
}
