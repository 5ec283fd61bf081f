//! SUM4 closed-form peak integration.
//!
//! The background under a peak is the straight line between the averages
//! of two flanking edge windows. Net area, centroid and FWHM follow by
//! summation; the Currie detection limits grade the result.
#![allow(clippy::cast_precision_loss)]

use gammafit_core::{Curve, Histogram, Polynomial, UncertainValue};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A background sampling window.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sum4Edge {
    left: usize,
    right: usize,
    min: f64,
    max: f64,
    sum: f64,
    average: UncertainValue,
}

impl Sum4Edge {
    /// Summarizes the inclusive channel range `[left, right]`.
    ///
    /// Returns the default (zero-width) edge when the range is inverted or
    /// not fully inside the histogram.
    #[must_use]
    pub fn new(hist: &Histogram, left: usize, right: usize) -> Self {
        if left > right {
            return Self::default();
        }
        let Some((l, r)) = hist.clamp_range(left, right) else {
            return Self::default();
        };
        if (l, r) != (left, right) {
            return Self::default();
        }
        let Some((_, y)) = hist.window(l, r) else {
            return Self::default();
        };
        let sum: f64 = y.iter().sum();
        let n = y.len() as f64;
        Self {
            left: l,
            right: r,
            min: y.iter().copied().fold(f64::INFINITY, f64::min),
            max: y.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            sum,
            // Poisson: var(sum) = sum, var(avg) = sum / n²
            average: UncertainValue::new(sum / n, sum.max(0.0).sqrt() / n),
        }
    }

    #[must_use]
    pub fn left(&self) -> usize {
        self.left
    }

    #[must_use]
    pub fn right(&self) -> usize {
        self.right
    }

    /// Number of channels; zero for an invalid edge.
    #[must_use]
    pub fn width(&self) -> usize {
        if self.average.is_finite() {
            self.right - self.left + 1
        } else {
            0
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.width() > 0
    }

    #[must_use]
    pub fn min(&self) -> f64 {
        self.min
    }

    #[must_use]
    pub fn max(&self) -> f64 {
        self.max
    }

    #[must_use]
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Mean counts per channel.
    #[must_use]
    pub fn average(&self) -> UncertainValue {
        self.average
    }

    /// Variance of the mean.
    #[must_use]
    pub fn variance(&self) -> f64 {
        self.average.variance()
    }

    /// Center of the window.
    #[must_use]
    pub fn midpoint(&self) -> f64 {
        0.5 * (self.left as f64 + self.right as f64)
    }

    /// Whether the window overlaps `[left, right]`.
    #[must_use]
    pub fn overlaps(&self, left: usize, right: usize) -> bool {
        self.is_valid() && self.left <= right && left <= self.right
    }
}

/// Currie detection limits for a given background variance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrieLimits {
    /// Critical level: below it nothing is detected.
    pub lc: f64,
    /// Detection limit.
    pub ld: f64,
    /// Quantification limit.
    pub lq: f64,
}

impl CurrieLimits {
    #[must_use]
    pub fn new(background_variance: f64) -> Self {
        let sigma = background_variance.sqrt();
        Self {
            lc: 2.33 * sigma,
            ld: 2.71 + 4.65 * sigma,
            lq: 50.0 * (1.0 + (1.0 + background_variance / 12.5).sqrt()),
        }
    }

    /// Quality grade of a net area, 1 (quantifiable) to 5 (not detected).
    ///
    /// Grade 3 marks inputs that cannot be graded.
    #[must_use]
    pub fn grade(&self, net_area: f64) -> u8 {
        if !net_area.is_finite() || !self.lq.is_finite() {
            3
        } else if net_area > self.lq {
            1
        } else if net_area > self.ld {
            2
        } else if net_area > self.lc {
            4
        } else {
            5
        }
    }
}

/// Result of a SUM4 integration.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sum4 {
    left: usize,
    right: usize,
    lb: Sum4Edge,
    rb: Sum4Edge,
    background: Polynomial,
    gross_area: UncertainValue,
    background_area: UncertainValue,
    peak_area: UncertainValue,
    centroid: UncertainValue,
    fwhm: UncertainValue,
    quality: u8,
}

impl Sum4 {
    /// Integrates `[left, right]` against the flanking edges.
    ///
    /// Degenerate input (inverted or uncovered range, invalid edges, edges
    /// overlapping the peak) yields `Sum4::default()`, recognisable by
    /// `peak_width() == 0`.
    #[must_use]
    pub fn new(hist: &Histogram, left: usize, right: usize, lb: &Sum4Edge, rb: &Sum4Edge) -> Self {
        if left > right || !lb.is_valid() || !rb.is_valid() {
            return Self::default();
        }
        if lb.overlaps(left, right) || rb.overlaps(left, right) {
            return Self::default();
        }
        let Some((x, y)) = hist.window(left, right) else {
            return Self::default();
        };
        if x.len() != right - left + 1 {
            return Self::default();
        }

        let width = x.len() as f64;
        let (xl, xr) = (left as f64, right as f64);
        let background = Polynomial::through(xl, lb.average().value(), xr, rb.average().value());

        let gross: f64 = y.iter().sum();
        let gross_area = UncertainValue::from_counts(gross);

        let bg_value = width * (lb.average().value() + rb.average().value()) / 2.0;
        let bg_variance = width * width / 4.0 * (lb.variance() + rb.variance());
        let background_area = UncertainValue::new(bg_value, bg_variance.sqrt());
        let peak_area = gross_area - background_area;

        let (mut sum_net, mut sum_xnet) = (0.0, 0.0);
        for (&xi, &yi) in x.iter().zip(y) {
            let net = yi - background.evaluate(xi);
            sum_net += net;
            sum_xnet += xi * net;
        }

        let (centroid, fwhm) = if sum_net > 0.0 {
            let mean = sum_xnet / sum_net;
            let variance = x
                .iter()
                .zip(y)
                .map(|(&xi, &yi)| (xi - mean).powi(2) * (yi - background.evaluate(xi)))
                .sum::<f64>()
                / sum_net;
            if variance > 0.0 {
                let fwhm = 2.0 * (variance * 4f64.ln()).sqrt();
                (
                    UncertainValue::new(mean, (variance / sum_net).sqrt()),
                    UncertainValue::new(fwhm, fwhm / (2.0 * sum_net).sqrt()),
                )
            } else {
                (UncertainValue::new(mean, f64::NAN), UncertainValue::new(0.0, f64::NAN))
            }
        } else {
            let mid = 0.5 * (xl + xr);
            (UncertainValue::new(mid, f64::NAN), UncertainValue::new(0.0, f64::NAN))
        };

        let quality = CurrieLimits::new(bg_variance).grade(peak_area.value());

        Self {
            left,
            right,
            lb: lb.clone(),
            rb: rb.clone(),
            background,
            gross_area,
            background_area,
            peak_area,
            centroid,
            fwhm,
            quality,
        }
    }

    #[must_use]
    pub fn left(&self) -> usize {
        self.left
    }

    #[must_use]
    pub fn right(&self) -> usize {
        self.right
    }

    /// Channels integrated; zero for an invalid result.
    #[must_use]
    pub fn peak_width(&self) -> usize {
        if self.quality == 0 {
            0
        } else {
            self.right - self.left + 1
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.peak_width() > 0
    }

    #[must_use]
    pub fn lb(&self) -> &Sum4Edge {
        &self.lb
    }

    #[must_use]
    pub fn rb(&self) -> &Sum4Edge {
        &self.rb
    }

    /// Linear background through the edge averages.
    #[must_use]
    pub fn background(&self) -> &Polynomial {
        &self.background
    }

    #[must_use]
    pub fn gross_area(&self) -> UncertainValue {
        self.gross_area
    }

    #[must_use]
    pub fn background_area(&self) -> UncertainValue {
        self.background_area
    }

    /// Background variance used for the Currie limits.
    #[must_use]
    pub fn background_variance(&self) -> f64 {
        self.background_area.variance()
    }

    /// Net peak area.
    #[must_use]
    pub fn peak_area(&self) -> UncertainValue {
        self.peak_area
    }

    #[must_use]
    pub fn centroid(&self) -> UncertainValue {
        self.centroid
    }

    /// FWHM in channels from the second moment.
    #[must_use]
    pub fn fwhm(&self) -> UncertainValue {
        self.fwhm
    }

    /// Currie grade, 1 (best) to 5; 0 for an invalid result.
    #[must_use]
    pub fn quality(&self) -> u8 {
        self.quality
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    /// Flat background of `level` with `bump` added from channel 20.
    fn bumped(level: f64, bump: &[f64]) -> Histogram {
        let mut counts = vec![level; 40];
        for (i, b) in bump.iter().enumerate() {
            counts[20 + i] += b;
        }
        Histogram::from_counts(&counts)
    }

    fn integrate(hist: &Histogram) -> Sum4 {
        // 10-channel edges, 5-channel peak window
        let lb = Sum4Edge::new(hist, 5, 14);
        let rb = Sum4Edge::new(hist, 30, 39);
        Sum4::new(hist, 20, 24, &lb, &rb)
    }

    #[test]
    fn test_edge_statistics() {
        let hist = Histogram::from_counts(&[4.0, 9.0, 16.0, 1.0]);
        let edge = Sum4Edge::new(&hist, 0, 3);
        assert_eq!(edge.width(), 4);
        assert_relative_eq!(edge.sum(), 30.0);
        assert_relative_eq!(edge.min(), 1.0);
        assert_relative_eq!(edge.max(), 16.0);
        assert_relative_eq!(edge.average().value(), 7.5);
        assert_relative_eq!(edge.average().uncertainty(), 30f64.sqrt() / 4.0);
        assert!(!Sum4Edge::new(&hist, 3, 1).is_valid());
        assert!(!Sum4Edge::new(&hist, 2, 9).is_valid());
    }

    #[test]
    fn test_flat_background_has_no_net_area() {
        let sum4 = integrate(&bumped(100.0, &[]));
        assert!(sum4.is_valid());
        assert_abs_diff_eq!(sum4.peak_area().value(), 0.0, epsilon = 1e-9);
        assert_eq!(sum4.quality(), 5);
    }

    #[test]
    fn test_symmetric_peak_centroid_and_area() {
        let sum4 = integrate(&bumped(10.0, &[10.0, 40.0, 100.0, 40.0, 10.0]));
        assert_relative_eq!(sum4.peak_area().value(), 200.0, epsilon = 1e-9);
        assert_relative_eq!(sum4.centroid().value(), 22.0, epsilon = 1e-9);
        assert!(sum4.fwhm().value() > 0.0);
        assert_relative_eq!(sum4.gross_area().value(), 250.0);
        assert_relative_eq!(sum4.background_area().value(), 50.0);
    }

    #[test]
    fn test_background_variance_formula() {
        let sum4 = integrate(&bumped(100.0, &[]));
        // var(avg) = 1000 / 100 = 10 per edge; W²/4 · (10 + 10)
        assert_relative_eq!(sum4.background_variance(), 25.0 / 4.0 * 20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_currie_grade_bands() {
        // background variance 125: LC ≈ 26.0, LD ≈ 54.7, LQ ≈ 215.8
        let limits = CurrieLimits::new(125.0);
        assert_eq!(limits.grade(-5.0), 5);
        assert_eq!(limits.grade(15.0), 5);
        assert_eq!(limits.grade(40.0), 4);
        assert_eq!(limits.grade(100.0), 2);
        assert_eq!(limits.grade(300.0), 1);
        assert_eq!(limits.grade(f64::NAN), 3);

        assert_eq!(integrate(&bumped(100.0, &[0.0, 5.0, 5.0, 5.0, 0.0])).quality(), 5);
        assert_eq!(integrate(&bumped(100.0, &[0.0, 10.0, 20.0, 10.0, 0.0])).quality(), 4);
        assert_eq!(integrate(&bumped(100.0, &[10.0, 50.0, 200.0, 50.0, 10.0])).quality(), 1);
    }

    #[test]
    fn test_degenerate_inputs_are_invalid() {
        let hist = bumped(10.0, &[]);
        let lb = Sum4Edge::new(&hist, 5, 14);
        let rb = Sum4Edge::new(&hist, 30, 39);
        assert_eq!(Sum4::new(&hist, 24, 20, &lb, &rb).peak_width(), 0);
        assert_eq!(Sum4::new(&hist, 20, 80, &lb, &rb).peak_width(), 0);
        assert_eq!(Sum4::new(&hist, 10, 24, &lb, &rb).peak_width(), 0);
        assert_eq!(Sum4::new(&hist, 20, 24, &Sum4Edge::default(), &rb).peak_width(), 0);
    }
}
