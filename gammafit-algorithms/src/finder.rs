//! Peak candidate search over smoothed histogram data.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use gammafit_core::FitSettings;

/// One accepted candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// First channel of the peak window.
    pub left: usize,
    /// Last channel of the peak window.
    pub right: usize,
    /// Interpolated position of the smoothed maximum.
    pub center: f64,
    /// Height above the local baseline, in smoothed counts.
    pub height: f64,
}

/// Derivative-based peak finder.
///
/// `lefts`, `rights` and `filtered` are parallel and sorted by position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Finder {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub smoothed: Vec<f64>,
    pub derivative: Vec<f64>,
    pub lefts: Vec<usize>,
    pub rights: Vec<usize>,
    pub filtered: Vec<f64>,
    heights: Vec<f64>,
}

impl Finder {
    /// Runs the search over `(x, y)`.
    #[must_use]
    pub fn new(x: &[f64], y: &[f64], settings: &FitSettings) -> Self {
        let mut finder = Self::default();
        finder.find(x, y, settings);
        finder
    }

    /// Replaces the data and repeats the search.
    pub fn find(&mut self, x: &[f64], y: &[f64], settings: &FitSettings) {
        let len = x.len().min(y.len());
        self.clear();
        self.x = x[..len].to_vec();
        self.y = y[..len].to_vec();
        let window = settings.smoothing_window.max(1);
        self.smoothed = moving_average(&self.y, window);
        self.derivative = central_difference(&self.smoothed);
        if len < 3 {
            return;
        }

        let s = &self.smoothed;
        for j in 1..len - 1 {
            if !(s[j] > s[j - 1] && s[j] >= s[j + 1]) {
                continue;
            }
            let excursion = (settings.finder_max_excursion * settings.fwhm_at(self.x[j])).ceil();
            let excursion = excursion.max(1.0) as usize;

            let mut l = j;
            while l > 0 && j - l < excursion && s[l - 1] < s[l] {
                l -= 1;
            }
            let mut r = j;
            while r + 1 < len && r - j < excursion && s[r + 1] < s[r] {
                r += 1;
            }

            let baseline = if r > l {
                s[l] + (s[r] - s[l]) * (j - l) as f64 / (r - l) as f64
            } else {
                s[l]
            };
            let height = s[j] - baseline;
            let threshold = settings.finder_sigma * (baseline.max(1.0) / window as f64).sqrt();
            if height < threshold || height <= 0.0 {
                continue;
            }

            let curvature = s[j - 1] - 2.0 * s[j] + s[j + 1];
            let offset = if curvature < 0.0 {
                (0.5 * (s[j - 1] - s[j + 1]) / curvature).clamp(-0.5, 0.5)
            } else {
                0.0
            };
            self.lefts.push(self.x[l] as usize);
            self.rights.push(self.x[r] as usize);
            self.filtered.push(self.x[j] + offset);
            self.heights.push(height);
        }
    }

    /// Forgets data and results.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.filtered.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filtered.is_empty()
    }

    /// Accepted candidates in position order.
    pub fn candidates(&self) -> impl Iterator<Item = Candidate> + '_ {
        (0..self.len()).map(|i| Candidate {
            left: self.lefts[i],
            right: self.rights[i],
            center: self.filtered[i],
            height: self.heights[i],
        })
    }

    /// Candidates whose center lies within `[left, right]`.
    pub fn candidates_within(
        &self,
        left: usize,
        right: usize,
    ) -> impl Iterator<Item = Candidate> + '_ {
        let (lo, hi) = (left as f64, right as f64);
        self.candidates().filter(move |c| c.center >= lo && c.center <= hi)
    }
}

/// Centered moving average; the window shrinks at the edges.
fn moving_average(y: &[f64], window: usize) -> Vec<f64> {
    let half = window / 2;
    (0..y.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(y.len() - 1);
            y[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64
        })
        .collect()
}

/// First derivative by central differences, one-sided at the ends.
fn central_difference(s: &[f64]) -> Vec<f64> {
    let n = s.len();
    (0..n)
        .map(|i| match (i.checked_sub(1), (i + 1 < n).then_some(i + 1)) {
            (Some(a), Some(b)) => 0.5 * (s[b] - s[a]),
            (None, Some(b)) => s[b] - s[i],
            (Some(a), None) => s[i] - s[a],
            (None, None) => 0.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use gammafit_core::Histogram;

    fn spectrum(background: f64, peaks: &[(usize, &[f64])]) -> Histogram {
        let mut counts = vec![background; 120];
        for (start, shape) in peaks {
            for (i, v) in shape.iter().enumerate() {
                counts[start + i] += v;
            }
        }
        Histogram::from_counts(&counts)
    }

    const SHAPE: &[f64] = &[5.0, 20.0, 80.0, 200.0, 80.0, 20.0, 5.0];

    #[test]
    fn test_single_peak_window() {
        let hist = spectrum(0.0, &[(50, SHAPE)]);
        let finder = Finder::new(&hist.x, &hist.y, &FitSettings::default());
        assert_eq!(finder.len(), 1);
        assert_relative_eq!(finder.filtered[0], 53.0);
        assert_eq!((finder.lefts[0], finder.rights[0]), (48, 58));
    }

    #[test]
    fn test_candidates_sorted() {
        let hist = spectrum(2.0, &[(80, SHAPE), (20, SHAPE)]);
        let finder = Finder::new(&hist.x, &hist.y, &FitSettings::default());
        let centers: Vec<f64> = finder.candidates().map(|c| c.center).collect();
        assert_eq!(centers.len(), 2);
        assert!(centers[0] < centers[1]);
        assert_eq!(finder.candidates_within(70, 100).count(), 1);
    }

    #[test]
    fn test_small_bump_rejected_on_high_background() {
        let hist = spectrum(1000.0, &[(60, &[10.0])]);
        let finder = Finder::new(&hist.x, &hist.y, &FitSettings::default());
        assert!(finder.is_empty());
    }

    #[test]
    fn test_excursion_limits_edges() {
        let hist = spectrum(0.0, &[(50, SHAPE)]);
        let settings = FitSettings {
            finder_max_excursion: 1.0,
            ..FitSettings::default()
        };
        let finder = Finder::new(&hist.x, &hist.y, &settings);
        assert_eq!((finder.lefts[0], finder.rights[0]), (51, 55));
    }

    #[test]
    fn test_derivative_and_smoothing() {
        let y = [0.0, 3.0, 6.0, 3.0, 0.0];
        assert_eq!(moving_average(&y, 3), vec![1.5, 3.0, 4.0, 3.0, 1.5]);
        assert_eq!(central_difference(&[0.0, 1.0, 4.0]), vec![1.0, 2.0, 3.0]);
    }
}
