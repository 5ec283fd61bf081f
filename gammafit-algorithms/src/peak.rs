//! Reconciliation of the SUM4 and Hypermet results for one peak.

use std::cmp::Ordering;
use std::fmt;

use gammafit_core::{AreaPolicy, FitSettings, UncertainValue};

use crate::hypermet::Hypermet;
use crate::sum4::Sum4;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Map key ordering peaks by center.
///
/// Uses the IEEE total order, so every value, NaN included, has a place.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CenterKey(pub f64);

impl PartialEq for CenterKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CenterKey {}

impl PartialOrd for CenterKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CenterKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for CenterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// Relative error at or below which a value earns grade 1.
const GOOD_RELATIVE_ERROR: f64 = 0.5;

/// Grade of a derived value: 1 precise, 2 unknown uncertainty, 3 imprecise.
fn grade(value: UncertainValue) -> u8 {
    let unc = value.uncertainty();
    if !unc.is_finite() || unc == 0.0 {
        2
    } else if unc <= GOOD_RELATIVE_ERROR * value.value().abs() {
        1
    } else {
        3
    }
}

/// A fitted peak in external units.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Peak {
    hypermet: Hypermet,
    sum4: Sum4,
    center: UncertainValue,
    energy: UncertainValue,
    fwhm: UncertainValue,
    area_sum4: UncertainValue,
    area_hyp: UncertainValue,
    area_best: UncertainValue,
    cps_sum4: UncertainValue,
    cps_hyp: UncertainValue,
    cps_best: UncertainValue,
    quality_energy: u8,
    quality_fwhm: u8,
}

impl Peak {
    /// Derives the external view from both estimators.
    #[must_use]
    pub fn new(hypermet: Hypermet, sum4: Sum4, settings: &FitSettings) -> Self {
        let converged = hypermet.height_finite_positive();
        let mut center = if converged {
            hypermet.position()
        } else {
            sum4.centroid()
        };
        if !center.uncertainty().is_finite() {
            center = center.with_uncertainty(sum4.centroid().uncertainty());
        }

        let to_energy = |channel: f64| {
            settings
                .energy_calibration
                .transform_bits(channel, settings.bits)
        };
        let c = center.value();
        let half_unc = 0.5 * center.uncertainty();
        let energy = UncertainValue::new(
            to_energy(c),
            (to_energy(c + half_unc) - to_energy(c - half_unc)).abs(),
        );

        let channel_fwhm = if converged {
            hypermet.fwhm_channels()
        } else {
            sum4.fwhm()
        };
        let fwhm = if channel_fwhm.value() > 0.0 {
            let half = 0.5 * channel_fwhm.value();
            let value = to_energy(c + half) - to_energy(c - half);
            let relative = channel_fwhm.uncertainty() / channel_fwhm.value();
            UncertainValue::new(value, value.abs() * relative)
        } else {
            UncertainValue::new(0.0, f64::NAN)
        };

        let area_sum4 = sum4.peak_area();
        let area_hyp = if converged {
            hypermet.area()
        } else {
            UncertainValue::new(0.0, f64::NAN)
        };
        let area_best = match settings.area_policy {
            AreaPolicy::HypermetWhenConverged if converged && area_hyp.value().is_finite() => {
                area_hyp
            }
            _ => area_sum4,
        };
        let rate = |area: UncertainValue| match settings.live_time() {
            Some(live) => area / live,
            None => UncertainValue::new(0.0, f64::NAN),
        };

        Self {
            quality_energy: grade(energy),
            quality_fwhm: grade(fwhm),
            cps_sum4: rate(area_sum4),
            cps_hyp: rate(area_hyp),
            cps_best: rate(area_best),
            hypermet,
            sum4,
            center,
            energy,
            fwhm,
            area_sum4,
            area_hyp,
            area_best,
        }
    }

    /// Map key for this peak.
    #[must_use]
    pub fn key(&self) -> CenterKey {
        CenterKey(self.center.value())
    }

    #[must_use]
    pub fn hypermet(&self) -> &Hypermet {
        &self.hypermet
    }

    #[must_use]
    pub fn sum4(&self) -> &Sum4 {
        &self.sum4
    }

    /// Center in channels.
    #[must_use]
    pub fn center(&self) -> UncertainValue {
        self.center
    }

    #[must_use]
    pub fn energy(&self) -> UncertainValue {
        self.energy
    }

    /// FWHM in energy units (channels without a calibration).
    #[must_use]
    pub fn fwhm(&self) -> UncertainValue {
        self.fwhm
    }

    #[must_use]
    pub fn area_sum4(&self) -> UncertainValue {
        self.area_sum4
    }

    #[must_use]
    pub fn area_hyp(&self) -> UncertainValue {
        self.area_hyp
    }

    #[must_use]
    pub fn area_best(&self) -> UncertainValue {
        self.area_best
    }

    #[must_use]
    pub fn cps_sum4(&self) -> UncertainValue {
        self.cps_sum4
    }

    #[must_use]
    pub fn cps_hyp(&self) -> UncertainValue {
        self.cps_hyp
    }

    #[must_use]
    pub fn cps_best(&self) -> UncertainValue {
        self.cps_best
    }

    #[must_use]
    pub fn quality_energy(&self) -> u8 {
        self.quality_energy
    }

    #[must_use]
    pub fn quality_fwhm(&self) -> u8 {
        self.quality_fwhm
    }

    /// Quantifiable SUM4 area with precise energy and FWHM.
    #[must_use]
    pub fn good(&self) -> bool {
        self.sum4.quality() == 1 && self.quality_energy == 1 && self.quality_fwhm == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::FitParam;
    use crate::sum4::Sum4Edge;
    use approx::assert_relative_eq;
    use gammafit_core::{Calibration, Histogram};

    fn sum4() -> Sum4 {
        let mut counts = vec![10.0; 40];
        for (i, v) in [10.0, 50.0, 200.0, 60.0, 10.0].iter().enumerate() {
            counts[20 + i] += v;
        }
        let hist = Histogram::from_counts(&counts);
        let lb = Sum4Edge::new(&hist, 5, 14);
        let rb = Sum4Edge::new(&hist, 30, 39);
        Sum4::new(&hist, 20, 24, &lb, &rb)
    }

    fn converged() -> Hypermet {
        let mut hyp = Hypermet::gaussian(22.3, 200.0, 1.2);
        hyp.center.uncertainty = 0.05;
        hyp.height.uncertainty = 4.0;
        hyp.width.uncertainty = 0.02;
        hyp
    }

    #[test]
    fn test_center_falls_back_to_sum4() {
        let mut hyp = converged();
        hyp.invalidate();
        let peak = Peak::new(hyp, sum4(), &FitSettings::default());
        assert_eq!(peak.center(), sum4().centroid());
        assert_ne!(peak.center().value(), 22.3);
        assert!(peak.area_hyp().uncertainty().is_nan());
    }

    #[test]
    fn test_center_prefers_converged_hypermet() {
        let peak = Peak::new(converged(), sum4(), &FitSettings::default());
        assert_relative_eq!(peak.center().value(), 22.3);
        assert_relative_eq!(peak.center().uncertainty(), 0.05);
        assert_relative_eq!(
            peak.fwhm().value(),
            converged().fwhm_channels().value(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_missing_uncertainty_borrowed_from_sum4() {
        let mut hyp = converged();
        hyp.center = FitParam::free(22.3);
        let peak = Peak::new(hyp, sum4(), &FitSettings::default());
        assert_relative_eq!(peak.center().value(), 22.3);
        assert_relative_eq!(peak.center().uncertainty(), sum4().centroid().uncertainty());
    }

    #[test]
    fn test_energy_through_calibration() {
        let settings = FitSettings::default()
            .with_energy_calibration(Calibration::linear(1.0, 0.5, 0).unwrap());
        let peak = Peak::new(converged(), sum4(), &settings);
        assert_relative_eq!(peak.energy().value(), 1.0 + 0.5 * 22.3);
        assert_relative_eq!(peak.energy().uncertainty(), 0.5 * 0.05, epsilon = 1e-12);
        assert_relative_eq!(
            peak.fwhm().value(),
            0.5 * converged().fwhm_channels().value(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_area_policy_and_rates() {
        let settings = FitSettings::default().with_times(100.0, 110.0);
        let peak = Peak::new(converged(), sum4(), &settings);
        assert_eq!(peak.area_best(), peak.area_sum4());
        assert_relative_eq!(peak.cps_best().value(), peak.area_sum4().value() / 100.0);

        let settings = settings.with_area_policy(AreaPolicy::HypermetWhenConverged);
        let peak = Peak::new(converged(), sum4(), &settings);
        assert_eq!(peak.area_best(), peak.area_hyp());

        let peak = Peak::new(converged(), sum4(), &FitSettings::default());
        assert!(peak.cps_best().uncertainty().is_nan());
    }

    #[test]
    fn test_quality_grades() {
        assert_eq!(grade(UncertainValue::new(10.0, 5.0)), 1);
        assert_eq!(grade(UncertainValue::new(10.0, 0.0)), 2);
        assert_eq!(grade(UncertainValue::new(10.0, f64::NAN)), 2);
        assert_eq!(grade(UncertainValue::new(10.0, 6.0)), 3);
        let peak = Peak::new(converged(), sum4(), &FitSettings::default());
        assert_eq!(peak.sum4().quality(), 1);
        assert!(peak.good());
    }

    #[test]
    fn test_center_key_order() {
        let mut keys = vec![CenterKey(3.0), CenterKey(-1.0), CenterKey(2.5)];
        keys.sort();
        assert_eq!(keys, vec![CenterKey(-1.0), CenterKey(2.5), CenterKey(3.0)]);
    }
}
