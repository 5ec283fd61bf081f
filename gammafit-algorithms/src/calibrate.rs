//! Energy and FWHM calibrations fitted from peaks.

use gammafit_core::{Calibration, Curve, CurveFunction, Error, Polynomial, Result, SqrtPoly};
use log::info;

use crate::optimizer::Optimizer;
use crate::peak::Peak;

/// A calibration reference: a fitted channel and its known energy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    pub channel: f64,
    pub channel_sigma: f64,
    pub energy: f64,
    pub energy_sigma: f64,
}

impl CalibrationPoint {
    /// Pairs a fitted peak with a reference energy.
    #[must_use]
    pub fn from_peak(peak: &Peak, energy: f64, energy_sigma: f64) -> Self {
        let center = peak.center();
        Self {
            channel: center.value(),
            channel_sigma: center.uncertainty(),
            energy,
            energy_sigma,
        }
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        fallback
    }
}

/// Fits a channel → energy polynomial of `degree` through `points`.
///
/// # Errors
/// Fails with fewer than `degree + 1` points or when the fit diverges.
pub fn energy_calibration(
    optimizer: &dyn Optimizer,
    points: &[CalibrationPoint],
    degree: usize,
    bits: u16,
) -> Result<Calibration> {
    if points.len() < degree + 1 {
        return Err(Error::Calibration(format!(
            "need {} points for degree {degree}, got {}",
            degree + 1,
            points.len()
        )));
    }
    let x: Vec<f64> = points.iter().map(|p| p.channel).collect();
    let y: Vec<f64> = points.iter().map(|p| p.energy).collect();
    let sigma_x: Vec<f64> = points.iter().map(|p| finite_or(p.channel_sigma, 0.0)).collect();
    let sigma_y: Vec<f64> = points.iter().map(|p| finite_or(p.energy_sigma, 1.0)).collect();
    let weights: Vec<f64> = sigma_y.iter().map(|s| 1.0 / (s * s)).collect();

    let mut poly = Polynomial::fit_linear(&x, &y, Some(weights.as_slice()), degree, 0.0)
        .ok_or_else(|| Error::Calibration("singular energy calibration".to_string()))?;
    let report = optimizer.fit_curve(&mut poly, &x, &y, &sigma_x, &sigma_y);
    if !report.committed {
        return Err(Error::Calibration("energy calibration fit failed".to_string()));
    }
    info!(
        "energy calibration from {} points, χ²/ν = {:.3}",
        points.len(),
        report.chi_squared
    );
    Calibration::new(CurveFunction::Polynomial(poly), bits, "keV")
}

/// Fits an energy → FWHM `SqrtPoly` of `degree` through well-measured
/// peaks (both quality grades 1).
///
/// # Errors
/// Fails with too few usable peaks or when the fit diverges.
pub fn fwhm_calibration<'a>(
    optimizer: &dyn Optimizer,
    peaks: impl IntoIterator<Item = &'a Peak>,
    degree: usize,
    bits: u16,
) -> Result<Calibration> {
    let usable: Vec<&Peak> = peaks
        .into_iter()
        .filter(|p| p.quality_energy() == 1 && p.quality_fwhm() == 1)
        .collect();
    if usable.len() < degree + 1 {
        return Err(Error::Calibration(format!(
            "need {} well-measured peaks for degree {degree}, got {}",
            degree + 1,
            usable.len()
        )));
    }
    let x: Vec<f64> = usable.iter().map(|p| p.energy().value()).collect();
    let y: Vec<f64> = usable.iter().map(|p| p.fwhm().value()).collect();
    let sigma_x: Vec<f64> = usable.iter().map(|p| p.energy().uncertainty()).collect();
    let sigma_y: Vec<f64> = usable.iter().map(|p| p.fwhm().uncertainty()).collect();

    // start from a linear fit of FWHM² against energy
    let squared: Vec<f64> = y.iter().map(|w| w * w).collect();
    let start = Polynomial::fit_linear(&x, &squared, None, degree, 0.0)
        .ok_or_else(|| Error::Calibration("singular FWHM calibration".to_string()))?;
    let mut curve = SqrtPoly::new(start.coeffs().to_vec());
    let report = optimizer.fit_curve(&mut curve, &x, &y, &sigma_x, &sigma_y);
    if !report.committed {
        return Err(Error::Calibration("FWHM calibration fit failed".to_string()));
    }
    info!(
        "FWHM calibration from {} peaks, χ²/ν = {:.3}",
        usable.len(),
        report.chi_squared
    );
    Calibration::new(CurveFunction::SqrtPoly(curve), bits, "keV")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypermet::{fwhm_to_width, Hypermet};
    use crate::optimizer::LevenbergMarquardt;
    use crate::sum4::Sum4;
    use approx::assert_relative_eq;
    use gammafit_core::FitSettings;

    #[test]
    fn test_energy_calibration_recovers_line() {
        let points: Vec<CalibrationPoint> = [(100.0, 61.0), (500.0, 301.0), (1500.0, 901.0)]
            .iter()
            .map(|&(channel, energy)| CalibrationPoint {
                channel,
                channel_sigma: 0.05,
                energy,
                energy_sigma: 0.01,
            })
            .collect();
        let cal = energy_calibration(&LevenbergMarquardt::default(), &points, 1, 12).unwrap();
        assert!(cal.is_valid());
        assert_relative_eq!(cal.transform(1000.0), 601.0, epsilon = 1e-6);
        assert_eq!(cal.bits(), 12);
    }

    #[test]
    fn test_energy_calibration_needs_points() {
        let points = [CalibrationPoint {
            channel: 10.0,
            channel_sigma: f64::NAN,
            energy: 5.0,
            energy_sigma: f64::NAN,
        }];
        assert!(energy_calibration(&LevenbergMarquardt::default(), &points, 1, 0).is_err());
    }

    #[test]
    fn test_fwhm_calibration_from_peaks() {
        let settings = FitSettings::default();
        let peaks: Vec<Peak> = [100.0, 400.0, 800.0, 1200.0, 1600.0]
            .iter()
            .map(|&center: &f64| {
                let fwhm = (1.0 + 0.002 * center).sqrt();
                let mut hyp = Hypermet::gaussian(center, 500.0, fwhm_to_width(fwhm));
                hyp.center.uncertainty = 0.01;
                hyp.height.uncertainty = 5.0;
                hyp.width.uncertainty = 0.01;
                Peak::new(hyp, Sum4::default(), &settings)
            })
            .collect();
        let cal = fwhm_calibration(&LevenbergMarquardt::default(), &peaks, 1, 0).unwrap();
        assert_relative_eq!(cal.transform(1000.0), 3f64.sqrt(), epsilon = 1e-6);
        assert!(fwhm_calibration(&LevenbergMarquardt::default(), &peaks[..1], 1, 0).is_err());
    }
}
