//! Column-aligned text report of a fitter's peaks.

use std::fmt::Write;

use gammafit_core::UncertainValue;

use crate::fitter::Fitter;

const COLUMNS: [(&str, usize); 9] = [
    ("roi", 13),
    ("center", 18),
    ("energy", 20),
    ("fwhm", 16),
    ("area", 20),
    ("cps", 18),
    ("sum4", 5),
    ("q(E,W)", 7),
    ("good", 5),
];

fn cell(out: &mut String, text: &str, width: usize) {
    let _ = write!(out, "{text:>width$} ");
}

fn value_cell(out: &mut String, value: UncertainValue, width: usize) {
    cell(out, &value.to_string(), width);
}

/// Renders the header block and one row per peak.
#[must_use]
pub fn render(fitter: &Fitter) -> String {
    let settings = fitter.settings();
    let mut out = String::new();
    if !fitter.detector().is_empty() {
        let _ = writeln!(out, "detector: {}", fitter.detector());
    }
    let _ = writeln!(
        out,
        "live: {:.2} s  real: {:.2} s  channels: {}  regions: {}  peaks: {}  optimizer: {}",
        settings.live_seconds,
        settings.real_seconds,
        fitter.histogram().len(),
        fitter.regions().len(),
        fitter.peak_count(),
        fitter.optimizer().name(),
    );

    for (name, width) in COLUMNS {
        cell(&mut out, name, width);
    }
    out.push('\n');
    let total: usize = COLUMNS.iter().map(|(_, w)| w + 1).sum();
    out.push_str(&"-".repeat(total));
    out.push('\n');

    for roi in fitter.regions().values() {
        let bounds = format!("[{}, {}]", roi.left(), roi.right());
        for peak in roi.peaks().values() {
            cell(&mut out, &bounds, COLUMNS[0].1);
            value_cell(&mut out, peak.center(), COLUMNS[1].1);
            value_cell(&mut out, peak.energy(), COLUMNS[2].1);
            value_cell(&mut out, peak.fwhm(), COLUMNS[3].1);
            value_cell(&mut out, peak.area_best(), COLUMNS[4].1);
            value_cell(&mut out, peak.cps_best(), COLUMNS[5].1);
            cell(&mut out, &peak.sum4().quality().to_string(), COLUMNS[6].1);
            let grades = format!("{},{}", peak.quality_energy(), peak.quality_fwhm());
            cell(&mut out, &grades, COLUMNS[7].1);
            cell(&mut out, if peak.good() { "yes" } else { "no" }, COLUMNS[8].1);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gammafit_core::{CancelToken, FitSettings, Spectrum};

    #[test]
    fn test_report_rows_align() {
        let mut counts = vec![0.0; 50];
        counts.extend([5.0, 20.0, 80.0, 200.0, 80.0, 20.0, 5.0]);
        counts.extend(vec![0.0; 50]);
        let spectrum = Spectrum::new(counts)
            .unwrap()
            .with_detector("HPGe-1")
            .with_times(10.0, 12.0);
        let mut fitter = Fitter::new(FitSettings::default());
        fitter.set_data(&spectrum);
        let cancel = CancelToken::new();
        fitter.find_regions(&cancel);
        fitter.auto_fit(&cancel, |_| {});

        let report = render(&fitter);
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "detector: HPGe-1");
        assert!(lines[1].contains("peaks: 1"));
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[2].len(), lines[3].len());
        assert!(lines[4].trim_start().starts_with("[45, 61]"));
    }
}
