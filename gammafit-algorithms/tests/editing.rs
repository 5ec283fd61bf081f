use approx::assert_abs_diff_eq;
use gammafit_algorithms::{CancelToken, FitSettings, Fitter, Hypermet, RoiState, Spectrum};

/// Gaussian doublet at 100 and 130 plus an isolated peak at 220.
fn spectrum() -> Spectrum {
    let counts: Vec<f64> = (0..300)
        .map(|i| {
            let x = f64::from(i);
            let g = |c: f64, h: f64| h * (-((x - c) / 1.5f64).powi(2)).exp();
            4.0 + g(100.0, 400.0) + g(130.0, 250.0) + g(220.0, 300.0)
        })
        .collect();
    Spectrum::new(counts).unwrap().with_times(100.0, 101.0)
}

fn fitted() -> Fitter {
    let mut fitter = Fitter::new(FitSettings::default());
    fitter.set_data(&spectrum());
    let cancel = CancelToken::new();
    fitter.find_regions(&cancel);
    fitter.auto_fit(&cancel, |_| {});
    fitter
}

#[test]
fn test_all_peaks_found() {
    let fitter = fitted();
    let centers: Vec<f64> = fitter.peaks().keys().map(|k| k.0).collect();
    assert_eq!(centers.len(), 3);
    for (found, expected) in centers.iter().zip([100.0, 130.0, 220.0]) {
        assert_abs_diff_eq!(*found, expected, epsilon = 0.5);
    }
    for peak in fitter.peaks().values() {
        assert!(peak.cps_best().value() > 0.0);
    }
}

#[test]
fn test_remove_only_peak_deletes_region() {
    let mut fitter = fitted();
    let regions = fitter.regions().len();
    let center = *fitter.peaks().keys().last().unwrap();
    assert!(fitter.remove_peaks(&[center.0], &CancelToken::new()));
    assert_eq!(fitter.regions().len(), regions - 1);
    assert!(fitter.parent_of(center.0).is_none());
}

#[test]
fn test_add_peak_after_removal_creates_region() {
    let mut fitter = fitted();
    let cancel = CancelToken::new();
    let center = fitter.peaks().keys().last().unwrap().0;
    assert!(fitter.remove_peaks(&[center], &cancel));
    let regions = fitter.regions().len();

    assert!(fitter.add_peak(217, 223, &cancel));
    assert_eq!(fitter.regions().len(), regions + 1);
    let key = fitter.parent_of(fitter.peaks().keys().last().unwrap().0).unwrap();
    let roi = fitter.region(key).unwrap();
    assert!(roi.left() <= 217 && roi.right() >= 223);
    assert_eq!(roi.state(), RoiState::HasPeaks(1));
    assert_abs_diff_eq!(fitter.peaks().keys().last().unwrap().0, 220.0, epsilon = 0.5);
}

#[test]
fn test_add_peak_rejects_inverted_window() {
    let mut fitter = fitted();
    let before = fitter.peak_count();
    assert!(!fitter.add_peak(223, 217, &CancelToken::new()));
    assert_eq!(fitter.peak_count(), before);
}

#[test]
fn test_replace_and_delete() {
    let mut fitter = fitted();
    let center = fitter.peaks().keys().last().unwrap().0;
    let key = fitter.parent_of(center).unwrap();
    assert!(fitter.replace_hypermet(center, Hypermet::gaussian(219.5, 280.0, 1.5)));
    assert!(fitter.parent_of(219.5).is_some());
    assert!(fitter.delete_roi(key));
    assert!(!fitter.delete_roi(key));
}

#[test]
fn test_adjust_bounds_rekeys_region() {
    let mut fitter = fitted();
    let center = fitter.peaks().keys().last().unwrap().0;
    let key = fitter.parent_of(center).unwrap();
    let right = fitter.region(key).unwrap().right();
    assert!(fitter.adjust_bounds(key, key + 2, right, &CancelToken::new()));
    assert!(fitter.region(key).is_none());
    assert_eq!(fitter.parent_of(fitter.peaks().keys().last().unwrap().0), Some(key + 2));
}

#[test]
fn test_found_regions_touch() {
    let fitter = fitted();
    let bounds: Vec<(usize, usize)> = fitter
        .regions()
        .values()
        .map(|r| (r.left(), r.right()))
        .collect();
    assert!(bounds.len() >= 2);
    for pair in bounds.windows(2) {
        assert_eq!(pair[0].1 + 1, pair[1].0, "gap between {:?}", pair);
    }
}

#[test]
fn test_adjust_rejects_overlap_with_neighbour() {
    let mut fitter = fitted();
    let keys: Vec<usize> = fitter.regions().keys().copied().collect();
    assert!(keys.len() >= 2);
    let right = fitter.region(keys[1]).unwrap().right();
    let before: Vec<(usize, usize)> = fitter
        .regions()
        .values()
        .map(|r| (r.left(), r.right()))
        .collect();
    assert!(!fitter.adjust_bounds(keys[1], keys[0], right, &CancelToken::new()));
    let after: Vec<(usize, usize)> = fitter
        .regions()
        .values()
        .map(|r| (r.left(), r.right()))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn test_records_restore() {
    let fitter = fitted();
    let records = fitter.records();
    let mut copy = Fitter::new(FitSettings::default());
    copy.set_data(&spectrum());
    assert_eq!(copy.restore(&records), fitter.regions().len());
    let original: Vec<f64> = fitter.peaks().keys().map(|k| k.0).collect();
    let restored: Vec<f64> = copy.peaks().keys().map(|k| k.0).collect();
    assert_eq!(original, restored);
}
