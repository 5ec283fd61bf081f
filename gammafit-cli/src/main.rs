//! gammafit CLI
//!
//! Fits peaks in plain-text gamma spectra and prints a report per file.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::redundant_closure_for_method_calls
)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use gammafit_algorithms::{Fitter, LevenbergMarquardt, NelderMead, Optimizer, Peak, RoiRecord};
use gammafit_core::{Calibration, CancelToken, CurveFunction, FitSettings, Polynomial, Spectrum};
use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}: {source}")]
    Input {
        path: PathBuf,
        source: gammafit_core::Error,
    },

    #[error("Core error: {0}")]
    Core(#[from] gammafit_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Least-squares backend selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// Levenberg-Marquardt (default)
    Lm,
    /// Nelder-Mead simplex
    Simplex,
}

impl Backend {
    fn build(self) -> Arc<dyn Optimizer> {
        match self {
            Backend::Lm => Arc::new(LevenbergMarquardt::default()),
            Backend::Simplex => Arc::new(NelderMead::default()),
        }
    }
}

/// Gamma spectrum peak finder and fitter.
#[derive(Parser)]
#[command(name = "gammafit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find and fit peaks in count histograms
    Fit {
        /// Input files: counts separated by whitespace or commas, `#` comments
        #[arg(required = true)]
        input: Vec<PathBuf>,

        /// JSON file with fit settings
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Print JSON instead of the text report
        #[arg(long)]
        json: bool,

        /// Finder significance threshold (standard deviations)
        #[arg(long)]
        sigma: Option<f64>,

        /// Least-squares backend
        #[arg(short, long, value_enum, default_value = "lm")]
        optimizer: Backend,

        /// Live time in seconds
        #[arg(long)]
        live_time: Option<f64>,

        /// Real time in seconds (defaults to the live time)
        #[arg(long)]
        real_time: Option<f64>,

        /// Energy calibration polynomial coefficients c0,c1,...
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        calibration: Option<Vec<f64>>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Per-run options shared by every input file.
struct FitOptions {
    settings: FitSettings,
    optimizer: Arc<dyn Optimizer>,
    live_time: Option<f64>,
    real_time: Option<f64>,
    calibration: Option<Vec<f64>>,
}

/// JSON view of one fitted file.
#[derive(Serialize)]
struct FileReport<'a> {
    file: String,
    detector: &'a str,
    optimizer: &'a str,
    peaks: Vec<&'a Peak>,
    regions: Vec<RoiRecord>,
}

/// Parses counts separated by whitespace, commas or newlines.
///
/// Text after `#` on a line is ignored.
fn parse_counts(text: &str) -> gammafit_core::Result<Vec<f64>> {
    let mut counts = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let data = line.split('#').next().unwrap_or_default();
        for token in data
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
        {
            let value: f64 = token.parse().map_err(|_| gammafit_core::Error::Parse {
                line: index + 1,
                reason: format!("not a number: `{token}`"),
            })?;
            counts.push(value);
        }
    }
    Ok(counts)
}

fn load_spectrum(path: &Path, options: &FitOptions) -> Result<Spectrum> {
    let text = fs::read_to_string(path)?;
    let input_error = |source| CliError::Input {
        path: path.to_path_buf(),
        source,
    };
    let counts = parse_counts(&text).map_err(input_error)?;
    let mut spectrum = Spectrum::new(counts)
        .map_err(input_error)?
        .with_detector(
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
    if let Some(live) = options.live_time {
        spectrum = spectrum.with_times(live, options.real_time.unwrap_or(live));
    }
    if let Some(coeffs) = &options.calibration {
        let bits = spectrum.bits;
        let function = CurveFunction::Polynomial(Polynomial::new(coeffs.clone()));
        let calibration = Calibration::new(function, bits, "keV").map_err(input_error)?;
        spectrum = spectrum.with_energy_calibration(calibration);
    }
    Ok(spectrum)
}

fn fit_file(path: &Path, options: &FitOptions) -> Result<Fitter> {
    let spectrum = load_spectrum(path, options)?;
    debug!(
        "{}: {} channels, {} counts, {:.1}% dead time",
        path.display(),
        spectrum.counts.len(),
        spectrum.total_counts(),
        100.0 * spectrum.dead_time_fraction()
    );
    let start = Instant::now();
    let mut fitter =
        Fitter::new(options.settings.clone()).with_optimizer(Arc::clone(&options.optimizer));
    fitter.set_data(&spectrum);
    let cancel = CancelToken::new();
    fitter.find_regions(&cancel);
    fitter.auto_fit(&cancel, |progress| {
        debug!(
            "{}: region {} of {}",
            path.display(),
            progress.completed,
            progress.total
        );
    });
    info!(
        "{}: {} peaks in {:.2?}",
        path.display(),
        fitter.peak_count(),
        start.elapsed()
    );
    Ok(fitter)
}

fn load_settings(path: Option<&Path>, sigma: Option<f64>) -> Result<FitSettings> {
    let mut settings = match path {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => FitSettings::default(),
    };
    if let Some(sigma) = sigma {
        settings = settings.with_finder_sigma(sigma);
    }
    settings.validate()?;
    Ok(settings)
}

fn render_json(path: &Path, fitter: &Fitter) -> Result<String> {
    let report = FileReport {
        file: path.display().to_string(),
        detector: fitter.detector(),
        optimizer: fitter.optimizer().name(),
        peaks: fitter.peaks().into_values().collect(),
        regions: fitter.records(),
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Fit {
            input,
            settings,
            json,
            sigma,
            optimizer,
            live_time,
            real_time,
            calibration,
            verbose,
        } => {
            let options = FitOptions {
                settings: load_settings(settings.as_deref(), sigma)?,
                optimizer: optimizer.build(),
                live_time,
                real_time,
                calibration,
            };
            if verbose {
                eprintln!("Fitting {} file(s)...", input.len());
                eprintln!("Optimizer: {}", options.optimizer.name());
            }

            let start = Instant::now();
            let results: Vec<Result<Fitter>> = input
                .par_iter()
                .map(|path| fit_file(path, &options))
                .collect();

            let mut outputs = Vec::with_capacity(results.len());
            for (path, result) in input.iter().zip(results) {
                let fitter = result?;
                if json {
                    outputs.push(render_json(path, &fitter)?);
                } else {
                    outputs.push(format!("# {}\n{}", path.display(), fitter.report()));
                }
            }
            println!("{}", outputs.join("\n"));

            if verbose {
                eprintln!("Done in {:.2?}", start.elapsed());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn options() -> FitOptions {
        FitOptions {
            settings: FitSettings::default(),
            optimizer: Backend::Lm.build(),
            live_time: Some(10.0),
            real_time: None,
            calibration: None,
        }
    }

    fn spectrum_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# synthetic single peak").unwrap();
        for _ in 0..5 {
            writeln!(file, "0 0 0 0 0 0 0 0 0 0").unwrap();
        }
        writeln!(file, "5, 20, 80, 200, 80, 20, 5  # the peak").unwrap();
        for _ in 0..5 {
            writeln!(file, "0 0 0 0 0 0 0 0 0 0").unwrap();
        }
        file
    }

    #[test]
    fn test_parse_counts_mixed_separators() {
        let counts = parse_counts("1 2,3\n# comment\n4\t5 # trailing\n\n").unwrap();
        assert_eq!(counts, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_parse_counts_reports_line() {
        let err = parse_counts("1 2\n3 x\n").unwrap_err();
        assert_eq!(
            err,
            gammafit_core::Error::Parse {
                line: 2,
                reason: "not a number: `x`".to_string()
            }
        );
    }

    #[test]
    fn test_fit_file() {
        let file = spectrum_file();
        let fitter = fit_file(file.path(), &options()).unwrap();
        assert_eq!(fitter.peak_count(), 1);
        let center = fitter.peaks().keys().next().unwrap().0;
        assert!((center - 53.0).abs() <= 1.0, "center {}", center);
        assert_eq!(fitter.settings().live_seconds, 10.0);
    }

    #[test]
    fn test_calibration_flag_applies() {
        let file = spectrum_file();
        let mut opts = options();
        opts.calibration = Some(vec![0.0, 2.0]);
        let spectrum = load_spectrum(file.path(), &opts).unwrap();
        assert!(spectrum.energy_calibration.is_valid());
        assert_eq!(spectrum.energy_calibration.transform(10.0), 20.0);
    }

    #[test]
    fn test_empty_file_is_an_input_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = fit_file(file.path(), &options()).unwrap_err();
        assert!(matches!(
            err,
            CliError::Input {
                source: gammafit_core::Error::EmptySpectrum,
                ..
            }
        ));
    }

    #[test]
    fn test_settings_file_and_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"smoothing_window": 5}}"#).unwrap();
        let settings = load_settings(Some(file.path()), Some(4.0)).unwrap();
        assert_eq!(settings.smoothing_window, 5);
        assert_eq!(settings.finder_sigma, 4.0);
    }

    #[test]
    fn test_json_output_lists_peaks() {
        let file = spectrum_file();
        let fitter = fit_file(file.path(), &options()).unwrap();
        let json = render_json(file.path(), &fitter).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["peaks"].as_array().unwrap().len(), 1);
        assert_eq!(value["optimizer"], "levenberg-marquardt");
    }
}
