//! FitzHugh-Nagumo proof driver
//!
//! Runs the periodic or homoclinic orbit verification for one parameter box
//! per `--theta` value, with `eps` in `[--eps-lo, --eps-hi]`.
//!
//! # Exit status
//! - `0`: every box verified
//! - `1`: at least one box was not verified
//! - `2`: usage or configuration error

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use fhn_core::{
    verify_homoclinic_orbit, verify_periodic_orbit, FhnParameters, HomoclinicSettings, Interval,
    PeriodicSettings, ProofError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

const PERIODIC_THETA: f64 = 0.61;
/// `sqrt(1.6)`, near the wave speed of the homoclinic orbit at `eps = 0`.
const HOMOCLINIC_THETA: f64 = 1.2649110640673518;

#[derive(Parser, Debug)]
#[command(name = "fhn-prove")]
#[command(version)]
#[command(about = "Computer-assisted proofs of FitzHugh-Nagumo travelling waves")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print one JSON object per parameter box instead of a summary line
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify a periodic orbit for every theta
    Periodic(ProofArgs),
    /// Verify a homoclinic orbit near every theta
    ///
    /// The given theta is a starting guess; the proof corrects it and
    /// reports the interval the orbit was found in.
    Homoclinic(ProofArgs),
}

#[derive(Args, Debug)]
struct ProofArgs {
    /// Wave speed; repeat or list to run several boxes
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    theta: Vec<f64>,

    /// Lower end of the eps interval
    #[arg(long, default_value_t = 0.0)]
    eps_lo: f64,

    /// Upper end of the eps interval
    #[arg(long, default_value_t = 1e-4)]
    eps_hi: f64,

    /// JSON settings file; missing fields keep their defaults
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl ProofArgs {
    fn eps(&self) -> Result<Interval> {
        if !(self.eps_lo.is_finite() && self.eps_hi.is_finite()) || self.eps_lo < 0.0 || self.eps_lo > self.eps_hi {
            bail!(
                "eps interval [{}, {}] must satisfy 0 <= eps-lo <= eps-hi",
                self.eps_lo,
                self.eps_hi
            );
        }
        Ok(Interval::new(self.eps_lo, self.eps_hi))
    }

    fn boxes(&self, default_theta: f64) -> Result<Vec<FhnParameters>> {
        let eps = self.eps()?;
        let thetas = if self.theta.is_empty() {
            vec![default_theta]
        } else {
            self.theta.clone()
        };
        thetas
            .into_iter()
            .map(|theta| {
                if !(theta.is_finite() && theta > 0.0) {
                    bail!("theta must be positive, got {theta}");
                }
                Ok(FhnParameters::new(Interval::point(theta), eps))
            })
            .collect()
    }
}

fn load_settings<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid settings in {}", path.display()))
}

#[derive(Debug, Serialize)]
struct BoxOutcome<R> {
    theta: f64,
    eps: Interval,
    verified: bool,
    seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<R>,
}

impl<R: Serialize> BoxOutcome<R> {
    fn new(params: &FhnParameters, result: Result<R, ProofError>, started: Instant) -> Self {
        let (error, report) = match result {
            Ok(report) => (None, Some(report)),
            Err(err) => (Some(err.to_string()), None),
        };
        Self {
            theta: params.theta.mid(),
            eps: params.eps,
            verified: report.is_some(),
            seconds: started.elapsed().as_secs_f64(),
            error,
            report,
        }
    }

    fn print(&self, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string(self)?);
            return Ok(());
        }
        match &self.error {
            None => println!(
                "theta = {}, eps = {}: verified ({:.1} s)",
                self.theta, self.eps, self.seconds
            ),
            Some(err) => println!(
                "theta = {}, eps = {}: not verified ({err})",
                self.theta, self.eps
            ),
        }
        Ok(())
    }
}

/// Runs every box and reports whether all of them verified. Errors are
/// usage or configuration problems, not failed proofs.
fn run<S, R>(
    args: &ProofArgs,
    default_theta: f64,
    json: bool,
    verify: impl Fn(&S, &FhnParameters) -> Result<R, ProofError>,
) -> Result<bool>
where
    S: DeserializeOwned + Default,
    R: Serialize,
{
    let settings: S = load_settings(args.config.as_deref())?;
    let boxes = args.boxes(default_theta)?;
    let mut all_verified = true;
    for params in &boxes {
        info!(theta = %params.theta, eps = %params.eps, "starting parameter box");
        let started = Instant::now();
        let outcome = BoxOutcome::new(params, verify(&settings, params), started);
        if let Some(err) = &outcome.error {
            error!(theta = %params.theta, error = %err, "parameter box not verified");
        }
        all_verified &= outcome.verified;
        outcome.print(json)?;
    }
    Ok(all_verified)
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Commands::Periodic(args) => run(args, PERIODIC_THETA, cli.json, |s: &PeriodicSettings, p| {
            verify_periodic_orbit(s, p)
        }),
        Commands::Homoclinic(args) => run(args, HOMOCLINIC_THETA, cli.json, |s: &HomoclinicSettings, p| {
            verify_homoclinic_orbit(s, p)
        }),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("fhn-prove").chain(args.iter().copied()))
            .expect("arguments parse")
    }

    fn proof_args(cli: Cli) -> ProofArgs {
        match cli.command {
            Commands::Periodic(args) | Commands::Homoclinic(args) => args,
        }
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected an error");
        let message = format!("{err:#}");
        assert!(message.contains(needle), "'{message}' does not mention '{needle}'");
    }

    #[test]
    fn several_thetas_give_several_boxes() {
        let cli = parse(&["periodic", "--theta", "0.61", "0.62", "--theta", "0.63", "-vv"]);
        assert_eq!(cli.verbose, 2);
        let boxes = proof_args(cli).boxes(PERIODIC_THETA).expect("valid boxes");
        assert_eq!(boxes.len(), 3);
        assert_eq!(boxes[1].theta, Interval::point(0.62));
        assert_eq!(boxes[2].eps, Interval::new(0.0, 1e-4));
    }

    #[test]
    fn comma_lists_and_defaults() {
        let cli = parse(&["--json", "homoclinic", "--theta", "1.2,1.3", "--eps-hi", "2e-4"]);
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Homoclinic(_)));
        let args = proof_args(cli);
        assert_eq!(args.theta, vec![1.2, 1.3]);
        assert_eq!(args.eps().expect("valid eps"), Interval::new(0.0, 2e-4));

        let bare = proof_args(parse(&["homoclinic"]));
        let boxes = bare.boxes(HOMOCLINIC_THETA).expect("valid boxes");
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].theta.mid(), HOMOCLINIC_THETA);
    }

    #[test]
    fn bad_parameters_are_usage_errors() {
        let args = proof_args(parse(&["periodic", "--eps-lo", "1e-3", "--eps-hi", "1e-4"]));
        assert_err_contains(args.boxes(PERIODIC_THETA), "eps-lo <= eps-hi");

        let args = proof_args(parse(&["periodic", "--theta=-0.5"]));
        assert_err_contains(args.boxes(PERIODIC_THETA), "theta must be positive");

        assert!(Cli::try_parse_from(["fhn-prove", "periodic", "--theta", "abc"]).is_err());
        assert!(Cli::try_parse_from(["fhn-prove", "chaotic"]).is_err());
    }

    #[test]
    fn settings_files_override_defaults() {
        let dir = std::env::temp_dir().join(format!("fhn-prove-test-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("temp dir");
        let good = dir.join("periodic.json");
        fs::write(&good, r#"{ "long_links": 7 }"#).expect("write settings");
        let settings: PeriodicSettings = load_settings(Some(&good)).expect("settings load");
        assert_eq!(settings.long_links, 7);
        assert_eq!(settings.corner_subdivisions, PeriodicSettings::default().corner_subdivisions);

        let bad = dir.join("broken.json");
        fs::write(&bad, "{ long_links: ").expect("write settings");
        assert_err_contains(load_settings::<PeriodicSettings>(Some(&bad)), "Invalid settings");
        assert_err_contains(
            load_settings::<HomoclinicSettings>(Some(&dir.join("missing.json"))),
            "Failed to read",
        );
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn failed_boxes_are_reported_not_raised() {
        let args = proof_args(parse(&["periodic", "--theta", "0.61", "0.7"]));
        let all = run(&args, PERIODIC_THETA, true, |_: &PeriodicSettings, p: &FhnParameters| {
            if p.theta.mid() < 0.65 {
                Ok(p.theta.mid())
            } else {
                Err(ProofError::GeometryPrecondition("corner points are not ordered".to_string()))
            }
        })
        .expect("no configuration errors");
        assert!(!all);

        let outcome = BoxOutcome::<f64>::new(
            &FhnParameters::new(Interval::point(0.7), Interval::new(0.0, 1e-4)),
            Err(ProofError::CoveringFailure {
                stage: "left Poincare map".to_string(),
                link: None,
            }),
            Instant::now(),
        );
        assert!(!outcome.verified);
        let json = serde_json::to_value(&outcome).expect("serializes");
        assert_eq!(json["verified"], false);
        assert!(json.get("report").is_none());
        assert!(json["error"].as_str().is_some_and(|e| e.contains("left Poincare map")));
    }
}
