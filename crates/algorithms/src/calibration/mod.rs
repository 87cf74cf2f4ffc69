//! Channel profile calibration
//!
//! Fits the stream-power relation `z − z_outlet = k_s · χ(θ)` to the channel
//! nodes of a [`FlowNetwork`]. For a fixed concavity `θ`, `k_s` is the
//! no-intercept least-squares slope of elevation on chi. When `θ` is not
//! given, the residual sum of squares is minimised over `θ` with
//! Nelder-Mead, starting from 0.5.
//!
//! R² is measured against the spread of the profile's elevations about
//! their mean, taken at the reference concavity 0.5 so that fits at
//! different `θ` share one denominator.

mod optimize;

pub use optimize::{nelder_mead, NelderMeadOptions, NelderMeadResult, NelderMeadStatus};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::network::{ChannelProfile, ChiParams, FlowNetwork};

/// Concavity at which the uninformative sum of squares is evaluated
pub const REFERENCE_THETA: f64 = 0.5;

/// Parameters for [`calibrate`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    /// Channel-initiation length scale in metres; `A0 = x0²`
    pub x0: f64,
    /// Fixed concavity; `None` searches for the best one
    pub theta: Option<f64>,
    pub xtol: f64,
    pub ftol: f64,
    pub max_iter: usize,
    pub max_fun_evals: usize,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        let nm = NelderMeadOptions::default();
        Self {
            x0: 500.0,
            theta: None,
            xtol: nm.xtol,
            ftol: nm.ftol,
            max_iter: nm.max_iter,
            max_fun_evals: nm.max_fun_evals,
        }
    }
}

impl CalibrationParams {
    fn optimizer_options(&self) -> NelderMeadOptions {
        NelderMeadOptions {
            xtol: self.xtol,
            ftol: self.ftol,
            max_iter: self.max_iter,
            max_fun_evals: self.max_fun_evals,
        }
    }
}

/// Least-squares steepness for one profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KsFit {
    pub ks: f64,
    /// Residual sum of squares of the fit
    pub wrss: f64,
}

/// Outcome of a calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Calibration {
    pub ks: f64,
    pub theta: f64,
    pub r2: f64,
    /// False when the θ search ran out of budget; `r2` is then 0
    pub converged: bool,
    /// True when no usable channel profile exists
    pub degenerate: bool,
}

impl Calibration {
    /// The `(0, 0, 0)` result for profiles with nothing to fit
    pub fn degenerate() -> Self {
        Self {
            ks: 0.0,
            theta: 0.0,
            r2: 0.0,
            converged: true,
            degenerate: true,
        }
    }
}

fn is_degenerate(profile: &ChannelProfile) -> bool {
    !profile.chi.iter().any(|&c| c > 0.0)
}

/// No-intercept least squares of elevation on chi.
///
/// A profile without positive chi gives `ks = 0` and the plain sum of
/// squared elevations as residual.
pub fn fit_ks(profile: &ChannelProfile) -> KsFit {
    let sxx: f64 = profile.chi.iter().map(|c| c * c).sum();
    let sxy: f64 = profile
        .chi
        .iter()
        .zip(&profile.elevation)
        .map(|(c, e)| c * e)
        .sum();
    let ks = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let wrss = profile
        .chi
        .iter()
        .zip(&profile.elevation)
        .map(|(c, e)| (e - ks * c).powi(2))
        .sum();
    KsFit { ks, wrss }
}

/// Sum of squared elevation deviations about the mean, over the channel
/// profile extracted at the reference concavity
pub fn uninformative_ss(network: &FlowNetwork, x0: f64) -> f64 {
    let base = network.root().elevation;
    let profile = network.channel_profile(
        ChiParams {
            x0,
            theta: REFERENCE_THETA,
        },
        base,
    );
    if profile.is_empty() {
        return 0.0;
    }
    let mean = profile.elevation.iter().sum::<f64>() / profile.len() as f64;
    profile.elevation.iter().map(|e| (e - mean).powi(2)).sum()
}

fn r_squared(wrss: f64, ss: f64) -> f64 {
    if ss > 0.0 { 1.0 - wrss / ss } else { 0.0 }
}

/// `k_s` and R² at a fixed concavity
pub fn fit_ks_with_r2(network: &FlowNetwork, params: ChiParams) -> Calibration {
    let profile = network.channel_profile(params, network.root().elevation);
    if is_degenerate(&profile) {
        return Calibration::degenerate();
    }
    let fit = fit_ks(&profile);
    Calibration {
        ks: fit.ks,
        theta: params.theta,
        r2: r_squared(fit.wrss, uninformative_ss(network, params.x0)),
        converged: true,
        degenerate: false,
    }
}

/// Calibrate `k_s`, and `θ` unless it is fixed, on the network's channel.
///
/// Running out of optimiser budget is not an error: the best `θ` found is
/// kept, R² is reported as 0 and `converged` is false. A network without a
/// usable channel profile gives [`Calibration::degenerate`].
pub fn calibrate(network: &FlowNetwork, params: CalibrationParams) -> Calibration {
    let x0 = params.x0;
    let base = network.root().elevation;

    if let Some(theta) = params.theta {
        return fit_ks_with_r2(network, ChiParams { x0, theta });
    }

    let reference = network.channel_profile(
        ChiParams {
            x0,
            theta: REFERENCE_THETA,
        },
        base,
    );
    if is_degenerate(&reference) {
        debug!(x0, nodes = reference.len(), "no channel profile to calibrate");
        return Calibration::degenerate();
    }

    let wrss_at = |theta: &[f64]| {
        let profile = network.channel_profile(ChiParams { x0, theta: theta[0] }, base);
        fit_ks(&profile).wrss
    };
    let search = nelder_mead(wrss_at, &[REFERENCE_THETA], params.optimizer_options());
    let theta = search.x[0];

    let fit = fit_ks(&network.channel_profile(ChiParams { x0, theta }, base));
    let converged = search.converged();
    let r2 = if converged {
        r_squared(fit.wrss, uninformative_ss(network, x0))
    } else {
        warn!(
            status = ?search.status,
            iterations = search.iterations,
            evaluations = search.fun_evals,
            theta,
            "concavity search did not converge; reporting R² = 0"
        );
        0.0
    };

    debug!(ks = fit.ks, theta, r2, "calibration complete");

    Calibration {
        ks: fit.ks,
        theta,
        r2,
        converged,
        degenerate: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fit_ks_exact_line() {
        let profile = ChannelProfile {
            chi: vec![0.0, 1.0, 2.0, 3.0],
            elevation: vec![0.0, 2.5, 5.0, 7.5],
        };
        let fit = fit_ks(&profile);
        assert_relative_eq!(fit.ks, 2.5);
        assert_relative_eq!(fit.wrss, 0.0);
    }

    #[test]
    fn test_fit_ks_residuals() {
        let profile = ChannelProfile {
            chi: vec![1.0, 2.0],
            elevation: vec![1.0, 3.0],
        };
        // ks = (1 + 6) / (1 + 4)
        let fit = fit_ks(&profile);
        assert_relative_eq!(fit.ks, 1.4);
        assert_relative_eq!(fit.wrss, 0.4 * 0.4 + 0.2 * 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_profile() {
        let fit = fit_ks(&ChannelProfile::default());
        assert_eq!(fit.ks, 0.0);
        assert_eq!(fit.wrss, 0.0);
        assert!(is_degenerate(&ChannelProfile::default()));
    }

    #[test]
    fn test_r_squared_zero_denominator() {
        assert_eq!(r_squared(1.0, 0.0), 0.0);
        assert_relative_eq!(r_squared(1.0, 4.0), 0.75);
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let p: CalibrationParams = serde_json::from_str(r#"{"x0": 250.0}"#).unwrap();
        assert_eq!(p.x0, 250.0);
        assert_eq!(p.theta, None);
        assert_eq!(p.max_fun_evals, 200);
    }
}
