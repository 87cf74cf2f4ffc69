//! Derivative-free minimisation (Nelder-Mead downhill simplex)
//!
//! Standard coefficients: reflection 1, expansion 2, contraction 0.5,
//! shrink 0.5. The initial simplex perturbs each coordinate of the start
//! point by 5% (or by 0.00025 when it is zero). Iteration stops when both
//! the simplex diameter and the spread of function values fall within
//! tolerance, or when the evaluation or iteration budget runs out.
//!
//! Reference:
//! Nelder, J. A., & Mead, R. (1965). A simplex method for function
//! minimization. *The Computer Journal*, 7(4), 308–313.

use serde::Serialize;

const RHO: f64 = 1.0;
const CHI: f64 = 2.0;
const PSI: f64 = 0.5;
const SIGMA: f64 = 0.5;

const NONZERO_DELTA: f64 = 0.05;
const ZERO_DELTA: f64 = 0.00025;

/// Stopping criteria for [`nelder_mead`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NelderMeadOptions {
    /// Absolute tolerance on the simplex extent
    pub xtol: f64,
    /// Absolute tolerance on the spread of function values
    pub ftol: f64,
    pub max_iter: usize,
    pub max_fun_evals: usize,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            xtol: 1e-5,
            ftol: 1e-5,
            max_iter: 100,
            max_fun_evals: 200,
        }
    }
}

/// Why the search stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NelderMeadStatus {
    Converged,
    MaxFunctionEvaluations,
    MaxIterations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NelderMeadResult {
    /// Best point found
    pub x: Vec<f64>,
    /// Function value at `x`
    pub fun: f64,
    pub iterations: usize,
    pub fun_evals: usize,
    pub status: NelderMeadStatus,
}

impl NelderMeadResult {
    pub fn converged(&self) -> bool {
        self.status == NelderMeadStatus::Converged
    }
}

/// Minimise `f` starting from `x0`.
///
/// Budget exhaustion is reported through [`NelderMeadResult::status`], never
/// as an error; the best point seen so far is still returned. NaN function
/// values order after every number.
pub fn nelder_mead<F>(mut f: F, x0: &[f64], options: NelderMeadOptions) -> NelderMeadResult
where
    F: FnMut(&[f64]) -> f64,
{
    let n = x0.len();
    let mut eval = |x: &[f64]| {
        let v = f(x);
        if v.is_nan() { f64::INFINITY } else { v }
    };

    let mut sim: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    sim.push(x0.to_vec());
    for k in 0..n {
        let mut y = x0.to_vec();
        y[k] = if y[k] != 0.0 {
            (1.0 + NONZERO_DELTA) * y[k]
        } else {
            ZERO_DELTA
        };
        sim.push(y);
    }
    let mut fsim: Vec<f64> = sim.iter().map(|x| eval(x)).collect();
    sort_simplex(&mut sim, &mut fsim);

    let mut iterations = 1usize;
    let mut calls = n + 1;

    while calls < options.max_fun_evals && iterations < options.max_iter {
        let x_spread = sim[1..]
            .iter()
            .flat_map(|v| v.iter().zip(&sim[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0_f64, f64::max);
        let f_spread = fsim[1..]
            .iter()
            .map(|v| (fsim[0] - v).abs())
            .fold(0.0_f64, f64::max);
        if x_spread <= options.xtol && f_spread <= options.ftol {
            break;
        }

        // Centroid of all but the worst vertex
        let mut xbar = vec![0.0; n];
        for v in &sim[..n] {
            for (c, x) in xbar.iter_mut().zip(v) {
                *c += x / n as f64;
            }
        }
        let worst = sim[n].clone();
        let blend = |a: f64, b: f64| -> Vec<f64> {
            xbar.iter().zip(&worst).map(|(xb, w)| a * xb + b * w).collect()
        };

        let xr = blend(1.0 + RHO, -RHO);
        let fxr = eval(&xr);
        calls += 1;
        let mut shrink = false;

        if fxr < fsim[0] {
            let xe = blend(1.0 + RHO * CHI, -RHO * CHI);
            let fxe = eval(&xe);
            calls += 1;
            if fxe < fxr {
                sim[n] = xe;
                fsim[n] = fxe;
            } else {
                sim[n] = xr;
                fsim[n] = fxr;
            }
        } else if fxr < fsim[n - 1] {
            sim[n] = xr;
            fsim[n] = fxr;
        } else if fxr < fsim[n] {
            // Outside contraction
            let xc = blend(1.0 + PSI * RHO, -PSI * RHO);
            let fxc = eval(&xc);
            calls += 1;
            if fxc <= fxr {
                sim[n] = xc;
                fsim[n] = fxc;
            } else {
                shrink = true;
            }
        } else {
            // Inside contraction
            let xcc = blend(1.0 - PSI, PSI);
            let fxcc = eval(&xcc);
            calls += 1;
            if fxcc < fsim[n] {
                sim[n] = xcc;
                fsim[n] = fxcc;
            } else {
                shrink = true;
            }
        }

        if shrink {
            let best = sim[0].clone();
            for j in 1..=n {
                for (x, b) in sim[j].iter_mut().zip(&best) {
                    *x = b + SIGMA * (*x - b);
                }
                fsim[j] = eval(&sim[j]);
                calls += 1;
            }
        }

        sort_simplex(&mut sim, &mut fsim);
        iterations += 1;
    }

    let status = if calls >= options.max_fun_evals {
        NelderMeadStatus::MaxFunctionEvaluations
    } else if iterations >= options.max_iter {
        NelderMeadStatus::MaxIterations
    } else {
        NelderMeadStatus::Converged
    };

    NelderMeadResult {
        x: sim.swap_remove(0),
        fun: fsim[0],
        iterations,
        fun_evals: calls,
        status,
    }
}

/// Order vertices by function value, best first (stable)
fn sort_simplex(sim: &mut Vec<Vec<f64>>, fsim: &mut Vec<f64>) {
    let mut idx: Vec<usize> = (0..fsim.len()).collect();
    idx.sort_by(|&a, &b| fsim[a].total_cmp(&fsim[b]));
    let sorted_sim: Vec<Vec<f64>> = idx.iter().map(|&i| sim[i].clone()).collect();
    let sorted_f: Vec<f64> = idx.iter().map(|&i| fsim[i]).collect();
    *sim = sorted_sim;
    *fsim = sorted_f;
}
