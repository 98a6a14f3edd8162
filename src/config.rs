use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use serde::Deserialize;

use crate::error::SolverError;
use crate::solver::linesearch::LineSearch;
use crate::solver::ConvergenceCriteria;

/// Interface-conservation selection threshold: a constant, or a value per
/// outer iteration (the last entry persists).
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum IcThreshold {
    Scalar(f64),
    Schedule(Vec<f64>),
}

impl Default for IcThreshold {
    fn default() -> Self {
        IcThreshold::Scalar(1e-8)
    }
}

impl IcThreshold {
    pub fn at(&self, iteration: usize) -> f64 {
        match self {
            IcThreshold::Scalar(v) => *v,
            IcThreshold::Schedule(vals) => {
                let idx = iteration.min(vals.len().saturating_sub(1));
                vals.get(idx).copied().unwrap_or(0.0)
            }
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct LineSearchConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_ls_kmax")]
    pub kmax: usize,
    #[serde(default = "default_one")]
    pub alpha_initial: f64,
    #[serde(default = "default_alpha_max")]
    pub alpha_max: f64,
    #[serde(default = "default_alpha_min")]
    pub alpha_min: f64,
    #[serde(default = "default_c1")]
    pub c1: f64,
    #[serde(default = "default_c2")]
    pub c2: f64,
}

fn default_ls_kmax() -> usize {
    20
}
fn default_one() -> f64 {
    1.0
}
fn default_alpha_max() -> f64 {
    8.0
}
fn default_alpha_min() -> f64 {
    1e-8
}
fn default_c1() -> f64 {
    1e-4
}
fn default_c2() -> f64 {
    0.9
}

impl Default for LineSearchConfig {
    fn default() -> Self {
        Self {
            kind: "none".into(),
            kmax: default_ls_kmax(),
            alpha_initial: default_one(),
            alpha_max: default_alpha_max(),
            alpha_min: default_alpha_min(),
            c1: default_c1(),
            c2: default_c2(),
        }
    }
}

impl LineSearchConfig {
    pub fn build(&self) -> Result<LineSearch, SolverError> {
        match self.kind.to_ascii_lowercase().as_str() {
            "none" => Ok(LineSearch::None),
            "wolfe" => Ok(LineSearch::Wolfe {
                kmax: self.kmax,
                alpha_initial: self.alpha_initial,
                alpha_max: self.alpha_max,
                alpha_min: self.alpha_min,
                c1: self.c1,
                c2: self.c2,
            }),
            "cubic" => Ok(LineSearch::CubicBacktracking {
                kmax: self.kmax,
                alpha_initial: self.alpha_initial,
                alpha_min: self.alpha_min,
                c1: self.c1,
            }),
            "corrigan" => Ok(LineSearch::Corrigan {
                kmax: self.kmax,
                alpha_initial: self.alpha_initial,
                alpha_min: self.alpha_min,
            }),
            other => Err(SolverError::Config(format!(
                "unknown linesearch type: {other}"
            ))),
        }
    }
}

/// Solver front-end configuration, parsed from JSON.
#[derive(Deserialize, Debug, Clone)]
pub struct SolverConfig {
    #[serde(default = "default_tau")]
    pub tau_abs: f64,
    #[serde(default = "default_tau")]
    pub tau_rel: f64,
    #[serde(default = "default_kmax")]
    pub kmax: usize,

    #[serde(default = "default_lambda_u")]
    pub lambda_u: f64,
    #[serde(default = "default_lambda_lag")]
    pub lambda_lag: f64,
    #[serde(default = "default_lambda_1")]
    pub lambda_1: f64,
    #[serde(default = "default_lambda_b")]
    pub lambda_b: f64,
    #[serde(default = "default_alpha_power")]
    pub alpha: f64,
    #[serde(default = "default_beta_power")]
    pub beta: f64,
    #[serde(default = "default_j_min")]
    pub j_min: f64,

    #[serde(default)]
    pub linesearch: LineSearchConfig,

    #[serde(default)]
    pub ic_selection_threshold: IcThreshold,

    #[serde(default)]
    pub interior_penalty: bool,
    #[serde(default)]
    pub sigma_ic: f64,
}

fn default_tau() -> f64 {
    1e-8
}
fn default_kmax() -> usize {
    100
}
fn default_lambda_u() -> f64 {
    1e-7
}
fn default_lambda_lag() -> f64 {
    1e-5
}
fn default_lambda_1() -> f64 {
    1e-3
}
fn default_lambda_b() -> f64 {
    1e-2
}
fn default_alpha_power() -> f64 {
    -1.0
}
fn default_beta_power() -> f64 {
    3.0
}
fn default_j_min() -> f64 {
    1e-10
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tau_abs: default_tau(),
            tau_rel: default_tau(),
            kmax: default_kmax(),
            lambda_u: default_lambda_u(),
            lambda_lag: default_lambda_lag(),
            lambda_1: default_lambda_1(),
            lambda_b: default_lambda_b(),
            alpha: default_alpha_power(),
            beta: default_beta_power(),
            j_min: default_j_min(),
            linesearch: LineSearchConfig::default(),
            ic_selection_threshold: IcThreshold::default(),
            interior_penalty: false,
            sigma_ic: 0.0,
        }
    }
}

impl SolverConfig {
    pub fn parse(content: &str) -> Result<Self, SolverError> {
        serde_json::from_str(content)
            .map_err(|e| SolverError::Config(format!("failed to parse config: {e}")))
    }

    pub fn parse_file(path: impl AsRef<Path>) -> Result<Self, SolverError> {
        let content = fs::read_to_string(path)
            .map_err(|e| SolverError::Config(format!("failed to read config file: {e}")))?;
        Self::parse(&content)
    }

    pub fn convergence_criteria(&self) -> ConvergenceCriteria {
        ConvergenceCriteria {
            tau_abs: self.tau_abs,
            tau_rel: self.tau_rel,
            kmax: self.kmax,
            r0: 1.0,
        }
    }
}

/// Restart state: iteration count, dg solution, and optionally the reduced
/// geometry vector. Stored in native byte order, so files are not portable
/// across endianness changes.
pub fn save_restart(
    path: impl AsRef<Path>,
    iteration: usize,
    u: &[f64],
    geo: Option<&[f64]>,
) -> Result<(), SolverError> {
    let mut file = fs::File::create(path)
        .map_err(|e| SolverError::Config(format!("failed to create restart file: {e}")))?;
    let mut write_u64 = |file: &mut fs::File, v: u64| {
        file.write_all(&v.to_ne_bytes())
            .map_err(|e| SolverError::Config(format!("restart write failed: {e}")))
    };
    write_u64(&mut file, iteration as u64)?;
    write_u64(&mut file, u.len() as u64)?;
    write_u64(&mut file, geo.map_or(0, |g| g.len()) as u64)?;
    for &v in u.iter().chain(geo.unwrap_or(&[])) {
        file.write_all(&v.to_ne_bytes())
            .map_err(|e| SolverError::Config(format!("restart write failed: {e}")))?;
    }
    Ok(())
}

pub fn load_restart(
    path: impl AsRef<Path>,
) -> Result<(usize, Vec<f64>, Option<Vec<f64>>), SolverError> {
    let mut file = fs::File::open(path)
        .map_err(|e| SolverError::Config(format!("failed to open restart file: {e}")))?;
    let mut read_u64 = |file: &mut fs::File| -> Result<u64, SolverError> {
        let mut buf = [0u8; 8];
        file.read_exact(&mut buf)
            .map_err(|e| SolverError::Config(format!("restart read failed: {e}")))?;
        Ok(u64::from_ne_bytes(buf))
    };
    let iteration = read_u64(&mut file)? as usize;
    let n_u = read_u64(&mut file)? as usize;
    let n_g = read_u64(&mut file)? as usize;

    let mut read_vec = |file: &mut fs::File, n: usize| -> Result<Vec<f64>, SolverError> {
        let mut out = Vec::with_capacity(n);
        let mut buf = [0u8; 8];
        for _ in 0..n {
            file.read_exact(&mut buf)
                .map_err(|e| SolverError::Config(format!("restart read failed: {e}")))?;
            out.push(f64::from_ne_bytes(buf));
        }
        Ok(out)
    };
    let u = read_vec(&mut file, n_u)?;
    let geo = if n_g > 0 {
        Some(read_vec(&mut file, n_g)?)
    } else {
        None
    };
    Ok((iteration, u, geo))
}
