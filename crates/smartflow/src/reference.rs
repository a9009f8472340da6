//! Reference flow statistics of a case.
//!
//! Loaded once per CFD instance at construction and used only by the reward.

use crate::config::EnvConfig;
use crate::{Result, SmartflowError};
use std::path::Path;

/// Target wall shear stress and velocity profile of one case.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceProfile {
    /// Reference wall shear stress
    pub tau_wall: f32,
    /// Wall-normal coordinates of the profile samples
    pub y: Vec<f32>,
    /// Reference velocity at each coordinate
    pub u: Vec<f32>,
    /// Grid-spacing weights: `w[0] = y[0]`, `w[k] = y[k] - y[k-1]`
    pub weights: Vec<f32>,
}

impl ReferenceProfile {
    /// `y` and `u` must pair up one to one.
    pub fn new(tau_wall: f32, y: Vec<f32>, u: Vec<f32>) -> Result<Self> {
        if y.len() != u.len() {
            return Err(SmartflowError::Config(format!(
                "reference profile has {} coordinates but {} velocities",
                y.len(),
                u.len()
            )));
        }
        let weights = spacing_weights(&y);
        Ok(Self {
            tau_wall,
            y,
            u,
            weights,
        })
    }

    /// Number of profile samples.
    pub fn len(&self) -> usize {
        self.u.len()
    }

    pub fn is_empty(&self) -> bool {
        self.u.is_empty()
    }

    /// Load `stats` (for `tau_wall`) and `profile` (two columns `y u`).
    pub fn load(stats: &Path, profile: &Path) -> Result<Self> {
        let tau_wall = read_stat(stats, "tau_wall")?;
        let (y, u) = read_profile(profile)?;
        Self::new(tau_wall, y, u)
    }

    /// Load the references of every instance from the active mode's cases.
    pub fn load_for_ensemble(config: &EnvConfig) -> Result<Vec<Self>> {
        (0..config.cfd_n_envs)
            .map(|instance| {
                let dir = config.case_dir(instance);
                let reference =
                    Self::load(&dir.join(&config.stats_file), &dir.join(&config.profile_file))?;
                tracing::debug!(
                    instance,
                    case = config.case_for(instance),
                    tau_wall = reference.tau_wall,
                    samples = reference.len(),
                    "loaded reference profile"
                );
                Ok(reference)
            })
            .collect()
    }
}

fn spacing_weights(y: &[f32]) -> Vec<f32> {
    let mut previous = 0.0;
    y.iter()
        .map(|&yk| {
            let w = yk - previous;
            previous = yk;
            w
        })
        .collect()
}

fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines().enumerate().filter_map(|(n, line)| {
        let line = line.split('#').next().unwrap_or("").trim();
        (!line.is_empty()).then_some((n + 1, line))
    })
}

fn invalid(path: &Path, reason: impl Into<String>) -> SmartflowError {
    SmartflowError::Reference {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| invalid(path, e.to_string()))
}

fn read_stat(path: &Path, name: &str) -> Result<f32> {
    let text = read_to_string(path)?;
    for (n, line) in content_lines(&text) {
        let mut fields = line.split_whitespace();
        if fields.next() != Some(name) {
            continue;
        }
        let value = fields
            .next()
            .ok_or_else(|| invalid(path, format!("line {n}: `{name}` has no value")))?;
        return value
            .parse()
            .map_err(|_| invalid(path, format!("line {n}: `{value}` is not a number")));
    }
    Err(invalid(path, format!("missing `{name}` entry")))
}

fn read_profile(path: &Path) -> Result<(Vec<f32>, Vec<f32>)> {
    let text = read_to_string(path)?;
    let mut y = Vec::new();
    let mut u = Vec::new();
    for (n, line) in content_lines(&text) {
        let values: Vec<f32> = line
            .split_whitespace()
            .map(|field| field.parse())
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|_| invalid(path, format!("line {n}: non-numeric field")))?;
        if values.len() < 2 {
            return Err(invalid(path, format!("line {n}: expected columns `y u`")));
        }
        if let Some(&last) = y.last() {
            if values[0] <= last {
                return Err(invalid(path, format!("line {n}: y must increase")));
            }
        }
        y.push(values[0]);
        u.push(values[1]);
    }
    if y.is_empty() {
        return Err(invalid(path, "no profile samples"));
    }
    Ok((y, u))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_spacing_weights() {
        let reference =
            ReferenceProfile::new(1.0, vec![0.5, 1.5, 3.5], vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(reference.weights, vec![0.5, 1.0, 2.0]);
        assert_eq!(reference.len(), 3);
    }

    #[test]
    fn test_new_rejects_unpaired_columns() {
        let err = ReferenceProfile::new(1.0, vec![0.5, 1.5], vec![1.0]).unwrap_err();
        assert!(matches!(err, SmartflowError::Config(_)));
        assert!(err.to_string().contains("2 coordinates but 1 velocities"));
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempdir().unwrap();
        let stats = dir.path().join("stats.dat");
        let profile = dir.path().join("profile.dat");
        fs::write(&stats, "# channel statistics\nre_tau 180\ntau_wall 0.0025 # target\n").unwrap();
        fs::write(&profile, "# y u\n0.1 2.0\n0.3 5.0\n\n0.6 8.5\n").unwrap();

        let reference = ReferenceProfile::load(&stats, &profile).unwrap();
        assert_relative_eq!(reference.tau_wall, 0.0025);
        assert_eq!(reference.u, vec![2.0, 5.0, 8.5]);
        assert_relative_eq!(reference.weights[1], 0.2, epsilon = 1e-6);
        assert_relative_eq!(reference.weights[2], 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_missing_stat_entry() {
        let dir = tempdir().unwrap();
        let stats = dir.path().join("stats.dat");
        fs::write(&stats, "re_tau 180\n").unwrap();
        let err = read_stat(&stats, "tau_wall").unwrap_err();
        assert!(err.to_string().contains("missing `tau_wall`"));
    }

    #[test]
    fn test_bad_profile_lines() {
        let dir = tempdir().unwrap();
        let profile = dir.path().join("profile.dat");

        fs::write(&profile, "0.1 2.0\n0.05 3.0\n").unwrap();
        assert!(read_profile(&profile).is_err());

        fs::write(&profile, "0.1 abc\n").unwrap();
        assert!(read_profile(&profile).is_err());

        fs::write(&profile, "# empty\n").unwrap();
        assert!(read_profile(&profile).is_err());
    }

    #[test]
    fn test_missing_file_is_reference_error() {
        let dir = tempdir().unwrap();
        let err = ReferenceProfile::load(&dir.path().join("nope"), &dir.path().join("nope"))
            .unwrap_err();
        assert!(matches!(err, SmartflowError::Reference { .. }));
    }

    #[test]
    fn test_load_for_ensemble_uses_mode_cases() {
        let root = tempdir().unwrap();
        for (case, tau) in [("a", "1.0"), ("b", "2.0")] {
            let dir = root.path().join(case);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("stats.dat"), format!("tau_wall {tau}\n")).unwrap();
            fs::write(dir.join("profile.dat"), "1.0 1.0\n").unwrap();
        }
        let mut config = EnvConfig::default().layout(3, 1).sizes(4, 4, 1, 4);
        config.case_root = root.path().to_path_buf();
        config.train.cases = vec!["a".to_string(), "b".to_string()];

        let references = ReferenceProfile::load_for_ensemble(&config).unwrap();
        let taus: Vec<f32> = references.iter().map(|r| r.tau_wall).collect();
        assert_eq!(taus, vec![1.0, 2.0, 1.0]);
    }
}
