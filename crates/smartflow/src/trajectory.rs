//! Optional on-disk trajectory dumps.
//!
//! One append-only text file per CFD instance, per category and per episode:
//! `<dir>/<category>/ensemble_{i:03}_episode_{e:04}.dat`. Each step appends a
//! single line of space-separated values.

use crate::Result;
use ndarray::ArrayView1;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// What a dump file holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    State,
    LocalReward,
    Action,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::State, Category::LocalReward, Category::Action];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::State => "state",
            Category::LocalReward => "local_reward",
            Category::Action => "action",
        }
    }
}

/// Appends per-instance rows to the dump files.
pub struct TrajectoryWriter {
    root: PathBuf,
}

impl TrajectoryWriter {
    /// Create the category directories under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for category in Category::ALL {
            fs::create_dir_all(root.join(category.dir_name()))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, category: Category, instance: usize, episode: u64) -> PathBuf {
        self.root
            .join(category.dir_name())
            .join(format!("ensemble_{instance:03}_episode_{episode:04}.dat"))
    }

    /// Append one line to the file of `(category, instance, episode)`.
    pub fn append(
        &self,
        category: Category,
        instance: usize,
        episode: u64,
        values: ArrayView1<f32>,
    ) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(category, instance, episode))?;
        let line: Vec<String> = values.iter().map(|&v| format_sci(v)).collect();
        writeln!(file, "{}", line.join(" "))?;
        Ok(())
    }
}

/// Format like C's `%13.6e`: six decimals and a signed two-digit exponent,
/// right-aligned in 13 columns.
pub fn format_sci(value: f32) -> String {
    let raw = format!("{:.6e}", value);
    let formatted = match raw.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.abs())
        }
        // inf / NaN
        None => raw,
    };
    format!("{formatted:>13}")
}
