//! Ecosystem-wide seed rain: pooling across patches and temporal smoothing.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Sliding-window average over timestamped samples
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MovingAverager {
    /// Window length in time units
    window: f64,
    samples: VecDeque<(f64, f64)>,
}

impl MovingAverager {
    pub fn new(window: f64) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Record a sample and forget those that fell out of the window
    pub fn push(&mut self, t: f64, value: f64) {
        self.samples.push_back((t, value));
        while let (Some(oldest), Some(newest)) = (
            self.samples.front().map(|s| s.0),
            self.samples.back().map(|s| s.0),
        ) {
            if newest - oldest > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Mean of the samples inside the window (0 when empty)
    pub fn get(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|&(_, v)| v).sum::<f64>() / self.samples.len() as f64
    }

    /// Number of samples currently retained
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One averager per species, shared by every patch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeedHistory {
    averagers: Vec<MovingAverager>,
}

impl SeedHistory {
    pub fn new(n_species: usize, window: f64) -> Self {
        Self {
            averagers: vec![MovingAverager::new(window); n_species],
        }
    }

    pub fn species_count(&self) -> usize {
        self.averagers.len()
    }

    /// Push one pooled value per species
    pub fn push(&mut self, t: f64, pooled: &[f64]) {
        assert_eq!(
            pooled.len(),
            self.averagers.len(),
            "pooled seed vector must have one entry per species"
        );
        for (averager, &value) in self.averagers.iter_mut().zip(pooled) {
            averager.push(t, value);
        }
    }

    /// Smoothed seed rain of one species
    pub fn get(&self, species: usize) -> f64 {
        self.averagers[species].get()
    }

    /// Smoothed seed rain of every species
    pub fn smoothed(&self) -> Vec<f64> {
        self.averagers.iter().map(MovingAverager::get).collect()
    }
}

/// Per-species mean of newborn output over patches (well-mixed seed bank)
pub fn pool_seed_output(per_patch: &[&[f64]], n_species: usize) -> Vec<f64> {
    let mut pooled = vec![0.0; n_species];
    if per_patch.is_empty() {
        return pooled;
    }
    for patch in per_patch {
        for (total, &seeds) in pooled.iter_mut().zip(patch.iter()) {
            *total += seeds;
        }
    }
    let n = per_patch.len() as f64;
    for total in &mut pooled {
        *total /= n;
    }
    pooled
}
