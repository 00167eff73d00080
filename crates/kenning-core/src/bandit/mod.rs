//! Bandit Learner
//!
//! Multi-armed bandit over the fixed set of retrieval strategies. ε-greedy
//! selection keeps contextual reward tables keyed by a canonical context
//! bucket; UCB1 scores arms by mean plus an exploration bonus. Reward
//! history lives in bounded sliding windows so estimates track the present.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::{BanditAlgorithm, BanditConfig};
use crate::error::{EngineError, Result};

/// Recent rewards kept for the convergence-rate estimate
const CONVERGENCE_WINDOW: usize = 100;

/// Exported model schema version
const MODEL_VERSION: u32 = 1;

// ============================================================================
// STRATEGIES (ARMS)
// ============================================================================

/// The fixed enumeration of retrieval strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    FtsHeavy,
    VectorHeavy,
    Balanced,
    RecencyFocused,
    EffectivenessFocused,
    PopularityFocused,
    SemanticFocused,
}

impl Strategy {
    /// Every arm, in canonical order
    pub const ALL: [Strategy; 7] = [
        Strategy::FtsHeavy,
        Strategy::VectorHeavy,
        Strategy::Balanced,
        Strategy::RecencyFocused,
        Strategy::EffectivenessFocused,
        Strategy::PopularityFocused,
        Strategy::SemanticFocused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::FtsHeavy => "fts-heavy",
            Strategy::VectorHeavy => "vector-heavy",
            Strategy::Balanced => "balanced",
            Strategy::RecencyFocused => "recency-focused",
            Strategy::EffectivenessFocused => "effectiveness-focused",
            Strategy::PopularityFocused => "popularity-focused",
            Strategy::SemanticFocused => "semantic-focused",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        Strategy::ALL.iter().copied().find(|a| a.as_str() == s)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ARM STATE & STATS
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ArmState {
    /// Bounded recent reward history; drives the current mean estimate
    window: VecDeque<f64>,
    /// Lifetime totals
    trials: u64,
    total_reward: f64,
    last_used: Option<DateTime<Utc>>,
}

impl ArmState {
    fn push(&mut self, reward: f64, window_size: usize) {
        if self.window.len() >= window_size.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(reward);
        self.trials += 1;
        self.total_reward += reward;
        self.last_used = Some(Utc::now());
    }

    fn window_mean(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.window.iter().sum::<f64>() / self.window.len() as f64
        }
    }

    fn window_variance(&self) -> f64 {
        let n = self.window.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.window_mean();
        self.window.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64
    }
}

/// Exported per-arm statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmStats {
    pub trials: u64,
    pub total_reward: f64,
    pub average_reward: f64,
    /// 95% confidence interval: mean ± 1.96·SE over the sliding window
    pub confidence_interval: (f64, f64),
    pub last_used: Option<DateTime<Utc>>,
}

/// Aggregate learner statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditStats {
    pub arms: HashMap<String, ArmStats>,
    pub total_trials: u64,
    pub average_reward: f64,
    /// (best arm mean − observed mean) · total trials
    pub regret: f64,
    /// 1 − √variance over the last 100 rewards
    pub convergence_rate: f64,
    pub exploration_rate: f64,
}

/// One arm choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmChoice {
    pub strategy: Strategy,
    /// True when the learner explored rather than exploited
    pub explored: bool,
}

// ============================================================================
// MODEL EXPORT
// ============================================================================

/// Per-arm distribution summary in an exported model
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmEstimate {
    pub mean: f64,
    pub variance: f64,
    pub samples: u64,
}

/// Serialized learner state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditModel {
    pub model_version: u32,
    pub algorithm: String,
    pub parameters: BanditParameters,
    pub arm_estimates: HashMap<String, ArmEstimate>,
    pub training_data: TrainingSummary,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditParameters {
    pub epsilon: f64,
    pub epsilon_decay: f64,
    pub min_epsilon: f64,
    pub confidence_level: f64,
    pub window_size: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSummary {
    pub total_updates: u64,
    pub exported_at: Option<DateTime<Utc>>,
}

// ============================================================================
// BANDIT
// ============================================================================

/// Strategy-selection bandit; ε-greedy or UCB1 per configuration
pub struct Bandit {
    config: BanditConfig,
    /// Current ε (ε-greedy only); decays per update toward the floor
    epsilon: f64,
    arms: HashMap<Strategy, ArmState>,
    /// Context bucket → per-arm windows, a tenth of the global size each
    contexts: HashMap<String, HashMap<Strategy, VecDeque<f64>>>,
    /// Most recent rewards across all arms
    recent: VecDeque<f64>,
    total_updates: u64,
    rng: StdRng,
}

impl Bandit {
    /// Construct for the configured algorithm. Thompson sampling is declared
    /// in configuration but not implemented.
    pub fn new(config: BanditConfig) -> Result<Self> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic construction for tests and reproducible runs
    pub fn with_seed(config: BanditConfig, seed: u64) -> Result<Self> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: BanditConfig, rng: StdRng) -> Result<Self> {
        if config.algorithm == BanditAlgorithm::ThompsonSampling {
            return Err(EngineError::InvalidArgument(
                "thompson-sampling is not implemented".into(),
            ));
        }
        let arms = Strategy::ALL
            .iter()
            .map(|a| (*a, ArmState::default()))
            .collect();
        Ok(Self {
            epsilon: config.initial_epsilon,
            arms,
            contexts: HashMap::new(),
            recent: VecDeque::with_capacity(CONVERGENCE_WINDOW),
            total_updates: 0,
            rng,
            config,
        })
    }

    pub fn algorithm(&self) -> BanditAlgorithm {
        self.config.algorithm
    }

    /// Current exploration rate: ε for ε-greedy, the UCB constant otherwise
    pub fn exploration_rate(&self) -> f64 {
        match self.config.algorithm {
            BanditAlgorithm::Ucb => self.config.confidence_level,
            _ => self.epsilon,
        }
    }

    // ========================================================================
    // SELECTION
    // ========================================================================

    /// Pick an arm for the given canonical context bucket
    pub fn select_arm(&mut self, context: Option<&str>) -> ArmChoice {
        match self.config.algorithm {
            BanditAlgorithm::Ucb => self.select_ucb(),
            _ => self.select_epsilon_greedy(context),
        }
    }

    fn select_epsilon_greedy(&mut self, context: Option<&str>) -> ArmChoice {
        if self.rng.gen::<f64>() < self.epsilon {
            let idx = self.rng.gen_range(0..Strategy::ALL.len());
            return ArmChoice {
                strategy: Strategy::ALL[idx],
                explored: true,
            };
        }

        // Contextual estimate first, global fallback
        let contextual_best = context
            .and_then(|key| self.contexts.get(key))
            .and_then(|table| {
                table
                    .iter()
                    .filter(|(_, window)| !window.is_empty())
                    .map(|(arm, window)| {
                        (*arm, window.iter().sum::<f64>() / window.len() as f64)
                    })
                    .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            });

        let strategy = match contextual_best {
            Some((arm, _)) => arm,
            None => self.global_best(),
        };
        ArmChoice {
            strategy,
            explored: false,
        }
    }

    fn global_best(&self) -> Strategy {
        Strategy::ALL
            .iter()
            .copied()
            .max_by(|a, b| {
                let ma = self.arms.get(a).map_or(0.0, ArmState::window_mean);
                let mb = self.arms.get(b).map_or(0.0, ArmState::window_mean);
                ma.partial_cmp(&mb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(Strategy::Balanced)
    }

    fn select_ucb(&mut self) -> ArmChoice {
        // Unvisited arms have an infinite upper bound; take the first
        for arm in Strategy::ALL {
            if self.arms.get(&arm).map_or(0, |s| s.trials) == 0 {
                return ArmChoice {
                    strategy: arm,
                    explored: true,
                };
            }
        }

        let total: u64 = self.arms.values().map(|s| s.trials).sum();
        let ln_total = (total.max(1) as f64).ln();
        let c = self.config.confidence_level;

        let strategy = Strategy::ALL
            .iter()
            .copied()
            .max_by(|a, b| {
                let score = |arm: &Strategy| {
                    let state = &self.arms[arm];
                    state.window_mean() + (c * ln_total / state.trials as f64).sqrt()
                };
                score(a)
                    .partial_cmp(&score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(Strategy::Balanced);
        ArmChoice {
            strategy,
            explored: false,
        }
    }

    // ========================================================================
    // REWARDS
    // ========================================================================

    /// Record a reward in [0,1] for an arm, updating the global and (for
    /// ε-greedy) contextual windows, and decaying ε toward the floor
    pub fn update_reward(
        &mut self,
        arm: Strategy,
        context: Option<&str>,
        reward: f64,
    ) -> Result<()> {
        if !(0.0..=1.0).contains(&reward) || reward.is_nan() {
            return Err(EngineError::InvalidArgument(format!(
                "reward must be in [0,1], got {reward}"
            )));
        }

        let window_size = self.config.window_size;
        self.arms
            .entry(arm)
            .or_default()
            .push(reward, window_size);

        if self.config.algorithm == BanditAlgorithm::EpsilonGreedy {
            if let Some(key) = context {
                let context_window = (window_size / 10).max(1);
                let table = self.contexts.entry(key.to_string()).or_default();
                let window = table.entry(arm).or_default();
                if window.len() >= context_window {
                    window.pop_front();
                }
                window.push_back(reward);
            }
            self.epsilon =
                (self.epsilon * self.config.epsilon_decay).max(self.config.min_epsilon);
        }

        if self.recent.len() >= CONVERGENCE_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(reward);
        self.total_updates += 1;
        Ok(())
    }

    // ========================================================================
    // STATISTICS
    // ========================================================================

    pub fn stats(&self) -> BanditStats {
        let mut arms = HashMap::new();
        let mut total_trials = 0u64;
        let mut total_reward = 0.0;
        let mut best_mean = 0.0_f64;

        for (arm, state) in &self.arms {
            total_trials += state.trials;
            total_reward += state.total_reward;
            let lifetime_mean = if state.trials == 0 {
                0.0
            } else {
                state.total_reward / state.trials as f64
            };
            best_mean = best_mean.max(lifetime_mean);

            let n = state.window.len() as f64;
            let se = if n > 0.0 {
                (state.window_variance() / n).sqrt()
            } else {
                0.0
            };
            let mean = state.window_mean();
            arms.insert(
                arm.as_str().to_string(),
                ArmStats {
                    trials: state.trials,
                    total_reward: state.total_reward,
                    average_reward: lifetime_mean,
                    confidence_interval: (mean - 1.96 * se, mean + 1.96 * se),
                    last_used: state.last_used,
                },
            );
        }

        let observed_mean = if total_trials == 0 {
            0.0
        } else {
            total_reward / total_trials as f64
        };

        let convergence_rate = if self.recent.len() < 2 {
            0.0
        } else {
            let n = self.recent.len() as f64;
            let mean = self.recent.iter().sum::<f64>() / n;
            let variance = self.recent.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
            (1.0 - variance.sqrt()).clamp(0.0, 1.0)
        };

        BanditStats {
            arms,
            total_trials,
            average_reward: observed_mean,
            regret: (best_mean - observed_mean) * total_trials as f64,
            convergence_rate,
            exploration_rate: self.exploration_rate(),
        }
    }

    // ========================================================================
    // MODEL IMPORT / EXPORT
    // ========================================================================

    pub fn export_model(&self) -> BanditModel {
        let arm_estimates = self
            .arms
            .iter()
            .map(|(arm, state)| {
                (
                    arm.as_str().to_string(),
                    ArmEstimate {
                        mean: state.window_mean(),
                        variance: state.window_variance(),
                        samples: state.trials,
                    },
                )
            })
            .collect();

        BanditModel {
            model_version: MODEL_VERSION,
            algorithm: self.config.algorithm.as_str().to_string(),
            parameters: BanditParameters {
                epsilon: self.epsilon,
                epsilon_decay: self.config.epsilon_decay,
                min_epsilon: self.config.min_epsilon,
                confidence_level: self.config.confidence_level,
                window_size: self.config.window_size,
            },
            arm_estimates,
            training_data: TrainingSummary {
                total_updates: self.total_updates,
                exported_at: Some(Utc::now()),
            },
        }
    }

    /// Reconstitute state from an exported model. Sliding windows are
    /// resampled from a normal distribution with the stored mean/variance
    /// (Box–Muller), clamped to [0,1].
    pub fn import_model(&mut self, model: &BanditModel) -> Result<()> {
        if model.algorithm != self.config.algorithm.as_str() {
            return Err(EngineError::ModelIncompatible(format!(
                "model algorithm {} does not match configured {}",
                model.algorithm,
                self.config.algorithm.as_str()
            )));
        }

        self.epsilon = model
            .parameters
            .epsilon
            .clamp(self.config.min_epsilon, 1.0);
        self.total_updates = model.training_data.total_updates;
        self.contexts.clear();
        self.recent.clear();

        for (name, estimate) in &model.arm_estimates {
            let Some(arm) = Strategy::parse_name(name) else {
                tracing::warn!("Ignoring unknown arm {name:?} in imported model");
                continue;
            };
            let samples = (estimate.samples as usize).min(self.config.window_size);
            let std_dev = estimate.variance.max(0.0).sqrt();

            let mut window = VecDeque::with_capacity(samples);
            for _ in 0..samples {
                window.push_back((estimate.mean + std_dev * self.box_muller()).clamp(0.0, 1.0));
            }
            self.arms.insert(
                arm,
                ArmState {
                    window,
                    trials: estimate.samples,
                    total_reward: estimate.mean * estimate.samples as f64,
                    last_used: None,
                },
            );
        }
        Ok(())
    }

    /// One standard-normal sample via Box–Muller
    fn box_muller(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}
