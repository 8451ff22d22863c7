//! Sparse optimizer with running parameter averages.
//!
//! Components own their weight tables; the optimizer applies deltas to them
//! and keeps, per touched parameter, enough state to report the mean value the
//! parameter held across all update steps so far. Averages are maintained
//! lazily: a parameter's accumulator is only brought up to date when it
//! changes or when [`Optimizer::averages`] is called.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies one weight: a feature string scored against one class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamKey {
    pub feature: String,
    pub class: u32,
}

impl ParamKey {
    pub fn new(feature: impl Into<String>, class: u32) -> Self {
        Self {
            feature: feature.into(),
            class,
        }
    }
}

/// A component's weight table.
pub type Weights = HashMap<ParamKey, f64>;

/// Averaged weights keyed by parameter namespace (one per component head).
pub type ParamAverages = HashMap<String, Weights>;

/// Instantaneous weights set aside while averages are swapped in.
pub type ParamStash = Vec<(String, Weights)>;

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    /// Sum of the value over steps `1..last`.
    total: f64,
    value: f64,
    /// First step not yet folded into `total`.
    last: u64,
}

impl Accumulator {
    fn mean(&self, nr_update: u64) -> f64 {
        let open_steps = (nr_update + 1).saturating_sub(self.last) as f64;
        (self.total + self.value * open_steps) / nr_update as f64
    }
}

#[derive(Debug, Clone)]
pub struct Optimizer {
    learn_rate: f64,
    nr_update: u64,
    accumulators: HashMap<String, HashMap<ParamKey, Accumulator>>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Optimizer {
    pub fn new(learn_rate: f64) -> Self {
        Self {
            learn_rate,
            nr_update: 0,
            accumulators: HashMap::new(),
        }
    }

    pub fn learn_rate(&self) -> f64 {
        self.learn_rate
    }

    /// Number of update steps started so far.
    pub fn nr_update(&self) -> u64 {
        self.nr_update
    }

    /// Start a new update step. Call once per minibatch before any
    /// [`Optimizer::update_param`] for that batch.
    pub fn begin_update(&mut self) {
        self.nr_update += 1;
    }

    /// Add `learn_rate * delta` to `weights[key]`, tracking its running mean
    /// under `namespace`.
    pub fn update_param(&mut self, namespace: &str, weights: &mut Weights, key: ParamKey, delta: f64) {
        let now = self.nr_update.max(1);
        let weight = weights.entry(key.clone()).or_insert(0.0);
        let table = self.accumulators.entry(namespace.to_string()).or_default();
        let acc = table.entry(key).or_insert(Accumulator {
            total: 0.0,
            value: *weight,
            last: 1,
        });
        acc.total += acc.value * now.saturating_sub(acc.last) as f64;
        acc.last = now.max(acc.last);
        *weight += self.learn_rate * delta;
        acc.value = *weight;
    }

    /// Snapshot of the running averages of every parameter touched so far.
    /// Empty before the first update step.
    pub fn averages(&self) -> ParamAverages {
        if self.nr_update == 0 {
            return ParamAverages::new();
        }
        self.accumulators
            .iter()
            .map(|(namespace, table)| {
                let means = table
                    .iter()
                    .map(|(key, acc)| (key.clone(), acc.mean(self.nr_update)))
                    .collect();
                (namespace.clone(), means)
            })
            .collect()
    }
}

/// Replace `weights` with its averaged view, returning the instantaneous
/// table. Parameters the optimizer never touched keep their current value.
pub fn swap_in_averages(
    namespace: &str,
    weights: &mut Weights,
    averages: &ParamAverages,
) -> Option<Weights> {
    let means = averages.get(namespace)?;
    let mut averaged = weights.clone();
    for (key, mean) in means {
        averaged.insert(key.clone(), *mean);
    }
    Some(std::mem::replace(weights, averaged))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(feature: &str) -> ParamKey {
        ParamKey::new(feature, 0)
    }

    #[test]
    fn test_single_update_average_equals_value() {
        let mut opt = Optimizer::default();
        let mut weights = Weights::new();
        opt.begin_update();
        opt.update_param("tagger", &mut weights, key("w=the"), 1.0);

        let avg = opt.averages();
        assert_eq!(weights[&key("w=the")], 1.0);
        assert_eq!(avg["tagger"][&key("w=the")], 1.0);
    }

    #[test]
    fn test_late_update_is_averaged_over_all_steps() {
        let mut opt = Optimizer::default();
        let mut weights = Weights::new();
        opt.begin_update();
        opt.update_param("tagger", &mut weights, key("bias"), 0.0);
        opt.begin_update();
        opt.update_param("tagger", &mut weights, key("bias"), 1.0);

        // step 1: 0.0, step 2: 1.0
        assert_eq!(opt.averages()["tagger"][&key("bias")], 0.5);
    }

    #[test]
    fn test_untouched_steps_keep_last_value() {
        let mut opt = Optimizer::default();
        let mut weights = Weights::new();
        opt.begin_update();
        opt.update_param("ner", &mut weights, key("bias"), 2.0);
        opt.begin_update();
        opt.begin_update();
        opt.begin_update();

        assert_eq!(opt.averages()["ner"][&key("bias")], 2.0);
    }

    #[test]
    fn test_several_updates_in_one_step() {
        let mut opt = Optimizer::default();
        let mut weights = Weights::new();
        opt.begin_update();
        opt.update_param("parser", &mut weights, key("f"), 1.0);
        opt.update_param("parser", &mut weights, key("f"), 1.0);
        opt.begin_update();
        opt.update_param("parser", &mut weights, key("f"), -2.0);

        // step 1 ends at 2.0, step 2 ends at 0.0
        assert_eq!(opt.averages()["parser"][&key("f")], 1.0);
    }

    #[test]
    fn test_no_averages_before_first_update() {
        assert!(Optimizer::default().averages().is_empty());
    }

    #[test]
    fn test_swap_keeps_untouched_weights() {
        let mut opt = Optimizer::default();
        let mut weights = Weights::new();
        weights.insert(key("loaded"), 3.0);
        opt.begin_update();
        opt.begin_update();
        opt.update_param("tagger", &mut weights, key("fresh"), 1.0);

        let stash = swap_in_averages("tagger", &mut weights, &opt.averages()).unwrap();
        assert_eq!(weights[&key("loaded")], 3.0);
        assert_eq!(weights[&key("fresh")], 0.5);
        assert_eq!(stash[&key("fresh")], 1.0);
    }

    #[test]
    fn test_swap_unknown_namespace_is_noop() {
        let mut weights = Weights::new();
        assert!(swap_in_averages("ner", &mut weights, &ParamAverages::new()).is_none());
    }
}
