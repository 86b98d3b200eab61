//! Two-stage train / validation / test split.

use crate::dataset::{Corpus, ImageSample};
use crate::error::{TrainingError, TrainingResult};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionRole {
    Train,
    Validation,
    Test,
}

impl std::fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Train => "train",
            Self::Validation => "validation",
            Self::Test => "test",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Share of the corpus used for training.
    pub train_fraction: f64,
    /// Share of the remainder used for validation; test gets the rest.
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self { train_fraction: 0.8, validation_fraction: 0.5, seed: 42 }
    }
}

impl SplitConfig {
    pub fn validate(&self) -> TrainingResult<()> {
        for (name, value) in
            [("train_fraction", self.train_fraction), ("validation_fraction", self.validation_fraction)]
        {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(TrainingError::InvalidSpec(format!("split.{name} must be within [0, 1]")));
            }
        }
        Ok(())
    }
}

/// A disjoint subset of the corpus with a fixed role.
#[derive(Debug, Clone)]
pub struct Partition {
    pub role: PartitionRole,
    pub samples: Vec<ImageSample>,
}

impl Partition {
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DatasetSplits {
    pub train: Partition,
    pub validation: Partition,
    pub test: Partition,
}

impl DatasetSplits {
    #[must_use]
    pub fn sizes(&self) -> SplitSizes {
        SplitSizes { train: self.train.len(), validation: self.validation.len(), test: self.test.len() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SplitSizes {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

fn split_off(mut samples: Vec<ImageSample>, fraction: f64) -> (Vec<ImageSample>, Vec<ImageSample>) {
    let head = ((samples.len() as f64) * fraction).floor() as usize;
    let tail = samples.split_off(head.min(samples.len()));
    (samples, tail)
}

/// Shuffle once, then split `train | rest` and `validation | test`.
///
/// Partitions are disjoint and together cover the corpus exactly.
pub fn split_corpus(corpus: &Corpus, config: &SplitConfig) -> TrainingResult<DatasetSplits> {
    config.validate()?;

    let mut samples = corpus.samples().to_vec();
    let mut rng = StdRng::seed_from_u64(config.seed);
    samples.shuffle(&mut rng);

    let (train, rest) = split_off(samples, config.train_fraction);
    let (validation, test) = split_off(rest, config.validation_fraction);

    Ok(DatasetSplits {
        train: Partition { role: PartitionRole::Train, samples: train },
        validation: Partition { role: PartitionRole::Validation, samples: validation },
        test: Partition { role: PartitionRole::Test, samples: test },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Label;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn corpus(n: usize) -> Corpus {
        let labels = vec![Label::new("A").unwrap(), Label::new("B").unwrap()];
        let samples = (0..n)
            .map(|i| ImageSample { path: PathBuf::from(format!("img-{i}.png")), class_index: i % 2 })
            .collect();
        Corpus::new(labels, samples)
    }

    #[test]
    fn test_split_is_disjoint_and_exhaustive() {
        let corpus = corpus(103);
        let splits = split_corpus(&corpus, &SplitConfig::default()).unwrap();

        let sizes = splits.sizes();
        assert_eq!(sizes.train + sizes.validation + sizes.test, 103);

        let mut seen = HashSet::new();
        for p in [&splits.train, &splits.validation, &splits.test] {
            for s in &p.samples {
                assert!(seen.insert(s.path.clone()), "duplicate sample {:?}", s.path);
            }
        }
        assert_eq!(seen.len(), 103);
    }

    #[test]
    fn test_split_proportions() {
        let splits = split_corpus(&corpus(100), &SplitConfig::default()).unwrap();
        assert_eq!(splits.sizes(), SplitSizes { train: 80, validation: 10, test: 10 });

        let splits = split_corpus(&corpus(7), &SplitConfig::default()).unwrap();
        assert_eq!(splits.sizes(), SplitSizes { train: 5, validation: 1, test: 1 });
    }

    #[test]
    fn test_split_roles_and_determinism() {
        let a = split_corpus(&corpus(40), &SplitConfig::default()).unwrap();
        let b = split_corpus(&corpus(40), &SplitConfig::default()).unwrap();
        assert_eq!(a.train.role, PartitionRole::Train);
        assert_eq!(a.validation.role, PartitionRole::Validation);
        assert_eq!(a.test.role, PartitionRole::Test);
        assert_eq!(a.test.samples, b.test.samples);
    }

    #[test]
    fn test_empty_corpus_yields_empty_partitions() {
        let splits = split_corpus(&corpus(0), &SplitConfig::default()).unwrap();
        assert_eq!(splits.sizes(), SplitSizes::default());
    }

    #[test]
    fn test_rejects_out_of_range_fraction() {
        let config = SplitConfig { train_fraction: 1.5, ..SplitConfig::default() };
        assert!(split_corpus(&corpus(10), &config).is_err());
    }
}
