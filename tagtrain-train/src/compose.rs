//! Cross-epoch best-model selection.
//!
//! Each component is ranked independently over every persisted epoch, so the
//! composite `model-best` can hold the parser from one epoch and the entity
//! recognizer from another. Rankings are re-derived from the `accuracy.json`
//! files on disk; nothing from the training run needs to be in memory.

use crate::error::TrainError;
use crate::meta::ModelMeta;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tagtrain_core::persistence::{atomic_write_json, copy_dir_all, load_json, replace_dir};
use tagtrain_core::scorer::{ENTS_F, ENTS_P, ENTS_R, LAS, TAGS_ACC, TOKEN_ACC, UAS};
use tagtrain_core::{ComponentKind, Scores};
use tracing::{info, warn};

pub const FINAL_DIR: &str = "model-final";
pub const BEST_DIR: &str = "model-best";
pub const ACCURACY_FILE: &str = "accuracy.json";
pub const META_FILE: &str = "meta.json";

/// Metrics a component is ranked by, most significant first.
pub fn ranking_metrics(kind: ComponentKind) -> &'static [&'static str] {
    match kind {
        ComponentKind::Parser => &[LAS, UAS, TOKEN_ACC],
        ComponentKind::Tagger => &[TAGS_ACC],
        ComponentKind::Ner => &[ENTS_F, ENTS_P, ENTS_R],
        ComponentKind::Other => &[TOKEN_ACC],
    }
}

/// Project `scores` onto the ranking tuple of `kind`; missing metrics are 0.
pub fn ranking_key(scores: &Scores, kind: ComponentKind) -> Vec<f64> {
    ranking_metrics(kind)
        .iter()
        .map(|m| scores.get(*m).copied().unwrap_or(0.0))
        .collect()
}

fn compare_keys(a: &[f64], b: &[f64]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Epoch index encoded in a directory name of the form `model<digits>`.
pub fn epoch_index(name: &str) -> Option<usize> {
    let digits = name.strip_prefix("model")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Epoch snapshot directories under `output_path`, ordered by epoch.
/// `model-final`, `model-best` and anything else not named `model<digits>`
/// are ignored.
pub fn epoch_dirs(output_path: &Path) -> Result<Vec<(usize, PathBuf)>, TrainError> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(output_path)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(epoch) = entry.file_name().to_str().and_then(epoch_index) {
            dirs.push((epoch, entry.path()));
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Tournament winner for one component.
#[derive(Debug, Clone, PartialEq)]
pub struct BestEpoch {
    pub epoch: usize,
    pub location: PathBuf,
    pub accuracy: Scores,
    pub key: Vec<f64>,
}

/// Epoch whose `accuracy.json` ranks highest for `kind`, among the first
/// `n_epochs` epochs. On a tie the later epoch wins. Epochs without an
/// accuracy file, and directories left behind by a longer earlier run in the
/// same output path, are skipped.
pub fn find_best(
    output_path: &Path,
    kind: ComponentKind,
    n_epochs: usize,
) -> Result<Option<BestEpoch>, TrainError> {
    let mut best: Option<BestEpoch> = None;
    for (epoch, location) in epoch_dirs(output_path)? {
        if epoch >= n_epochs {
            warn!(epoch, n_epochs, "Ignoring epoch directory from an earlier run");
            continue;
        }
        let accuracy: Scores = match load_json(&location.join(ACCURACY_FILE))? {
            Some(accuracy) => accuracy,
            None => {
                warn!(epoch, "No accuracy file, skipping epoch");
                continue;
            }
        };
        let key = ranking_key(&accuracy, kind);
        let wins = best
            .as_ref()
            .is_none_or(|b| compare_keys(&key, &b.key) != Ordering::Less);
        if wins {
            best = Some(BestEpoch {
                epoch,
                location,
                accuracy,
                key,
            });
        }
    }
    Ok(best)
}

/// Assemble `model-best` from `model-final`, replacing each component's
/// sub-state with that of its best epoch, and write the composite meta.
///
/// Components without a winner keep their final-snapshot state.
pub fn collate_best_model(
    output_path: &Path,
    components: &[(String, ComponentKind)],
    meta: &ModelMeta,
    n_epochs: usize,
) -> Result<PathBuf, TrainError> {
    let final_dir = output_path.join(FINAL_DIR);
    let best_dir = output_path.join(BEST_DIR);
    if best_dir.exists() {
        std::fs::remove_dir_all(&best_dir)?;
    }
    copy_dir_all(&final_dir, &best_dir)?;

    let mut meta = meta.clone();
    for (component, kind) in components {
        let Some(best) = find_best(output_path, *kind, n_epochs)? else {
            continue;
        };
        let source = best.location.join(component);
        if !source.is_dir() {
            return Err(TrainError::Tournament {
                component: component.clone(),
                path: source,
                reason: "winning epoch has no snapshot for this component".into(),
            });
        }
        replace_dir(&source, &best_dir.join(component)).map_err(|e| TrainError::Tournament {
            component: component.clone(),
            path: source.clone(),
            reason: e.to_string(),
        })?;
        for metric in ranking_metrics(*kind) {
            if let Some(value) = best.accuracy.get(*metric) {
                meta.accuracy.insert(metric.to_string(), *value);
            }
        }
        info!(component = %component, epoch = best.epoch, score = ?best.key, "Selected best epoch");
    }
    atomic_write_json(&best_dir.join(META_FILE), &meta)?;
    Ok(best_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_epoch(root: &Path, name: &str, scores: &[(&str, f64)]) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let scores: Scores = scores.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        atomic_write_json(&dir.join(ACCURACY_FILE), &scores).unwrap();
    }

    #[test]
    fn test_epoch_index() {
        assert_eq!(epoch_index("model0"), Some(0));
        assert_eq!(epoch_index("model12"), Some(12));
        assert_eq!(epoch_index("model-final"), None);
        assert_eq!(epoch_index("model-best"), None);
        assert_eq!(epoch_index("model"), None);
        assert_eq!(epoch_index("vocab"), None);
    }

    #[test]
    fn test_epoch_dirs_sort_numerically() {
        let dir = TempDir::new().unwrap();
        for name in ["model10", "model2", "model-final", "model-best", "notes"] {
            std::fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        let epochs: Vec<usize> = epoch_dirs(dir.path())
            .unwrap()
            .into_iter()
            .map(|(e, _)| e)
            .collect();
        assert_eq!(epochs, vec![2, 10]);
    }

    #[test]
    fn test_lexicographic_ranking() {
        let dir = TempDir::new().unwrap();
        write_epoch(dir.path(), "model0", &[("las", 80.0), ("uas", 95.0)]);
        write_epoch(dir.path(), "model1", &[("las", 80.0), ("uas", 96.0)]);
        write_epoch(dir.path(), "model2", &[("las", 79.0), ("uas", 99.0)]);
        let best = find_best(dir.path(), ComponentKind::Parser, 3).unwrap().unwrap();
        assert_eq!(best.epoch, 1);
    }

    #[test]
    fn test_tie_goes_to_later_epoch() {
        let dir = TempDir::new().unwrap();
        write_epoch(dir.path(), "model9", &[("tags_acc", 90.0)]);
        write_epoch(dir.path(), "model10", &[("tags_acc", 90.0)]);
        let best = find_best(dir.path(), ComponentKind::Tagger, 11).unwrap().unwrap();
        assert_eq!(best.epoch, 10);
    }

    #[test]
    fn test_missing_metrics_rank_as_zero() {
        let dir = TempDir::new().unwrap();
        write_epoch(dir.path(), "model0", &[("ents_p", 10.0)]);
        write_epoch(dir.path(), "model1", &[("ents_f", 5.0)]);
        let best = find_best(dir.path(), ComponentKind::Ner, 2).unwrap().unwrap();
        assert_eq!(best.epoch, 1);
        assert_eq!(best.key, vec![5.0, 0.0, 0.0]);
    }

    #[test]
    fn test_no_epochs_no_winner() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(FINAL_DIR)).unwrap();
        assert!(find_best(dir.path(), ComponentKind::Parser, 30).unwrap().is_none());
    }

    #[test]
    fn test_winner_without_component_is_fatal() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(FINAL_DIR).join("parser")).unwrap();
        write_epoch(dir.path(), "model0", &[("las", 50.0)]);
        let err = collate_best_model(
            dir.path(),
            &[("parser".into(), ComponentKind::Parser)],
            &ModelMeta::default(),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, TrainError::Tournament { .. }));
    }

    #[test]
    fn test_collate_replaces_only_component_state() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join(FINAL_DIR).join("parser")).unwrap();
        std::fs::create_dir_all(root.join(FINAL_DIR).join("tagger")).unwrap();
        std::fs::write(root.join(FINAL_DIR).join("parser/state"), "final").unwrap();
        std::fs::write(root.join(FINAL_DIR).join("tagger/state"), "final").unwrap();
        std::fs::write(root.join(FINAL_DIR).join("config.json"), "{}").unwrap();
        for (i, las) in [80.0, 91.0, 85.0].into_iter().enumerate() {
            let name = format!("model{i}");
            write_epoch(root, &name, &[("las", las), ("uas", 95.0), ("tags_acc", 50.0)]);
            std::fs::create_dir_all(root.join(&name).join("parser")).unwrap();
            std::fs::write(root.join(&name).join("parser/state"), format!("epoch{i}")).unwrap();
        }
        let meta = ModelMeta {
            accuracy: Scores::from([("las".to_string(), 85.0), ("ents_f".to_string(), 1.0)]),
            ..Default::default()
        };

        let best =
            collate_best_model(root, &[("parser".into(), ComponentKind::Parser)], &meta, 3)
                .unwrap();

        assert_eq!(std::fs::read_to_string(best.join("parser/state")).unwrap(), "epoch1");
        assert_eq!(std::fs::read_to_string(best.join("tagger/state")).unwrap(), "final");
        assert!(best.join("config.json").exists());
        let written: ModelMeta = load_json(&best.join(META_FILE)).unwrap().unwrap();
        assert_eq!(written.accuracy["las"], 91.0);
        assert_eq!(written.accuracy["uas"], 95.0);
        assert_eq!(written.accuracy["ents_f"], 1.0);
        assert!(!written.accuracy.contains_key("token_acc"));
    }

    #[test]
    fn test_epochs_from_a_longer_earlier_run_are_ignored() {
        let dir = TempDir::new().unwrap();
        write_epoch(dir.path(), "model0", &[("tags_acc", 60.0)]);
        write_epoch(dir.path(), "model1", &[("tags_acc", 70.0)]);
        write_epoch(dir.path(), "model5", &[("tags_acc", 99.0)]);

        let best = find_best(dir.path(), ComponentKind::Tagger, 2).unwrap().unwrap();
        assert_eq!(best.epoch, 1);
        assert_eq!(best.key, vec![70.0]);

        let all = find_best(dir.path(), ComponentKind::Tagger, 6).unwrap().unwrap();
        assert_eq!(all.epoch, 5);
    }
}
