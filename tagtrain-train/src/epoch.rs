//! One training epoch: minibatches in, per-component losses out.

use crate::batch::minibatch_by_words;
use crate::error::TrainError;
use crate::schedule::Schedule;
use indicatif::{ProgressBar, ProgressStyle};
use tagtrain_core::{Example, Losses, Optimizer, TrainablePipeline};
use tracing::debug;

/// Drives pipeline updates over an epoch's minibatches.
///
/// Owns the dropout and batch-size schedules for the whole run; their
/// cursors carry over from one epoch to the next.
#[derive(Debug)]
pub struct EpochTrainer {
    dropout: Schedule,
    batch_sizes: Schedule,
    show_progress: bool,
}

impl EpochTrainer {
    pub fn new(dropout: Schedule, batch_sizes: Schedule) -> Self {
        Self {
            dropout,
            batch_sizes,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn dropout(&self) -> &Schedule {
        &self.dropout
    }

    pub fn batch_sizes(&self) -> &Schedule {
        &self.batch_sizes
    }

    /// Run one pass over `examples`. `total_words` sizes the progress bar.
    pub fn train_epoch<P: TrainablePipeline>(
        &mut self,
        nlp: &mut P,
        sgd: &mut Optimizer,
        examples: Vec<Example>,
        total_words: usize,
    ) -> Result<Losses, TrainError> {
        let pb = self.progress_bar(total_words);
        let mut losses = Losses::new();
        let mut batches = 0usize;
        for batch in minibatch_by_words(examples, &mut self.batch_sizes) {
            let drop = self.dropout.advance();
            nlp.update(&batch, sgd, drop, &mut losses)?;
            let words: usize = batch.iter().map(|ex| ex.doc.len()).sum();
            pb.inc(words as u64);
            batches += 1;
        }
        pb.finish_and_clear();
        debug!(batches, ?losses, "Epoch finished");
        Ok(losses)
    }

    fn progress_bar(&self, total_words: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total_words as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>7}/{len:7} words")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    }
}

/// Register side objectives on the parser and entity recognizer.
///
/// Each list is comma-separated; empty entries are ignored. Fails before any
/// training when a list is given for a component the pipeline lacks.
pub fn add_multitask_objectives<P: TrainablePipeline>(
    nlp: &mut P,
    parser_multitasks: &str,
    entity_multitasks: &str,
) -> Result<(), TrainError> {
    for (component, objectives) in [("parser", parser_multitasks), ("ner", entity_multitasks)] {
        let objectives: Vec<&str> = objectives
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .collect();
        if objectives.is_empty() {
            continue;
        }
        let pipe = nlp
            .get_pipe_mut(component)
            .ok_or_else(|| TrainError::config(format!("Needs '{component}' in pipeline")))?;
        for objective in objectives {
            pipe.add_multitask_objective(objective)?;
        }
    }
    Ok(())
}
