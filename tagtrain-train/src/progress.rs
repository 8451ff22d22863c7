//! Per-epoch results table.

use tagtrain_core::scorer::{ENTS_F, ENTS_P, ENTS_R, TAGS_ACC, TOKEN_ACC, UAS};
use tagtrain_core::{Losses, Scores};

pub const PROGRESS_HEADER: &str =
    "Itn.\tDep Loss\tNER Loss\tUAS\tNER P.\tNER R.\tNER F.\tTag %\tToken %\tCPU WPS\tGPU WPS";

/// One tab-separated table row. Absent losses, scores and accelerated
/// throughput print as zero.
pub fn format_progress_row(
    itn: usize,
    losses: &Losses,
    scores: &Scores,
    cpu_wps: f64,
    gpu_wps: Option<f64>,
) -> String {
    let loss = |name: &str| losses.get(name).copied().unwrap_or(0.0);
    let score = |name: &str| scores.get(name).copied().unwrap_or(0.0);
    format!(
        "{itn}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.1}\t{:.1}",
        loss("parser"),
        loss("ner"),
        score(UAS),
        score(ENTS_P),
        score(ENTS_R),
        score(ENTS_F),
        score(TAGS_ACC),
        score(TOKEN_ACC),
        cpu_wps,
        gpu_wps.unwrap_or(0.0),
    )
}
