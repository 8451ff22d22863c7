//! Minibatch partitioning by word count.

use std::iter::Peekable;
use tagtrain_core::{Doc, Example};

/// Anything whose size is measured in tokens.
pub trait TokenCount {
    fn token_count(&self) -> usize;
}

impl TokenCount for Doc {
    fn token_count(&self) -> usize {
        self.len()
    }
}

impl TokenCount for Example {
    fn token_count(&self) -> usize {
        self.doc.len()
    }
}

/// Batches of `items`, each closed as soon as its cumulative token count
/// reaches the target drawn from `sizes` for that batch. An item larger than
/// the target closes its own batch; items are never split. Exactly one
/// target is drawn per yielded batch.
pub fn minibatch_by_words<I, S>(items: I, sizes: S) -> Minibatches<I::IntoIter, S>
where
    I: IntoIterator,
    I::Item: TokenCount,
    S: Iterator<Item = f64>,
{
    Minibatches {
        items: items.into_iter().peekable(),
        sizes,
    }
}

pub struct Minibatches<I: Iterator, S> {
    items: Peekable<I>,
    sizes: S,
}

impl<I, S> Iterator for Minibatches<I, S>
where
    I: Iterator,
    I::Item: TokenCount,
    S: Iterator<Item = f64>,
{
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.peek()?;
        let target = self.sizes.next()?;
        let mut batch = Vec::new();
        let mut words = 0usize;
        for item in self.items.by_ref() {
            words += item.token_count();
            batch.push(item);
            if words as f64 >= target {
                break;
            }
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Schedule;
    use pretty_assertions::assert_eq;

    struct Len(usize);

    impl TokenCount for Len {
        fn token_count(&self) -> usize {
            self.0
        }
    }

    fn sizes(batches: &[Vec<Len>]) -> Vec<Vec<usize>> {
        batches
            .iter()
            .map(|b| b.iter().map(|l| l.0).collect())
            .collect()
    }

    #[test]
    fn test_closes_when_target_is_met() {
        let items = [3, 2, 5, 1, 1, 4].map(Len);
        let batches: Vec<_> = minibatch_by_words(items, std::iter::repeat(5.0)).collect();
        assert_eq!(sizes(&batches), vec![vec![3, 2], vec![5], vec![1, 1, 4]]);
    }

    #[test]
    fn test_oversized_item_gets_its_own_batch() {
        let items = [1, 50, 1].map(Len);
        let batches: Vec<_> = minibatch_by_words(items, std::iter::repeat(2.0)).collect();
        assert_eq!(sizes(&batches), vec![vec![1, 50], vec![1]]);
        let items = [50, 1].map(Len);
        let batches: Vec<_> = minibatch_by_words(items, std::iter::repeat(2.0)).collect();
        assert_eq!(sizes(&batches), vec![vec![50], vec![1]]);
    }

    #[test]
    fn test_empty_input_yields_nothing_and_draws_nothing() {
        let mut schedule = Schedule::compounding(1.0, None, 2.0);
        let batches: Vec<Vec<Len>> = minibatch_by_words(Vec::new(), &mut schedule).collect();
        assert!(batches.is_empty());
        assert_eq!(schedule.steps_taken(), 0);
    }

    #[test]
    fn test_one_draw_per_batch_and_cursor_persists() {
        let mut schedule = Schedule::compounding(2.0, None, 2.0);
        let first: Vec<_> = minibatch_by_words([1, 1, 1].map(Len), &mut schedule).collect();
        assert_eq!(sizes(&first), vec![vec![1, 1], vec![1]]);
        assert_eq!(schedule.steps_taken(), 2);

        // next epoch continues from target 8
        let second: Vec<_> = minibatch_by_words([4, 4, 4].map(Len), &mut schedule).collect();
        assert_eq!(sizes(&second), vec![vec![4, 4], vec![4]]);
        assert_eq!(schedule.steps_taken(), 4);
    }
}
