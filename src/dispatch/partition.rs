//! Batch partitioning
//!
//! Batch `i` holds the test cases at positions `[i*B, min((i+1)*B, N))`.

use std::num::NonZeroUsize;

use crate::models::{Batch, TestCase};

/// Split test cases into consecutive batches of at most `size`
pub fn partition(test_cases: Vec<TestCase>, size: NonZeroUsize) -> Vec<Batch> {
    let size = size.get();
    let mut batches = Vec::with_capacity(test_cases.len().div_ceil(size));
    let mut iter = test_cases.into_iter().peekable();

    while iter.peek().is_some() {
        let index = batches.len() as u32;
        batches.push(Batch::new(index, iter.by_ref().take(size).collect()));
    }

    batches
}

/// Partition with an optional size; `None` yields a single batch
pub fn partition_or_single(test_cases: Vec<TestCase>, size: Option<NonZeroUsize>) -> Vec<Batch> {
    match size {
        Some(size) => partition(test_cases, size),
        None if test_cases.is_empty() => Vec::new(),
        None => vec![Batch::new(0, test_cases)],
    }
}
