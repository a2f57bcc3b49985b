//! Greedy size-balanced partitioning of files across workers.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::scan::FileEntry;

/// Files assigned to one worker.
#[derive(Debug, Clone, Default)]
pub struct SyncPartition {
    /// Files in this partition.
    pub files: Vec<FileEntry>,
    /// Sum of file sizes in this partition.
    pub total_bytes: u64,
}

impl SyncPartition {
    /// Whether the partition holds no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Distribute files across `worker_count` partitions, assigning each file
/// to the currently lightest partition in descending size order. The
/// heaviest partition ends at most one file above the ideal average.
///
/// Ties on total size break by partition index, so the assignment is
/// deterministic for a given input order.
#[must_use]
pub fn partition(mut files: Vec<FileEntry>, worker_count: usize) -> Vec<SyncPartition> {
    let worker_count = worker_count.max(1);
    let mut partitions = vec![SyncPartition::default(); worker_count];

    files.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.name.cmp(&b.name)));

    let mut heap: BinaryHeap<Reverse<(u64, usize)>> =
        (0..worker_count).map(|i| Reverse((0u64, i))).collect();

    for file in files {
        let Reverse((total, index)) = heap.pop().expect("heap seeded with one entry per worker");
        let total = total + file.size;
        partitions[index].total_bytes += file.size;
        partitions[index].files.push(file);
        heap.push(Reverse((total, index)));
    }

    partitions
}
