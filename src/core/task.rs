pub fn max_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// The slice of `len` rows handed to worker `index` out of `count` workers.
pub fn partition(len: usize, index: usize, count: usize) -> std::ops::Range<usize> {
    if count <= 1 {
        return 0..len;
    }

    (len * index / count)..(len * (index + 1) / count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_cover_every_row_once() {
        let len = 10;
        let ranges = (0..3).map(|i| partition(len, i, 3)).collect::<Vec<_>>();

        assert_eq!(ranges, vec![0..3, 3..6, 6..10]);
        assert_eq!(ranges.iter().map(|r| r.len()).sum::<usize>(), len);
    }

    #[test]
    fn single_worker_gets_everything() {
        assert_eq!(partition(7, 0, 1), 0..7);
        assert_eq!(partition(7, 0, 0), 0..7);
    }
}
