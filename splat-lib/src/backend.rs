//! Execution backends for the per-element stages.
//!
//! Every stage is a map over independent elements, so the backend only
//! decides how that map is scheduled. Results keep input order on both.

use rayon::prelude::*;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionBackend {
    /// Single thread, in order.
    Cpu,
    /// Data-parallel across the rayon thread pool. This is the accelerated
    /// path; the element kernels are identical on both backends.
    #[default]
    Parallel,
}

impl ExecutionBackend {
    pub fn map<T, U, F>(self, items: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        match self {
            Self::Cpu => items.iter().map(f).collect(),
            Self::Parallel => items.par_iter().map(f).collect(),
        }
    }

    /// Fallible map. The element index is passed so errors can name it; the
    /// whole batch fails when any element fails.
    pub fn try_map<T, U, E, F>(self, items: &[T], f: F) -> Result<Vec<U>, E>
    where
        T: Sync,
        U: Send,
        E: Send,
        F: Fn(usize, &T) -> Result<U, E> + Sync + Send,
    {
        match self {
            Self::Cpu => items.iter().enumerate().map(|(i, t)| f(i, t)).collect(),
            Self::Parallel => items
                .par_iter()
                .enumerate()
                .map(|(i, t)| f(i, t))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backends_preserve_order() {
        let items: Vec<u32> = (0..10_000).collect();
        let cpu = ExecutionBackend::Cpu.map(&items, |x| x * 2);
        let parallel = ExecutionBackend::Parallel.map(&items, |x| x * 2);
        assert_eq!(cpu, parallel);
        assert_eq!(cpu[1234], 2468);
    }

    #[test]
    fn try_map_fails_whole_batch() {
        let items: Vec<i32> = (0..1000).collect();
        for backend in [ExecutionBackend::Cpu, ExecutionBackend::Parallel] {
            let result = backend.try_map(&items, |i, &x| if x == 500 { Err(i) } else { Ok(x) });
            assert_eq!(result, Err(500));

            let result: Result<Vec<i32>, usize> = backend.try_map(&items, |_, &x| Ok(x + 1));
            assert_eq!(result.unwrap().len(), 1000);
        }
    }
}
