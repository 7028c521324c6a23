//! Inverted-file (IVF) index construction and search.
//!
//! Use the `index` submodule to build an index over a vector set.
//!
//! Use the `query` submodule to search a built index.

pub mod index;
pub mod partition;
pub mod query;

use core::num::NonZeroUsize;

use crate::error::Error;

/// Parameters of a top-k search.
#[derive(Clone, Debug)]
pub struct SearchParams {
    // Number of neighbors returned per query.
    k: NonZeroUsize,
    // Number of partitions probed per query.
    nprobe: NonZeroUsize,
    // Number of worker threads per node.
    nthreads: usize,
    // Number of simulated compute nodes.
    num_nodes: NonZeroUsize,
    // Column budget per partition load.
    upper_bound: usize,
}

impl SearchParams {
    /// Creates parameters that return `k` neighbors per query while probing
    /// `nprobe` partitions.
    ///
    /// Defaults to a worker count of zero (host concurrency), a single
    /// node, and no column budget.
    pub fn new(k: NonZeroUsize, nprobe: NonZeroUsize) -> Self {
        Self {
            k,
            nprobe,
            nthreads: 0,
            num_nodes: NonZeroUsize::MIN,
            upper_bound: 0,
        }
    }

    /// Sets the number of worker threads per node.
    ///
    /// Zero substitutes the host concurrency.
    pub fn with_nthreads(mut self, nthreads: usize) -> Self {
        self.nthreads = nthreads;
        self
    }

    /// Sets the number of simulated compute nodes.
    pub fn with_num_nodes(mut self, num_nodes: NonZeroUsize) -> Self {
        self.num_nodes = num_nodes;
        self
    }

    /// Sets the column budget per partition load.
    ///
    /// Zero loads all active partitions into RAM.
    pub fn with_upper_bound(mut self, upper_bound: usize) -> Self {
        self.upper_bound = upper_bound;
        self
    }

    /// Returns the number of neighbors returned per query.
    pub fn k(&self) -> NonZeroUsize {
        self.k
    }

    /// Returns the number of partitions probed per query.
    pub fn nprobe(&self) -> NonZeroUsize {
        self.nprobe
    }

    /// Returns the number of worker threads per node.
    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    /// Returns the number of simulated compute nodes.
    pub fn num_nodes(&self) -> NonZeroUsize {
        self.num_nodes
    }

    /// Returns the column budget per partition load.
    pub fn upper_bound(&self) -> usize {
        self.upper_bound
    }
}

// Builds a pool of worker threads; a count of zero substitutes the host
// concurrency.
pub(crate) fn worker_pool(nthreads: usize) -> Result<rayon::ThreadPool, Error> {
    let nthreads = if nthreads == 0 {
        num_cpus::get()
    } else {
        nthreads
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(nthreads)
        .build()
        .map_err(|e| Error::InvalidContext(format!(
            "failed to build a worker pool: {}",
            e,
        )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_params_default_to_one_node_and_host_concurrency() {
        let params = SearchParams::new(
            10.try_into().unwrap(),
            3.try_into().unwrap(),
        );
        assert_eq!(params.k().get(), 10);
        assert_eq!(params.nprobe().get(), 3);
        assert_eq!(params.nthreads(), 0);
        assert_eq!(params.num_nodes().get(), 1);
        assert_eq!(params.upper_bound(), 0);
    }

    #[test]
    fn search_params_can_override_sharding_knobs() {
        let params = SearchParams::new(
            1.try_into().unwrap(),
            1.try_into().unwrap(),
        )
            .with_nthreads(8)
            .with_num_nodes(4.try_into().unwrap())
            .with_upper_bound(1000);
        assert_eq!(params.nthreads(), 8);
        assert_eq!(params.num_nodes().get(), 4);
        assert_eq!(params.upper_bound(), 1000);
    }
}
