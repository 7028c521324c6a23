//! Partition selection.
//!
//! Routes vectors and queries to centroids: [`assign_partitions`] bins a
//! vector set for index construction, [`select_partitions`] picks the
//! partitions each query of a batch has to scan.

use core::num::NonZeroUsize;
use log::debug;
use rayon::prelude::*;
use std::time::Instant;

use crate::error::Error;
use crate::linalg::Distance;
use crate::matrix::ColMajorMatrix;
use crate::nbest::NBestHeap;

use super::worker_pool;

/// Partitions relevant to a query batch.
pub struct ProbeResult {
    /// Distinct partitions probed by at least one query, in ascending
    /// order.
    pub active_partitions: Vec<usize>,
    /// For each active partition, the queries that probed it, in ascending
    /// order. Runs parallel to `active_partitions`.
    pub active_queries: Vec<Vec<usize>>,
}

// Checks that two vector sets can be compared column by column.
fn check_shapes<T, C>(
    centroids: &ColMajorMatrix<C>,
    vectors: &ColMajorMatrix<T>,
    what: &str,
) -> Result<(), Error> {
    if centroids.num_cols() == 0 {
        return Err(Error::InvalidArgs(
            "centroids must not be empty".to_string(),
        ));
    }
    if vectors.num_cols() == 0 {
        return Err(Error::InvalidArgs(format!(
            "{} must not be empty",
            what,
        )));
    }
    if vectors.num_rows() != centroids.num_rows() {
        return Err(Error::InvalidArgs(format!(
            "{} have {} rows but centroids have {}",
            what,
            vectors.num_rows(),
            centroids.num_rows(),
        )));
    }
    Ok(())
}

/// Assigns every vector of a set to its nearest centroid.
///
/// Ties break toward the smaller centroid index. A worker count of zero
/// substitutes the host concurrency.
pub fn assign_partitions<T, C, D>(
    centroids: &ColMajorMatrix<C>,
    vectors: &ColMajorMatrix<T>,
    nthreads: usize,
    metric: &D,
) -> Result<Vec<usize>, Error>
where
    T: Copy + Sync,
    C: Copy + Sync,
    D: Distance<T, C> + Sync,
{
    check_shapes(centroids, vectors, "vectors")?;
    let time = Instant::now();
    let pool = worker_pool(nthreads)?;
    let parts = pool.install(|| {
        (0..vectors.num_cols())
            .into_par_iter()
            .map(|i| {
                let v = vectors.col(i);
                let mut min_score = f32::INFINITY;
                let mut min_index = 0;
                for c in 0..centroids.num_cols() {
                    let score = metric.distance(v, centroids.col(c));
                    if score < min_score {
                        min_score = score;
                        min_index = c;
                    }
                }
                min_index
            })
            .collect()
    });
    debug!(
        "assigned {} vectors to {} partitions in {} μs",
        vectors.num_cols(),
        centroids.num_cols(),
        time.elapsed().as_micros(),
    );
    Ok(parts)
}

/// Selects the `nprobe` nearest partitions of every query in a batch.
///
/// Ties among centroid distances break toward the smaller centroid index.
/// A worker count of zero substitutes the host concurrency.
pub fn select_partitions<T, C, D>(
    centroids: &ColMajorMatrix<C>,
    queries: &ColMajorMatrix<T>,
    nprobe: NonZeroUsize,
    nthreads: usize,
    metric: &D,
) -> Result<ProbeResult, Error>
where
    T: Copy + Sync,
    C: Copy + Sync,
    D: Distance<T, C> + Sync,
{
    check_shapes(centroids, queries, "queries")?;
    if nprobe.get() > centroids.num_cols() {
        return Err(Error::InvalidArgs(format!(
            "nprobe ({}) exceeds the number of partitions ({})",
            nprobe,
            centroids.num_cols(),
        )));
    }
    let time = Instant::now();
    let pool = worker_pool(nthreads)?;
    let selected: Vec<Vec<usize>> = pool.install(|| {
        (0..queries.num_cols())
            .into_par_iter()
            .map(|j| {
                let query = queries.col(j);
                let mut nearest = NBestHeap::new(nprobe);
                for c in 0..centroids.num_cols() {
                    nearest.insert(metric.distance(query, centroids.col(c)), c);
                }
                nearest
                    .drain_sorted()
                    .into_iter()
                    .map(|(_, c)| c)
                    .collect()
            })
            .collect()
    });
    let mut queries_for: Vec<Vec<usize>> =
        vec![Vec::new(); centroids.num_cols()];
    for (j, parts) in selected.iter().enumerate() {
        for &p in parts {
            queries_for[p].push(j);
        }
    }
    let mut active_partitions = Vec::new();
    let mut active_queries = Vec::new();
    for (p, js) in queries_for.into_iter().enumerate() {
        if !js.is_empty() {
            active_partitions.push(p);
            active_queries.push(js);
        }
    }
    debug!(
        "selected {} active partitions for {} queries in {} μs",
        active_partitions.len(),
        queries.num_cols(),
        time.elapsed().as_micros(),
    );
    Ok(ProbeResult {
        active_partitions,
        active_queries,
    })
}
