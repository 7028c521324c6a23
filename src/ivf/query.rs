//! Distributed finite-RAM query execution.
//!
//! [`search`] answers a query batch against a built index: it probes the
//! relevant partitions, shards them over simulated compute nodes, and
//! merges the per-node results into one top-k matrix. [`search_shard`] is
//! the per-node stage; an external task graph may call it directly on
//! peer processes and merge the returned heaps itself.

use core::num::NonZeroUsize;
use log::debug;
use rayon::prelude::*;
use std::time::Instant;

use crate::error::Error;
use crate::io::{ArrayElement, ArrayStore};
use crate::linalg::Distance;
use crate::matrix::ColMajorMatrix;
use crate::nbest::NBestHeap;
use crate::numbers::IndexInt;
use crate::partitions::PartitionedColMajorMatrix;

use super::partition::{ProbeResult, select_partitions};
use super::{SearchParams, worker_pool};

// Scans a contiguous range of loaded partitions.
//
// Feeds the n-best heap of every query routed to a partition in
// `[first_part, last_part)` with the scores of that partition's columns.
// Queries routed elsewhere come back with empty heaps.
fn scan_partition_range<T, I, D>(
    queries: &ColMajorMatrix<T>,
    shuffled: &PartitionedColMajorMatrix<T, I>,
    active_queries: &[Vec<usize>],
    k: NonZeroUsize,
    first_part: usize,
    last_part: usize,
    metric: &D,
) -> Vec<NBestHeap<I>>
where
    T: ArrayElement,
    I: ArrayElement + IndexInt,
    D: Distance<T>,
{
    let mut min_scores: Vec<NBestHeap<I>> = (0..queries.num_cols())
        .map(|_| NBestHeap::new(k))
        .collect();
    for p in first_part..last_part {
        let cols = shuffled.part_range(p);
        for &j in &active_queries[p] {
            let query = queries.col(j);
            for kp in cols.clone() {
                let score = metric.distance(query, shuffled.col(kp));
                min_scores[j].insert(score, shuffled.ids()[kp]);
            }
        }
    }
    min_scores
}

/// Answers a query batch against one node's share of the active
/// partitions.
///
/// Loads the given partitions into memory in one pass, scans them with
/// `nthreads` parallel workers (zero substitutes the host concurrency),
/// and returns one n-best heap per query of the batch. `active_queries`
/// runs parallel to `active_partitions`; `col_part_offset` is where this
/// node's share starts within the batch-wide active partition list.
pub fn search_shard<T, X, I, S, D>(
    store: &S,
    part_uri: &str,
    active_partitions: &[usize],
    col_part_offset: usize,
    queries: &ColMajorMatrix<T>,
    active_queries: &[Vec<usize>],
    indices: &[X],
    id_uri: &str,
    k: NonZeroUsize,
    nthreads: usize,
    metric: &D,
) -> Result<Vec<NBestHeap<I>>, Error>
where
    T: ArrayElement + Sync,
    X: IndexInt,
    I: ArrayElement + IndexInt,
    S: ArrayStore,
    D: Distance<T> + Sync,
{
    let shuffled: PartitionedColMajorMatrix<T, I> =
        PartitionedColMajorMatrix::load(
            store,
            part_uri,
            indices,
            active_partitions,
            col_part_offset,
            id_uri,
            0,
        )?;
    if queries.num_rows() != shuffled.num_rows() {
        return Err(Error::InvalidArgs(format!(
            "queries have {} rows but stored vectors have {}",
            queries.num_rows(),
            shuffled.num_rows(),
        )));
    }
    let time = Instant::now();
    let num_queries = queries.num_cols();
    let num_parts = shuffled.num_col_parts();
    let pool = worker_pool(nthreads)?;
    let nthreads = pool.current_num_threads();
    let parts_per_thread = (num_parts + nthreads - 1) / nthreads;
    let ranges: Vec<(usize, usize)> = (0..nthreads)
        .map(|n| (
            num_parts.min(n * parts_per_thread),
            num_parts.min((n + 1) * parts_per_thread),
        ))
        .filter(|(first_part, last_part)| first_part != last_part)
        .collect();
    let per_range: Vec<Vec<NBestHeap<I>>> = pool.install(|| {
        ranges
            .into_par_iter()
            .map(|(first_part, last_part)| scan_partition_range(
                queries,
                &shuffled,
                active_queries,
                k,
                first_part,
                last_part,
                metric,
            ))
            .collect()
    });
    let mut min_scores: Vec<NBestHeap<I>> = (0..num_queries)
        .map(|_| NBestHeap::new(k))
        .collect();
    for range_scores in per_range {
        for (j, scores) in range_scores.into_iter().enumerate() {
            min_scores[j].merge(scores);
        }
    }
    debug!(
        "scanned {} partitions for {} queries in {} μs",
        num_parts,
        num_queries,
        time.elapsed().as_micros(),
    );
    Ok(min_scores)
}

/// Answers a query batch against a built index.
///
/// Probes `nprobe` partitions per query, shards the active partitions over
/// the configured number of nodes, and merges the per-node results.
///
/// Returns a `k` × `num_queries` column-major matrix of external ids;
/// column `j` lists the neighbors of query `j` in ascending distance
/// order, ties broken toward the smaller id. When a query matched fewer
/// than `k` vectors, the remaining slots hold the id type's maximum value.
pub fn search<T, C, X, I, S, D>(
    store: &S,
    part_uri: &str,
    centroids: &ColMajorMatrix<C>,
    queries: &ColMajorMatrix<T>,
    indices: &[X],
    id_uri: &str,
    params: &SearchParams,
    metric: &D,
) -> Result<ColMajorMatrix<I>, Error>
where
    T: ArrayElement + Sync,
    C: Copy + Sync,
    X: IndexInt,
    I: ArrayElement + IndexInt,
    S: ArrayStore,
    D: Distance<T> + Distance<T, C> + Sync,
{
    let time = Instant::now();
    if indices.len() != centroids.num_cols() + 1 {
        return Err(Error::InvalidArgs(format!(
            "index array has {} entries, expected {}",
            indices.len(),
            centroids.num_cols() + 1,
        )));
    }
    if params.upper_bound() != 0 {
        return Err(Error::InvalidArgs(format!(
            "column budget ({}) is not supported; pass 0 to load all \
             partitions",
            params.upper_bound(),
        )));
    }
    let ProbeResult {
        active_partitions,
        active_queries,
    } = select_partitions(
        centroids,
        queries,
        params.nprobe(),
        params.nthreads(),
        metric,
    )?;
    let num_queries = queries.num_cols();
    let k = params.k();
    let mut min_scores: Vec<NBestHeap<I>> = (0..num_queries)
        .map(|_| NBestHeap::new(k))
        .collect();
    let num_parts = active_partitions.len();
    let num_nodes = params.num_nodes().get();
    let parts_per_node = (num_parts + num_nodes - 1) / num_nodes;
    for node in 0..num_nodes {
        let first_part = num_parts.min(node * parts_per_node);
        let last_part = num_parts.min((node + 1) * parts_per_node);
        if first_part == last_part {
            continue;
        }
        let node_scores: Vec<NBestHeap<I>> = search_shard(
            store,
            part_uri,
            &active_partitions[first_part..last_part],
            first_part,
            queries,
            &active_queries[first_part..last_part],
            indices,
            id_uri,
            k,
            params.nthreads(),
            metric,
        )?;
        for (j, scores) in node_scores.into_iter().enumerate() {
            min_scores[j].merge(scores);
        }
    }
    let k = k.get();
    let mut top_k: Vec<I> = vec![I::max_value(); k * num_queries];
    for (j, scores) in min_scores.into_iter().enumerate() {
        for (slot, (_, id)) in scores.drain_sorted().into_iter().enumerate() {
            top_k[j * k + slot] = id;
        }
    }
    debug!(
        "answered {} queries in {} μs",
        num_queries,
        time.elapsed().as_micros(),
    );
    ColMajorMatrix::from_vec(top_k, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LocalArrayStore;
    use crate::ivf::index::build_index;
    use crate::linalg::SquaredL2;

    fn matrix(data: Vec<f32>, num_rows: usize) -> ColMajorMatrix<f32> {
        ColMajorMatrix::from_vec(data, num_rows).unwrap()
    }

    fn params(k: usize, nprobe: usize) -> SearchParams {
        SearchParams::new(k.try_into().unwrap(), nprobe.try_into().unwrap())
            .with_nthreads(1)
    }

    // Builds an index over `db` and returns the store and the index array.
    fn build(
        db: &ColMajorMatrix<f32>,
        centroids: &ColMajorMatrix<f32>,
    ) -> (tempfile::TempDir, LocalArrayStore, Vec<u64>) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArrayStore::new(dir.path());
        store.write_matrix(centroids, "centroids", 0, true).unwrap();
        build_index::<f32, f32, u64, u64, _, _>(
            &store,
            db,
            "centroids",
            "parts",
            "index",
            "ids",
            0,
            1,
            &SquaredL2,
        ).unwrap();
        let indices: Vec<u64> = store.read_vector("index").unwrap();
        (dir, store, indices)
    }

    fn run(
        store: &LocalArrayStore,
        centroids: &ColMajorMatrix<f32>,
        queries: &ColMajorMatrix<f32>,
        indices: &[u64],
        params: &SearchParams,
    ) -> ColMajorMatrix<u64> {
        search(
            store,
            "parts",
            centroids,
            queries,
            indices,
            "ids",
            params,
            &SquaredL2,
        ).unwrap()
    }

    // Four vectors around two centroids; the data set of the smoke tests.
    fn two_cluster_fixture() -> (ColMajorMatrix<f32>, ColMajorMatrix<f32>) {
        let centroids = matrix(vec![0.0, 0.0, 10.0, 10.0], 2);
        let db = matrix(
            vec![0.0, 0.0, 1.0, 1.0, 9.0, 9.0, 10.0, 10.0],
            2,
        );
        (db, centroids)
    }

    #[test]
    fn search_returns_the_two_nearest_ids_of_the_probed_partition() {
        let (db, centroids) = two_cluster_fixture();
        let (_dir, store, indices) = build(&db, &centroids);
        let queries = matrix(vec![0.0, 0.0], 2);
        let top_k = run(&store, &centroids, &queries, &indices, &params(2, 1));
        assert_eq!(top_k.num_rows(), 2);
        assert_eq!(top_k.num_cols(), 1);
        assert_eq!(top_k.col(0), &[0, 1]);
    }

    #[test]
    fn search_merges_spilled_partitions_and_breaks_ties_by_smaller_id() {
        let (db, centroids) = two_cluster_fixture();
        let (_dir, store, indices) = build(&db, &centroids);
        // (5, 5) is 32 away from ids 1 and 2 and 50 away from ids 0 and 3.
        let queries = matrix(vec![5.0, 5.0], 2);
        let top_k = run(&store, &centroids, &queries, &indices, &params(3, 2));
        assert_eq!(top_k.col(0), &[1, 2, 0]);
    }

    #[test]
    fn search_pads_a_short_partition_with_the_id_maximum() {
        let centroids = matrix(vec![1.0, 100.0], 1);
        let db = matrix(vec![0.0, 1.0, 2.0, 100.0, 101.0], 1);
        let (_dir, store, indices) = build(&db, &centroids);
        let queries = matrix(vec![0.0], 1);
        let top_k = run(&store, &centroids, &queries, &indices, &params(5, 1));
        assert_eq!(top_k.col(0), &[0, 1, 2, u64::MAX, u64::MAX]);
    }

    #[test]
    fn search_yields_only_sentinels_when_the_probed_partition_is_empty() {
        let centroids = matrix(vec![0.0, 100.0], 1);
        let db = matrix(vec![99.0, 100.0, 101.0], 1);
        let (_dir, store, indices) = build(&db, &centroids);
        let queries = matrix(vec![0.0], 1);
        let top_k = run(&store, &centroids, &queries, &indices, &params(2, 1));
        assert_eq!(top_k.col(0), &[u64::MAX, u64::MAX]);
    }

    // Twelve vectors around four centroids and three queries between them.
    fn four_cluster_fixture() -> (
        ColMajorMatrix<f32>,
        ColMajorMatrix<f32>,
        ColMajorMatrix<f32>,
    ) {
        let centroids = matrix(
            vec![0.0, 0.0, 10.0, 10.0, 20.0, 20.0, 30.0, 30.0],
            2,
        );
        let db = matrix(
            vec![
                1.0, 0.0, 0.0, 2.0, 2.0, 2.0,
                9.0, 10.0, 11.0, 11.0, 10.0, 8.0,
                21.0, 20.0, 19.0, 19.0, 22.0, 22.0,
                31.0, 30.0, 29.0, 29.0, 30.0, 32.0,
            ],
            2,
        );
        let queries = matrix(vec![0.0, 0.0, 15.0, 15.0, 30.0, 30.0], 2);
        (db, centroids, queries)
    }

    #[test]
    fn search_with_full_probing_matches_an_exhaustive_scan() {
        let (db, centroids, queries) = four_cluster_fixture();
        let (_dir, store, indices) = build(&db, &centroids);
        let k = 5;
        let top_k = run(&store, &centroids, &queries, &indices, &params(k, 4));
        for j in 0..queries.num_cols() {
            let mut scored: Vec<(f32, u64)> = (0..db.num_cols())
                .map(|i| (
                    crate::linalg::squared_distance(
                        queries.col(j),
                        db.col(i),
                    ),
                    i as u64,
                ))
                .collect();
            scored.sort_by(|a, b| {
                a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1))
            });
            let expected: Vec<u64> =
                scored[..k].iter().map(|&(_, id)| id).collect();
            assert_eq!(top_k.col(j), &expected[..], "query {}", j);
        }
    }

    #[test]
    fn search_output_does_not_depend_on_the_number_of_nodes() {
        let (db, centroids, queries) = four_cluster_fixture();
        let (_dir, store, indices) = build(&db, &centroids);
        let baseline =
            run(&store, &centroids, &queries, &indices, &params(4, 3));
        for num_nodes in [2usize, 4] {
            let sharded = run(
                &store,
                &centroids,
                &queries,
                &indices,
                &params(4, 3).with_num_nodes(num_nodes.try_into().unwrap()),
            );
            assert_eq!(baseline.data(), sharded.data());
        }
    }

    #[test]
    fn search_output_does_not_depend_on_the_number_of_threads() {
        let (db, centroids, queries) = four_cluster_fixture();
        let (_dir, store, indices) = build(&db, &centroids);
        let baseline =
            run(&store, &centroids, &queries, &indices, &params(4, 3));
        let threaded = run(
            &store,
            &centroids,
            &queries,
            &indices,
            &params(4, 3).with_nthreads(8),
        );
        assert_eq!(baseline.data(), threaded.data());
    }

    #[test]
    fn search_recall_is_non_decreasing_in_nprobe() {
        let (db, centroids, queries) = four_cluster_fixture();
        let (_dir, store, indices) = build(&db, &centroids);
        let k = 4;
        let exhaustive =
            run(&store, &centroids, &queries, &indices, &params(k, 4));
        let mut last_recall = 0;
        for nprobe in 1..=4 {
            let top_k = run(
                &store,
                &centroids,
                &queries,
                &indices,
                &params(k, nprobe),
            );
            let mut recall = 0;
            for j in 0..queries.num_cols() {
                recall += top_k
                    .col(j)
                    .iter()
                    .filter(|&id| exhaustive.col(j).contains(id))
                    .count();
            }
            assert!(recall >= last_recall, "nprobe {}", nprobe);
            last_recall = recall;
        }
        assert_eq!(last_recall, k * queries.num_cols());
    }

    #[test]
    fn search_rejects_an_index_array_of_the_wrong_length() {
        let (db, centroids) = two_cluster_fixture();
        let (_dir, store, indices) = build(&db, &centroids);
        let queries = matrix(vec![0.0, 0.0], 2);
        let result: Result<ColMajorMatrix<u64>, _> = search(
            &store,
            "parts",
            &centroids,
            &queries,
            &indices[..2],
            "ids",
            &params(1, 1),
            &SquaredL2,
        );
        assert!(result.is_err());
    }

    #[test]
    fn search_rejects_a_column_budget() {
        let (db, centroids) = two_cluster_fixture();
        let (_dir, store, indices) = build(&db, &centroids);
        let queries = matrix(vec![0.0, 0.0], 2);
        let result: Result<ColMajorMatrix<u64>, _> = search(
            &store,
            "parts",
            &centroids,
            &queries,
            &indices,
            "ids",
            &params(1, 1).with_upper_bound(64),
            &SquaredL2,
        );
        assert!(result.is_err());
    }
}
