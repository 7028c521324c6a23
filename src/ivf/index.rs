//! IVF index construction.
//!
//! Shuffles a source vector set into partition-contiguous layout and
//! persists the three query-side artifacts: the shuffled vectors, the
//! partition index array, and the external ids of the shuffled columns.

use log::debug;
use std::time::Instant;

use crate::error::Error;
use crate::io::{ArrayElement, ArrayStore};
use crate::linalg::Distance;
use crate::matrix::ColMajorMatrix;
use crate::numbers::IndexInt;

use super::partition::assign_partitions;

/// Builds an IVF index over an in-memory vector set.
///
/// Assigns every column of `db` to its nearest centroid of the array at
/// `centroids_uri`, shuffles the columns into partition-contiguous order,
/// and persists the shuffled vectors, the partition index array, and the
/// shuffled external ids to the given URIs. An empty URI skips that
/// artifact.
///
/// `db` holds the columns `[start_pos, start_pos + db.num_cols())` of the
/// overall vector set: ids and the index array are biased by `start_pos`,
/// and the shuffled columns are written at that column offset. With a
/// `start_pos` of zero the parts and id arrays are created, overwriting a
/// previous build; otherwise they must already exist at full width.
///
/// The shuffle is stable: within a partition, vectors keep the order they
/// had in `db`.
pub fn build_index<T, C, X, I, S, D>(
    store: &S,
    db: &ColMajorMatrix<T>,
    centroids_uri: &str,
    parts_uri: &str,
    index_uri: &str,
    id_uri: &str,
    start_pos: usize,
    nthreads: usize,
    metric: &D,
) -> Result<(), Error>
where
    T: ArrayElement + Sync,
    C: ArrayElement + Sync,
    X: IndexInt + ArrayElement,
    I: IndexInt + ArrayElement,
    S: ArrayStore,
    D: Distance<T, C> + Sync,
{
    let centroids: ColMajorMatrix<C> = store.open_matrix(centroids_uri)?;
    let parts = assign_partitions(&centroids, db, nthreads, metric)?;
    let time = Instant::now();
    let num_partitions = centroids.num_cols();
    let mut degrees = vec![0usize; num_partitions];
    for &p in &parts {
        degrees[p] += 1;
    }
    let mut offsets = vec![0usize; num_partitions + 1];
    for (c, &degree) in degrees.iter().enumerate() {
        offsets[c + 1] = offsets[c] + degree;
    }
    let check = offsets.clone();
    let mut shuffled_db = ColMajorMatrix::zeroed(db.num_rows(), db.num_cols());
    let mut shuffled_ids: Vec<I> = vec![I::from_usize(0); db.num_cols()];
    // One stable pass; `offsets` doubles as the write cursor of each bin
    // and holds the end-of-bin positions afterwards.
    for i in 0..db.num_cols() {
        let bin = parts[i];
        let ibin = offsets[bin];
        shuffled_ids[ibin] = I::from_usize(i + start_pos);
        shuffled_db.col_mut(ibin).copy_from_slice(db.col(i));
        offsets[bin] += 1;
    }
    // restore the start-of-bin form
    offsets.rotate_right(1);
    offsets[0] = 0;
    if offsets != check {
        return Err(Error::VerificationFailure(
            "partition offsets diverged while shuffling".to_string(),
        ));
    }
    let indices: Vec<X> = offsets
        .iter()
        .map(|&offset| X::from_usize(offset + start_pos))
        .collect();
    debug!(
        "shuffled {} vectors into {} partitions in {} μs",
        db.num_cols(),
        num_partitions,
        time.elapsed().as_micros(),
    );
    if !parts_uri.is_empty() {
        store.write_matrix(&shuffled_db, parts_uri, start_pos, start_pos == 0)?;
    }
    if !index_uri.is_empty() {
        store.write_vector(&indices, index_uri, 0, true)?;
    }
    if !id_uri.is_empty() {
        store.write_vector(&shuffled_ids, id_uri, start_pos, start_pos == 0)?;
    }
    Ok(())
}

/// Builds an IVF index over a stored vector set.
///
/// Loads the columns `[start_pos, end_pos)` of the array at `db_uri`
/// (`end_pos` of zero loads through the last column) and indexes them with
/// [`build_index`].
pub fn build_index_from_uri<T, C, X, I, S, D>(
    store: &S,
    db_uri: &str,
    centroids_uri: &str,
    parts_uri: &str,
    index_uri: &str,
    id_uri: &str,
    start_pos: usize,
    end_pos: usize,
    nthreads: usize,
    metric: &D,
) -> Result<(), Error>
where
    T: ArrayElement + Sync,
    C: ArrayElement + Sync,
    X: IndexInt + ArrayElement,
    I: IndexInt + ArrayElement,
    S: ArrayStore,
    D: Distance<T, C> + Sync,
{
    let (num_rows, num_cols) = store.matrix_shape(db_uri)?;
    let end_pos = if end_pos == 0 { num_cols } else { end_pos };
    if start_pos >= end_pos || end_pos > num_cols {
        return Err(Error::InvalidArgs(format!(
            "columns [{}, {}) are out of bounds of array {} ({} columns)",
            start_pos,
            end_pos,
            db_uri,
            num_cols,
        )));
    }
    let db: ColMajorMatrix<T> =
        store.open_matrix_range(db_uri, 0..num_rows, start_pos..end_pos)?;
    build_index::<T, C, X, I, S, D>(
        store,
        &db,
        centroids_uri,
        parts_uri,
        index_uri,
        id_uri,
        start_pos,
        nthreads,
        metric,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LocalArrayStore;
    use crate::linalg::SquaredL2;

    fn matrix(data: Vec<f32>, num_rows: usize) -> ColMajorMatrix<f32> {
        ColMajorMatrix::from_vec(data, num_rows).unwrap()
    }

    fn store_with_centroids(
        centroids: &ColMajorMatrix<f32>,
    ) -> (tempfile::TempDir, LocalArrayStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArrayStore::new(dir.path());
        store.write_matrix(centroids, "centroids", 0, true).unwrap();
        (dir, store)
    }

    fn build(
        store: &LocalArrayStore,
        db: &ColMajorMatrix<f32>,
        start_pos: usize,
    ) -> Result<(), Error> {
        build_index::<f32, f32, u64, u64, _, _>(
            store,
            db,
            "centroids",
            "parts",
            "index",
            "ids",
            start_pos,
            1,
            &SquaredL2,
        )
    }

    #[test]
    fn build_index_persists_partition_contiguous_artifacts() {
        let centroids = matrix(vec![0.0, 0.0, 10.0, 10.0], 2);
        let (_dir, store) = store_with_centroids(&centroids);
        let db = matrix(vec![0.0, 0.0, 1.0, 1.0, 9.0, 9.0, 10.0, 10.0], 2);
        build(&store, &db, 0).unwrap();
        assert_eq!(
            store.read_vector::<u64>("index").unwrap(),
            vec![0, 2, 4],
        );
        assert_eq!(
            store.read_vector::<u64>("ids").unwrap(),
            vec![0, 1, 2, 3],
        );
        let parts: ColMajorMatrix<f32> = store.open_matrix("parts").unwrap();
        assert_eq!(parts.data(), db.data());
    }

    #[test]
    fn build_index_shuffle_keeps_the_source_order_within_a_partition() {
        let centroids = matrix(vec![0.0, 10.0], 1);
        let (_dir, store) = store_with_centroids(&centroids);
        // bins alternate: 1, 0, 1, 0, 0
        let db = matrix(vec![9.0, 1.0, 11.0, 2.0, 0.0], 1);
        build(&store, &db, 0).unwrap();
        assert_eq!(
            store.read_vector::<u64>("index").unwrap(),
            vec![0, 3, 5],
        );
        assert_eq!(
            store.read_vector::<u64>("ids").unwrap(),
            vec![1, 3, 4, 0, 2],
        );
        let parts: ColMajorMatrix<f32> = store.open_matrix("parts").unwrap();
        assert_eq!(parts.data(), &[1.0, 2.0, 0.0, 9.0, 11.0]);
    }

    #[test]
    fn build_index_biases_indices_and_ids_by_the_start_position() {
        let centroids = matrix(vec![0.0, 10.0], 1);
        let (_dir, store) = store_with_centroids(&centroids);
        store.create_matrix::<f32>("parts", 1, 7).unwrap();
        store.create_vector::<u64>("ids", 7).unwrap();
        let db = matrix(vec![1.0, 9.0, 2.0, 11.0], 1);
        build(&store, &db, 3).unwrap();
        assert_eq!(
            store.read_vector::<u64>("index").unwrap(),
            vec![3, 5, 7],
        );
        assert_eq!(
            store.read_vector_range::<u64>("ids", 3..7).unwrap(),
            vec![3, 5, 4, 6],
        );
        let parts: ColMajorMatrix<f32> = store
            .open_matrix_range("parts", 0..1, 3..7)
            .unwrap();
        assert_eq!(parts.data(), &[1.0, 2.0, 9.0, 11.0]);
    }

    #[test]
    fn build_index_skips_artifacts_with_empty_uris() {
        let centroids = matrix(vec![0.0, 10.0], 1);
        let (_dir, store) = store_with_centroids(&centroids);
        let db = matrix(vec![1.0, 9.0], 1);
        build_index::<f32, f32, u64, u64, _, _>(
            &store,
            &db,
            "centroids",
            "",
            "index",
            "",
            0,
            1,
            &SquaredL2,
        ).unwrap();
        assert_eq!(store.read_vector::<u64>("index").unwrap(), vec![0, 1, 2]);
        assert!(store.matrix_shape("parts").is_err());
        assert!(store.vector_len("ids").is_err());
    }

    #[test]
    fn build_index_rejects_an_empty_vector_set() {
        let centroids = matrix(vec![0.0, 10.0], 1);
        let (_dir, store) = store_with_centroids(&centroids);
        let db = matrix(Vec::new(), 1);
        assert!(build(&store, &db, 0).is_err());
    }

    #[test]
    fn build_index_rejects_mismatched_dimensions() {
        let centroids = matrix(vec![0.0, 0.0, 10.0, 10.0], 2);
        let (_dir, store) = store_with_centroids(&centroids);
        let db = matrix(vec![1.0, 9.0], 1);
        assert!(build(&store, &db, 0).is_err());
    }

    #[test]
    fn build_index_from_uri_indexes_a_stored_column_range() {
        let centroids = matrix(vec![0.0, 10.0], 1);
        let (_dir, store) = store_with_centroids(&centroids);
        store.create_matrix::<f32>("parts", 1, 6).unwrap();
        store.create_vector::<u64>("ids", 6).unwrap();
        let db = matrix(vec![1.0, 9.0, 2.0, 11.0, 0.0, 8.0], 1);
        store.write_matrix(&db, "db", 0, true).unwrap();
        build_index_from_uri::<f32, f32, u64, u64, _, _>(
            &store,
            "db",
            "centroids",
            "parts",
            "index",
            "ids",
            2,
            0,
            1,
            &SquaredL2,
        ).unwrap();
        assert_eq!(
            store.read_vector::<u64>("index").unwrap(),
            vec![2, 4, 6],
        );
        assert_eq!(
            store.read_vector_range::<u64>("ids", 2..6).unwrap(),
            vec![2, 4, 3, 5],
        );
    }

    #[test]
    fn build_index_from_uri_rejects_an_inverted_column_range() {
        let centroids = matrix(vec![0.0, 10.0], 1);
        let (_dir, store) = store_with_centroids(&centroids);
        let db = matrix(vec![1.0, 9.0], 1);
        store.write_matrix(&db, "db", 0, true).unwrap();
        assert!(build_index_from_uri::<f32, f32, u64, u64, _, _>(
            &store,
            "db",
            "centroids",
            "parts",
            "index",
            "ids",
            2,
            1,
            1,
            &SquaredL2,
        ).is_err());
    }
}
