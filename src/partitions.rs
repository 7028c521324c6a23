//! Partitioned views of the shuffled vector store.

use log::debug;
use std::ops::Range;
use std::time::Instant;

use crate::error::Error;
use crate::io::{ArrayElement, ArrayStore};
use crate::matrix::ColMajorMatrix;
use crate::numbers::IndexInt;

/// In-memory view of the active partitions of a shuffled vector array.
///
/// Loads the columns of the requested partitions, packed contiguously in
/// the order the partitions were given, together with the external ids of
/// those columns. The view is immutable once loaded.
pub struct PartitionedColMajorMatrix<T, I> {
    data: ColMajorMatrix<T>,
    ids: Vec<I>,
    // Local column offset of each loaded partition; one extra entry holds
    // the total number of loaded columns.
    part_offsets: Vec<usize>,
    col_offset: usize,
    col_part_offset: usize,
}

impl<T, I> PartitionedColMajorMatrix<T, I>
where
    T: ArrayElement,
    I: ArrayElement,
{
    /// Loads the given partitions of a shuffled vector array into memory.
    ///
    /// `indices` is the full partition index array of the store; partition
    /// `p` occupies columns `[indices[p], indices[p + 1])`.
    /// `col_part_offset` records where `active_partitions` starts within
    /// the batch-wide active partition list.
    ///
    /// An `upper_bound` of zero loads every requested partition; a non-zero
    /// column budget is not supported and fails. The load is all or
    /// nothing: on failure no partially filled view is observable.
    pub fn load<S, X>(
        store: &S,
        part_uri: &str,
        indices: &[X],
        active_partitions: &[usize],
        col_part_offset: usize,
        id_uri: &str,
        upper_bound: usize,
    ) -> Result<Self, Error>
    where
        S: ArrayStore,
        X: IndexInt,
    {
        if upper_bound != 0 {
            return Err(Error::InvalidArgs(format!(
                "column budget ({}) is not supported; pass 0 to load all \
                 partitions",
                upper_bound,
            )));
        }
        let time = Instant::now();
        let (num_rows, num_cols) = store.matrix_shape(part_uri)?;
        let mut total = 0;
        for &p in active_partitions {
            if p + 1 >= indices.len() {
                return Err(Error::InvalidArgs(format!(
                    "partition {} is out of bounds of the index array ({})",
                    p,
                    indices.len(),
                )));
            }
            let start = indices[p].to_usize();
            let stop = indices[p + 1].to_usize();
            if stop < start || stop > num_cols {
                return Err(Error::InvalidData(format!(
                    "index array maps partition {} to invalid columns \
                     [{}, {})",
                    p,
                    start,
                    stop,
                )));
            }
            total += stop - start;
        }
        let mut data: Vec<T> = Vec::new();
        data.try_reserve_exact(num_rows * total)?;
        let mut ids: Vec<I> = Vec::new();
        ids.try_reserve_exact(total)?;
        let mut part_offsets = Vec::with_capacity(active_partitions.len() + 1);
        part_offsets.push(0);
        for &p in active_partitions {
            let start = indices[p].to_usize();
            let stop = indices[p + 1].to_usize();
            if stop > start {
                let chunk: ColMajorMatrix<T> = store.open_matrix_range(
                    part_uri,
                    0..num_rows,
                    start..stop,
                )?;
                data.extend_from_slice(chunk.data());
                ids.extend(store.read_vector_range::<I>(id_uri, start..stop)?);
            }
            part_offsets.push(ids.len());
        }
        let col_offset = active_partitions
            .first()
            .map(|&p| indices[p].to_usize())
            .unwrap_or(0);
        debug!(
            "loaded {} columns of {} partitions from {} in {} μs",
            total,
            active_partitions.len(),
            part_uri,
            time.elapsed().as_micros(),
        );
        let data = ColMajorMatrix::from_vec(data, num_rows)?;
        debug_assert_eq!(data.num_cols(), ids.len());
        Ok(Self {
            data,
            ids,
            part_offsets,
            col_offset,
            col_part_offset,
        })
    }

    /// Returns the number of rows of the loaded columns.
    pub fn num_rows(&self) -> usize {
        self.data.num_rows()
    }

    /// Returns the number of loaded columns.
    pub fn num_cols(&self) -> usize {
        self.data.num_cols()
    }

    /// Returns the number of loaded partitions.
    pub fn num_col_parts(&self) -> usize {
        self.part_offsets.len() - 1
    }

    /// Returns the k-th loaded column.
    ///
    /// Panics if `k` is out of bounds.
    pub fn col(&self, k: usize) -> &[T] {
        self.data.col(k)
    }

    /// Returns the external ids of the loaded columns.
    pub fn ids(&self) -> &[I] {
        &self.ids
    }

    /// Returns the local column range of the p-th loaded partition.
    ///
    /// Panics if `p` is out of bounds.
    pub fn part_range(&self, p: usize) -> Range<usize> {
        self.part_offsets[p]..self.part_offsets[p + 1]
    }

    /// Returns the store column of the first loaded column; zero if the
    /// view is empty.
    pub fn col_offset(&self) -> usize {
        self.col_offset
    }

    /// Returns the offset of the loaded partitions within the batch-wide
    /// active partition list.
    pub fn col_part_offset(&self) -> usize {
        self.col_part_offset
    }
}
