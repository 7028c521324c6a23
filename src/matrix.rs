//! Column-major matrices.

use crate::error::Error;
use crate::numbers::Zero;

/// Dense column-major matrix.
///
/// The vector dimension runs along the rows and every column is contiguous
/// in memory.
#[derive(Clone, Debug)]
pub struct ColMajorMatrix<T> {
    data: Vec<T>,
    num_rows: usize,
}

impl<T> ColMajorMatrix<T> {
    /// Chunks a given `Vec` into columns of `num_rows` elements.
    ///
    /// Fails if `num_rows` is zero or `data.len()` is not a multiple of
    /// `num_rows`.
    pub fn from_vec(data: Vec<T>, num_rows: usize) -> Result<Self, Error> {
        if num_rows == 0 {
            return Err(Error::InvalidArgs(
                "number of rows must not be zero".to_string(),
            ));
        }
        if data.len() % num_rows != 0 {
            return Err(Error::InvalidArgs(format!(
                "data size ({}) is not a multiple of the number of rows ({})",
                data.len(),
                num_rows,
            )));
        }
        Ok(Self { data, num_rows })
    }

    /// Returns the number of rows.
    pub const fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Returns the number of columns.
    pub fn num_cols(&self) -> usize {
        self.data.len() / self.num_rows
    }

    /// Returns the j-th column.
    ///
    /// Panics if `j` is out of bounds.
    pub fn col(&self, j: usize) -> &[T] {
        let from = j * self.num_rows;
        let to = from + self.num_rows;
        &self.data[from..to]
    }

    /// Returns the mutable j-th column.
    ///
    /// Panics if `j` is out of bounds.
    pub fn col_mut(&mut self, j: usize) -> &mut [T] {
        let from = j * self.num_rows;
        let to = from + self.num_rows;
        &mut self.data[from..to]
    }

    /// Returns the underlying column-major buffer.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Consumes the matrix and returns the underlying buffer.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

impl<T> ColMajorMatrix<T>
where
    T: Zero + Copy,
{
    /// Creates a zero-filled matrix.
    ///
    /// Panics if `num_rows` is zero.
    pub fn zeroed(num_rows: usize, num_cols: usize) -> Self {
        assert_ne!(num_rows, 0);
        Self {
            data: vec![T::zero(); num_rows * num_cols],
            num_rows,
        }
    }
}
