//! Dense array store.
//!
//! The search engine reads and writes its artifacts through the
//! [`ArrayStore`] boundary. [`LocalArrayStore`] keeps every array in a
//! directory under a base path: a Protocol Buffers schema plus
//! zlib-compressed chunk files, one chunk per column tile.

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use log::debug;
use std::fs::File;
use std::io::{Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::Error;
use crate::matrix::ColMajorMatrix;
use crate::numbers::Zero;
use crate::protos::store::{ArraySchema, DataType};
use crate::protos::{read_message, write_message};

/// File extension for Protocol Buffers files.
pub const PROTOBUF_EXTENSION: &str = "binpb";

/// Name of the single attribute of a stored array.
pub const VALUES_ATTRIBUTE: &str = "values";

// Default number of tiles per dimension.
const NUM_TILES: usize = 10;

/// Element of a stored dense array.
pub trait ArrayElement: Zero + Copy {
    /// Data type tag recorded in the array schema.
    const DATA_TYPE: DataType;

    /// Appends the little-endian encoding of given values to `out`.
    fn encode(xs: &[Self], out: &mut Vec<u8>);

    /// Decodes values from their little-endian encoding.
    ///
    /// Fails if `bytes` is not a whole number of elements.
    fn decode(bytes: &[u8]) -> Result<Vec<Self>, Error>;
}

macro_rules! impl_array_element {
    ($t:ty, $data_type:expr) => {
        impl ArrayElement for $t {
            const DATA_TYPE: DataType = $data_type;

            fn encode(xs: &[Self], out: &mut Vec<u8>) {
                for x in xs {
                    out.extend_from_slice(&x.to_le_bytes());
                }
            }

            fn decode(bytes: &[u8]) -> Result<Vec<Self>, Error> {
                const SIZE: usize = core::mem::size_of::<$t>();
                if bytes.len() % SIZE != 0 {
                    return Err(Error::InvalidData(format!(
                        "chunk size ({}) is not a multiple of the element size ({})",
                        bytes.len(),
                        SIZE,
                    )));
                }
                Ok(bytes
                    .chunks_exact(SIZE)
                    .map(|c| <$t>::from_le_bytes(c.try_into().unwrap()))
                    .collect())
            }
        }
    };
}

impl_array_element!(f32, DataType::FLOAT32);
impl_array_element!(f64, DataType::FLOAT64);
impl_array_element!(u8, DataType::UINT8);
impl_array_element!(i8, DataType::INT8);
impl_array_element!(u32, DataType::UINT32);
impl_array_element!(u64, DataType::UINT64);

/// Store of dense arrays addressed by URI.
///
/// Matrices are column-major with the vector dimension along the rows.
/// Cells that have never been written read back as zero.
pub trait ArrayStore {
    /// Creates a dense matrix array.
    fn create_matrix<T>(
        &self,
        uri: &str,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<(), Error>
    where
        T: ArrayElement;

    /// Returns the `(num_rows, num_cols)` shape of a matrix array.
    fn matrix_shape(&self, uri: &str) -> Result<(usize, usize), Error>;

    /// Reads a range of a matrix array.
    ///
    /// Fails if the range exceeds the array bounds or the element type does
    /// not match the schema.
    fn open_matrix_range<T>(
        &self,
        uri: &str,
        rows: Range<usize>,
        cols: Range<usize>,
    ) -> Result<ColMajorMatrix<T>, Error>
    where
        T: ArrayElement;

    /// Reads a whole matrix array.
    fn open_matrix<T>(&self, uri: &str) -> Result<ColMajorMatrix<T>, Error>
    where
        T: ArrayElement,
    {
        let (num_rows, num_cols) = self.matrix_shape(uri)?;
        self.open_matrix_range(uri, 0..num_rows, 0..num_cols)
    }

    /// Writes a matrix into an array at a given column offset.
    ///
    /// Creates the array with `col_offset + matrix.num_cols()` columns if it
    /// does not exist and `create_if_absent` is `true`.
    fn write_matrix<T>(
        &self,
        matrix: &ColMajorMatrix<T>,
        uri: &str,
        col_offset: usize,
        create_if_absent: bool,
    ) -> Result<(), Error>
    where
        T: ArrayElement;

    /// Creates a dense vector array.
    fn create_vector<T>(&self, uri: &str, len: usize) -> Result<(), Error>
    where
        T: ArrayElement;

    /// Returns the length of a vector array.
    fn vector_len(&self, uri: &str) -> Result<usize, Error>;

    /// Reads a range of a vector array.
    fn read_vector_range<T>(
        &self,
        uri: &str,
        range: Range<usize>,
    ) -> Result<Vec<T>, Error>
    where
        T: ArrayElement;

    /// Reads a whole vector array.
    fn read_vector<T>(&self, uri: &str) -> Result<Vec<T>, Error>
    where
        T: ArrayElement,
    {
        let len = self.vector_len(uri)?;
        self.read_vector_range(uri, 0..len)
    }

    /// Writes values into a vector array at a given offset.
    ///
    /// Creates the array with `offset + values.len()` elements if it does
    /// not exist and `create_if_absent` is `true`.
    fn write_vector<T>(
        &self,
        values: &[T],
        uri: &str,
        offset: usize,
        create_if_absent: bool,
    ) -> Result<(), Error>
    where
        T: ArrayElement;
}

// Tile extent of a dimension of a given size.
fn tile_extent(size: usize) -> usize {
    let extent = (size + NUM_TILES - 1) / NUM_TILES;
    extent.max(if size >= 2 { 2 } else { 1 })
}

/// Array store on the local file system.
pub struct LocalArrayStore {
    // Base path.
    base_path: PathBuf,
}

impl LocalArrayStore {
    /// Creates a local array store working under a given base path.
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    // Directory of an array.
    fn array_dir(&self, uri: &str) -> PathBuf {
        self.base_path.join(uri)
    }

    fn read_schema(&self, uri: &str) -> Result<ArraySchema, Error> {
        let path = self
            .array_dir(uri)
            .join("schema")
            .with_extension(PROTOBUF_EXTENSION);
        let mut f = File::open(path)?;
        read_message(&mut f)
    }

    fn write_schema(&self, uri: &str, schema: &ArraySchema) -> Result<(), Error> {
        let dir = self.array_dir(uri);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        let mut buf: Vec<u8> = Vec::new();
        write_message(schema, &mut buf)?;
        persist_file(
            &dir,
            &format!("schema.{}", PROTOBUF_EXTENSION),
            &buf,
        )
    }

    fn check_data_type<T>(schema: &ArraySchema, uri: &str) -> Result<(), Error>
    where
        T: ArrayElement,
    {
        let data_type = schema.data_type.enum_value_or_default();
        if data_type != T::DATA_TYPE {
            return Err(Error::InvalidData(format!(
                "array {} stores {:?}, not {:?}",
                uri,
                data_type,
                T::DATA_TYPE,
            )));
        }
        Ok(())
    }

    // Reads the i-th chunk of an array, zero-filled if it was never written.
    fn read_chunk<T>(
        &self,
        uri: &str,
        index: usize,
        chunk_len: usize,
    ) -> Result<Vec<T>, Error>
    where
        T: ArrayElement,
    {
        let path = self.array_dir(uri).join(format!("chunk_{}.bin", index));
        if !path.exists() {
            return Ok(vec![T::zero(); chunk_len]);
        }
        let mut decoder = ZlibDecoder::new(File::open(path)?);
        let mut bytes: Vec<u8> = Vec::new();
        decoder.read_to_end(&mut bytes)?;
        let values = T::decode(&bytes)?;
        if values.len() != chunk_len {
            return Err(Error::InvalidData(format!(
                "chunk {} of array {} has {} elements, expected {}",
                index,
                uri,
                values.len(),
                chunk_len,
            )));
        }
        Ok(values)
    }

    fn write_chunk<T>(
        &self,
        uri: &str,
        index: usize,
        values: &[T],
    ) -> Result<(), Error>
    where
        T: ArrayElement,
    {
        let mut bytes: Vec<u8> = Vec::new();
        T::encode(values, &mut bytes);
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes)?;
        let compressed = encoder.finish()?;
        persist_file(
            &self.array_dir(uri),
            &format!("chunk_{}.bin", index),
            &compressed,
        )
    }
}

// Writes a file atomically: the content appears under its final name only
// after it has been written completely.
fn persist_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), Error> {
    let mut tempfile = NamedTempFile::new_in(dir)?;
    tempfile.write_all(bytes)?;
    tempfile.flush()?;
    tempfile.persist(dir.join(name))?;
    Ok(())
}

impl ArrayStore for LocalArrayStore {
    fn create_matrix<T>(
        &self,
        uri: &str,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<(), Error>
    where
        T: ArrayElement,
    {
        if num_rows == 0 || num_cols == 0 {
            return Err(Error::InvalidArgs(format!(
                "matrix array must not be empty: {} x {}",
                num_rows,
                num_cols,
            )));
        }
        debug!("creating matrix array: {} ({} x {})", uri, num_rows, num_cols);
        let mut schema = ArraySchema::new();
        schema.num_dimensions = 2;
        schema.num_rows = num_rows as u64;
        schema.num_cols = num_cols as u64;
        schema.row_tile_extent = tile_extent(num_rows) as u64;
        schema.col_tile_extent = tile_extent(num_cols) as u64;
        schema.data_type = T::DATA_TYPE.into();
        schema.attribute = VALUES_ATTRIBUTE.to_string();
        self.write_schema(uri, &schema)
    }

    fn matrix_shape(&self, uri: &str) -> Result<(usize, usize), Error> {
        let schema = self.read_schema(uri)?;
        if schema.num_dimensions != 2 {
            return Err(Error::InvalidData(format!(
                "array {} is not a matrix",
                uri,
            )));
        }
        Ok((schema.num_rows as usize, schema.num_cols as usize))
    }

    fn open_matrix_range<T>(
        &self,
        uri: &str,
        rows: Range<usize>,
        cols: Range<usize>,
    ) -> Result<ColMajorMatrix<T>, Error>
    where
        T: ArrayElement,
    {
        let schema = self.read_schema(uri)?;
        if schema.num_dimensions != 2 {
            return Err(Error::InvalidData(format!(
                "array {} is not a matrix",
                uri,
            )));
        }
        Self::check_data_type::<T>(&schema, uri)?;
        let num_rows = schema.num_rows as usize;
        let num_cols = schema.num_cols as usize;
        if rows.is_empty() || rows.end > num_rows || cols.end > num_cols {
            return Err(Error::InvalidArgs(format!(
                "range {:?} x {:?} is out of bounds of array {} ({} x {})",
                rows,
                cols,
                uri,
                num_rows,
                num_cols,
            )));
        }
        let extent = schema.col_tile_extent as usize;
        let mut data: Vec<T> = Vec::new();
        data.try_reserve_exact(rows.len() * cols.len())?;
        if !cols.is_empty() {
            let first_chunk = cols.start / extent;
            let last_chunk = (cols.end - 1) / extent;
            for index in first_chunk..=last_chunk {
                let chunk_start = index * extent;
                let chunk_cols =
                    extent.min(num_cols - chunk_start);
                let chunk = self.read_chunk::<T>(
                    uri,
                    index,
                    num_rows * chunk_cols,
                )?;
                let from = cols.start.max(chunk_start);
                let to = cols.end.min(chunk_start + chunk_cols);
                for j in from..to {
                    let local = (j - chunk_start) * num_rows;
                    data.extend_from_slice(
                        &chunk[local + rows.start..local + rows.end],
                    );
                }
            }
        }
        ColMajorMatrix::from_vec(data, rows.len())
    }

    fn write_matrix<T>(
        &self,
        matrix: &ColMajorMatrix<T>,
        uri: &str,
        col_offset: usize,
        create_if_absent: bool,
    ) -> Result<(), Error>
    where
        T: ArrayElement,
    {
        if !self.array_dir(uri).exists() {
            if !create_if_absent {
                return Err(Error::InvalidArgs(format!(
                    "no such array: {}",
                    uri,
                )));
            }
            self.create_matrix::<T>(
                uri,
                matrix.num_rows(),
                col_offset + matrix.num_cols(),
            )?;
        }
        let schema = self.read_schema(uri)?;
        Self::check_data_type::<T>(&schema, uri)?;
        let num_rows = schema.num_rows as usize;
        let num_cols = schema.num_cols as usize;
        if matrix.num_rows() != num_rows {
            return Err(Error::InvalidArgs(format!(
                "matrix has {} rows but array {} has {}",
                matrix.num_rows(),
                uri,
                num_rows,
            )));
        }
        if col_offset + matrix.num_cols() > num_cols {
            return Err(Error::InvalidArgs(format!(
                "columns [{}, {}) are out of bounds of array {} ({} columns)",
                col_offset,
                col_offset + matrix.num_cols(),
                uri,
                num_cols,
            )));
        }
        debug!(
            "writing {} columns to matrix array {} at column {}",
            matrix.num_cols(),
            uri,
            col_offset,
        );
        if matrix.num_cols() == 0 {
            return Ok(());
        }
        let extent = schema.col_tile_extent as usize;
        let end = col_offset + matrix.num_cols();
        let first_chunk = col_offset / extent;
        let last_chunk = (end - 1) / extent;
        for index in first_chunk..=last_chunk {
            let chunk_start = index * extent;
            let chunk_cols = extent.min(num_cols - chunk_start);
            let mut chunk = self.read_chunk::<T>(
                uri,
                index,
                num_rows * chunk_cols,
            )?;
            let from = col_offset.max(chunk_start);
            let to = end.min(chunk_start + chunk_cols);
            for j in from..to {
                let local = (j - chunk_start) * num_rows;
                chunk[local..local + num_rows]
                    .copy_from_slice(matrix.col(j - col_offset));
            }
            self.write_chunk(uri, index, &chunk)?;
        }
        Ok(())
    }

    fn create_vector<T>(&self, uri: &str, len: usize) -> Result<(), Error>
    where
        T: ArrayElement,
    {
        if len == 0 {
            return Err(Error::InvalidArgs(format!(
                "vector array must not be empty: {}",
                uri,
            )));
        }
        debug!("creating vector array: {} ({})", uri, len);
        let mut schema = ArraySchema::new();
        schema.num_dimensions = 1;
        schema.num_rows = len as u64;
        schema.num_cols = 1;
        schema.row_tile_extent = tile_extent(len) as u64;
        schema.col_tile_extent = 1;
        schema.data_type = T::DATA_TYPE.into();
        schema.attribute = VALUES_ATTRIBUTE.to_string();
        self.write_schema(uri, &schema)
    }

    fn vector_len(&self, uri: &str) -> Result<usize, Error> {
        let schema = self.read_schema(uri)?;
        if schema.num_dimensions != 1 {
            return Err(Error::InvalidData(format!(
                "array {} is not a vector",
                uri,
            )));
        }
        Ok(schema.num_rows as usize)
    }

    fn read_vector_range<T>(
        &self,
        uri: &str,
        range: Range<usize>,
    ) -> Result<Vec<T>, Error>
    where
        T: ArrayElement,
    {
        let schema = self.read_schema(uri)?;
        if schema.num_dimensions != 1 {
            return Err(Error::InvalidData(format!(
                "array {} is not a vector",
                uri,
            )));
        }
        Self::check_data_type::<T>(&schema, uri)?;
        let len = schema.num_rows as usize;
        if range.end > len {
            return Err(Error::InvalidArgs(format!(
                "range {:?} is out of bounds of array {} ({})",
                range,
                uri,
                len,
            )));
        }
        let extent = schema.row_tile_extent as usize;
        let mut values: Vec<T> = Vec::new();
        values.try_reserve_exact(range.len())?;
        if !range.is_empty() {
            let first_chunk = range.start / extent;
            let last_chunk = (range.end - 1) / extent;
            for index in first_chunk..=last_chunk {
                let chunk_start = index * extent;
                let chunk_len = extent.min(len - chunk_start);
                let chunk = self.read_chunk::<T>(uri, index, chunk_len)?;
                let from = range.start.max(chunk_start);
                let to = range.end.min(chunk_start + chunk_len);
                values.extend_from_slice(
                    &chunk[from - chunk_start..to - chunk_start],
                );
            }
        }
        Ok(values)
    }

    fn write_vector<T>(
        &self,
        values: &[T],
        uri: &str,
        offset: usize,
        create_if_absent: bool,
    ) -> Result<(), Error>
    where
        T: ArrayElement,
    {
        if !self.array_dir(uri).exists() {
            if !create_if_absent {
                return Err(Error::InvalidArgs(format!(
                    "no such array: {}",
                    uri,
                )));
            }
            self.create_vector::<T>(uri, offset + values.len())?;
        }
        let schema = self.read_schema(uri)?;
        if schema.num_dimensions != 1 {
            return Err(Error::InvalidData(format!(
                "array {} is not a vector",
                uri,
            )));
        }
        Self::check_data_type::<T>(&schema, uri)?;
        let len = schema.num_rows as usize;
        if offset + values.len() > len {
            return Err(Error::InvalidArgs(format!(
                "range [{}, {}) is out of bounds of array {} ({})",
                offset,
                offset + values.len(),
                uri,
                len,
            )));
        }
        debug!(
            "writing {} elements to vector array {} at offset {}",
            values.len(),
            uri,
            offset,
        );
        if values.is_empty() {
            return Ok(());
        }
        let extent = schema.row_tile_extent as usize;
        let end = offset + values.len();
        let first_chunk = offset / extent;
        let last_chunk = (end - 1) / extent;
        for index in first_chunk..=last_chunk {
            let chunk_start = index * extent;
            let chunk_len = extent.min(len - chunk_start);
            let mut chunk = self.read_chunk::<T>(uri, index, chunk_len)?;
            let from = offset.max(chunk_start);
            let to = end.min(chunk_start + chunk_len);
            chunk[from - chunk_start..to - chunk_start]
                .copy_from_slice(&values[from - offset..to - offset]);
            self.write_chunk(uri, index, &chunk)?;
        }
        Ok(())
    }
}
