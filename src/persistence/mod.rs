//! Persistence layer: index file header, checksummed payload blocks and file I/O.
//!
//! A saved index is the fixed [`IndexHeader`] followed by one backend payload
//! block. Loading peeks the header to pick a backend, then rewinds so the backend
//! re-reads and validates the header itself.

pub mod header;
pub mod serialization;

pub use header::{IndexHeader, FORMAT_VERSION, HEADER_LEN, MAGIC};

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::Path;

use crate::distance::DistanceMetric;
use crate::element::Element;
use crate::error::{NnError, Result};
use crate::index::NnIndex;
use crate::matrix;
use crate::params::IndexParams;
use crate::registry::BackendRegistry;

/// Open an index file, reporting a missing file as [`NnError::IndexNotFound`].
pub(crate) fn open_index_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => NnError::IndexNotFound {
            path: path.to_path_buf(),
        },
        _ => NnError::Io(e),
    })
}

/// Write `index` to `path`, replacing any existing file.
pub fn save_to_file<T: Element>(index: &dyn NnIndex<T>, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    index.save_index(&mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Reconstruct a backend from the file at `path`.
///
/// The backend is chosen from the header's algorithm tag through `registry`;
/// the element type must match `T`.
pub fn load_from_file<T: Element>(
    path: &Path,
    metric: DistanceMetric,
    registry: &BackendRegistry<T>,
) -> Result<Box<dyn NnIndex<T>>> {
    let mut reader = BufReader::new(open_index_file(path)?);
    let header = IndexHeader::read_from(&mut reader)?;
    if header.element_type != T::TYPE {
        return Err(NnError::TypeMismatch {
            expected: T::TYPE,
            found: header.element_type,
        });
    }

    let mut index = registry.create(
        header.algorithm,
        matrix::empty(),
        &IndexParams::for_algorithm(header.algorithm),
        metric,
    )?;
    reader.rewind()?;
    index.load_index(&mut reader)?;
    Ok(index)
}
