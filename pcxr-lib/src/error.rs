use std::path::PathBuf;
use std::{fmt, io};

#[derive(Debug)]
pub enum PcxrError {
    NotFound(PathBuf),
    TruncatedRecord { needed: usize, available: usize },
    EndOfStream,
    InvalidHeader(String),
    DegeneratePopulation { population: usize },
    BufferOverflow {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    UploadSizeMismatch { len: usize, capacity: usize },
    PointCountExceeded { declared: u32 },
    PathBusy(PathBuf),
    Worker(String),
    IoError(io::Error),
}

impl PcxrError {
    /// Maps an open failure on `path` to `NotFound` when the file is absent.
    pub(crate) fn from_open(path: &std::path::Path, e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            PcxrError::NotFound(path.to_path_buf())
        } else {
            PcxrError::IoError(e)
        }
    }
}

impl fmt::Display for PcxrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PcxrError::NotFound(p) => {
                write!(f, "File not found: {}", p.display())
            }
            PcxrError::TruncatedRecord { needed, available } => {
                write!(
                    f,
                    "Truncated record, need {} bytes, have {}",
                    needed, available
                )
            }
            PcxrError::EndOfStream => {
                write!(f, "No more points in the point cloud.")
            }
            PcxrError::InvalidHeader(e) => {
                write!(f, "Invalid PCXR header: {}", e)
            }
            PcxrError::DegeneratePopulation { population } => {
                write!(
                    f,
                    "Query population of {} points cannot be reduced.",
                    population
                )
            }
            PcxrError::BufferOverflow {
                offset,
                len,
                capacity,
            } => {
                write!(
                    f,
                    "Transfer of {} floats at offset {} overflows a buffer of {} floats",
                    len, offset, capacity
                )
            }
            PcxrError::UploadSizeMismatch { len, capacity } => {
                write!(
                    f,
                    "Upload of {} floats does not fill a buffer of {} floats with whole records",
                    len, capacity
                )
            }
            PcxrError::PointCountExceeded { declared } => {
                write!(
                    f,
                    "More points written than the {} declared in the header.",
                    declared
                )
            }
            PcxrError::PathBusy(p) => {
                write!(f, "Another operation is active on {}", p.display())
            }
            PcxrError::Worker(e) => {
                write!(f, "Background worker failed: {}", e)
            }
            PcxrError::IoError(e) => {
                write!(f, "An I/O error occurred: {}", e)
            }
        }
    }
}

impl std::error::Error for PcxrError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PcxrError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PcxrError {
    fn from(e: io::Error) -> Self {
        PcxrError::IoError(e)
    }
}
