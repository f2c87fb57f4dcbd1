use std::{collections::HashMap, sync::Arc};

use error::EmulatorError;
use tokio::sync::RwLock;

pub mod error;
mod file;
mod filler;
mod stream;

pub use file::{Segment, SparseFile, Whence};
pub use filler::{DEFAULT_FILLER_BYTE, DEFAULT_FILLER_SIZE, Filler};

pub type Result<T> = std::result::Result<T, EmulatorError>;

/// A set of named sparse files, each an append-only stream whose filler runs
/// are stored as lengths only.
///
/// Every operation takes exclusive access to the file it touches, so a file is
/// never read and written at the same time.
///
/// # Examples
///
/// ```rust
/// use sparsefs::SparseFs;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let fs = SparseFs::new();
///
///     fs.write("/archive.zip", b"PK").await?;
///     fs.write_filler("/archive.zip", 1 << 40).await?;
///     assert_eq!(fs.len("/archive.zip").await?, (1 << 40) + 2);
///
///     let first = fs
///         .with_file("/archive.zip", |file| {
///             file.open();
///             Ok(file.read()?.map(|chunk| chunk.to_vec()))
///         })
///         .await?;
///     assert_eq!(first.as_deref(), Some(&b"PK"[..]));
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct SparseFs {
    files: Arc<RwLock<HashMap<String, SparseFile>>>,
    filler: Arc<Filler>,
}

impl SparseFs {
    /// Creates an empty set whose files use the process-wide filler.
    pub fn new() -> Self { Self::with_filler(Filler::shared()) }

    /// Creates an empty set whose files deliver gaps from `filler`.
    pub fn with_filler(filler: Arc<Filler>) -> Self {
        Self {
            files: Arc::new(RwLock::new(HashMap::new())),
            filler,
        }
    }

    /// Creates an empty file at the specified path if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::InvalidPath` if the path is empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # tokio_test::block_on(async {
    /// let fs = sparsefs::SparseFs::new();
    /// fs.touch("/file.bin").await.unwrap();
    /// assert_eq!(fs.len("/file.bin").await.unwrap(), 0);
    /// # });
    /// ```
    pub async fn touch(&self, path: &str) -> Result<()> {
        validate(path)?;

        let mut files = self.files.write().await;
        files
            .entry(path.to_string())
            .or_insert_with(|| SparseFile::with_filler(Arc::clone(&self.filler)));
        Ok(())
    }

    /// Appends literal bytes to a file, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::InvalidPath` if the path is empty.
    /// Returns `EmulatorError::SizeOverflow` if the file would grow past `i64::MAX`.
    pub async fn write(&self, path: &str, data: &[u8]) -> Result<u64> {
        self.append(path, Segment::Literal(data)).await
    }

    /// Appends a run of `len` filler bytes to a file.
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::InvalidPath` if the path is empty.
    /// Returns `EmulatorError::FillerBeforeLiteral` if the file holds no literal
    /// block yet. A missing file is not created in that case.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # tokio_test::block_on(async {
    /// let fs = sparsefs::SparseFs::new();
    /// assert!(fs.write_filler("/file.bin", 10).await.is_err());
    ///
    /// fs.write("/file.bin", b"header").await.unwrap();
    /// fs.write_filler("/file.bin", 10).await.unwrap();
    /// assert_eq!(fs.len("/file.bin").await.unwrap(), 16);
    /// # });
    /// ```
    pub async fn write_filler(&self, path: &str, len: u64) -> Result<u64> {
        self.append(path, Segment::Filler(len)).await
    }

    /// Appends any segment to a file, creating it if needed.
    ///
    /// A write that fails leaves no new file behind.
    pub async fn append(&self, path: &str, segment: Segment<'_>) -> Result<u64> {
        validate(path)?;

        let mut files = self.files.write().await;
        if let Some(file) = files.get_mut(path) {
            return file.write(segment);
        }

        let mut file = SparseFile::with_filler(Arc::clone(&self.filler));
        let written = file.write(segment)?;
        files.insert(path.to_string(), file);
        Ok(written)
    }

    /// Returns the logical length of a file.
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::InvalidPath` if the path is empty.
    /// Returns `EmulatorError::FileNotFound` if no file exists at the path.
    pub async fn len(&self, path: &str) -> Result<u64> {
        validate(path)?;

        let files = self.files.read().await;
        files
            .get(path)
            .map(SparseFile::len)
            .ok_or_else(|| EmulatorError::FileNotFound(path.to_string()))
    }

    /// Runs `f` with exclusive access to one file, typically a read pass made
    /// of `open`, `read`, `seek` and `skip` calls.
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::InvalidPath` if the path is empty.
    /// Returns `EmulatorError::FileNotFound` if no file exists at the path.
    /// Otherwise returns whatever `f` returns.
    pub async fn with_file<T, F>(&self, path: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut SparseFile) -> Result<T>,
    {
        validate(path)?;

        let mut files = self.files.write().await;
        let file = files
            .get_mut(path)
            .ok_or_else(|| EmulatorError::FileNotFound(path.to_string()))?;
        f(file)
    }

    /// Removes a file, returning it so its contents can still be inspected.
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::InvalidPath` if the path is empty.
    /// Returns `EmulatorError::FileNotFound` if no file exists at the path.
    pub async fn remove(&self, path: &str) -> Result<SparseFile> {
        validate(path)?;

        let mut files = self.files.write().await;
        files
            .remove(path)
            .ok_or_else(|| EmulatorError::FileNotFound(path.to_string()))
    }
}

impl Default for SparseFs {
    fn default() -> Self { Self::new() }
}

fn validate(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(EmulatorError::InvalidPath("Path cannot be empty".to_string()));
    }
    Ok(())
}
