use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::ReadError;

// Reads near the end may come back short; reads starting past the end fail.
pub trait BlockReader {
    fn size(&self) -> u64;

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, ReadError>;
}

pub trait DeviceOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn BlockReader>, ReadError>;
}

#[derive(Debug)]
pub struct FileBlockReader {
    file: File,
    path: PathBuf,
    size: u64,
}

impl FileBlockReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReadError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|source| ReadError::Open {
            path: path.clone(),
            source,
        })?;

        // Block devices report a zero metadata length; seeking to the end
        // works for both devices and regular image files.
        let size = file
            .seek(SeekFrom::End(0))
            .map_err(|source| ReadError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self { file, path, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockReader for FileBlockReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, ReadError> {
        if offset >= self.size {
            return Err(ReadError::OutOfRange {
                offset,
                size: self.size,
            });
        }

        let available = (self.size - offset).min(len as u64) as usize;
        let mut buf = vec![0u8; available];
        let mut filled = 0;
        while filled < available {
            match read_at_position(&self.file, &mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(ReadError::Io {
                        offset,
                        len,
                        source,
                    })
                }
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

#[cfg(unix)]
fn read_at_position(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at_position(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FileDeviceOpener;

impl DeviceOpener for FileDeviceOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn BlockReader>, ReadError> {
        Ok(Box::new(FileBlockReader::open(path)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryBlockReader {
    data: Vec<u8>,
}

impl MemoryBlockReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn zeroed(size: usize) -> Self {
        Self::new(vec![0u8; size])
    }

    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) {
        let end = offset + bytes.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(bytes);
    }
}

impl BlockReader for MemoryBlockReader {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, ReadError> {
        let size = self.size();
        if offset >= size {
            return Err(ReadError::OutOfRange { offset, size });
        }
        let start = offset as usize;
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }
}
