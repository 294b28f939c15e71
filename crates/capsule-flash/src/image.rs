use serde::{Deserialize, Serialize};
use tracing::debug;

use capsule_types::{CodeAddress, FileType};

use crate::error::{FlashError, FlashResult};
use crate::traits::{Archive, FileEntry, Reprogrammer};

/// Value of unprogrammed flash bytes outside any file.
pub const ERASED_BYTE: u8 = 0xFF;

/// Position of an open write session, relative to the file's base.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct WriteCursor {
    file_index: usize,
    position: u32,
}

/// In-memory program memory holding a firmware archive.
///
/// Memory starts at `origin`; files are laid out by [`FlashImageBuilder`] and
/// never move afterwards. The image is both the [`Archive`] the store reads
/// and the [`Reprogrammer`] it writes through.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashImage {
    origin: u32,
    memory: Vec<u8>,
    files: Vec<FileEntry>,
    #[serde(skip)]
    cursor: Option<WriteCursor>,
}

impl FlashImage {
    /// Start building an image whose first byte sits at `origin`.
    pub fn builder(origin: u32) -> FlashImageBuilder {
        FlashImageBuilder::new(origin)
    }

    /// Address of the first byte of memory.
    pub fn origin(&self) -> CodeAddress {
        CodeAddress::new(self.origin)
    }

    /// Raw program memory.
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// The file table.
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// The bytes of file `index`.
    pub fn file_bytes(&self, index: usize) -> FlashResult<&[u8]> {
        let entry = self.file(index)?;
        let start = self.index_of(entry.base)?;
        self.memory
            .get(start..start + entry.len as usize)
            .ok_or(FlashError::AddressOutOfRange { addr: entry.end() })
    }

    /// Check that every file in the table lies inside memory.
    ///
    /// Images from the builder always pass; decoded images may not.
    pub fn validate(&self) -> FlashResult<()> {
        let memory_end = u64::from(self.origin) + self.memory.len() as u64;
        for (index, entry) in self.files.iter().enumerate() {
            let start = u64::from(entry.base.get());
            let end = start + u64::from(entry.len);
            if start < u64::from(self.origin) || end > memory_end {
                return Err(FlashError::InvalidLayout(format!(
                    "file {index} spans {start:#x}..{end:#x}, outside memory \
                     {:#x}..{memory_end:#x}",
                    self.origin
                )));
            }
        }
        Ok(())
    }

    /// Overwrite memory at an absolute address, bypassing write sessions.
    ///
    /// Host tooling uses this to model images produced elsewhere.
    pub fn poke(&mut self, addr: CodeAddress, bytes: &[u8]) -> FlashResult<()> {
        let start = self.index_of(addr)?;
        let end = start + bytes.len();
        if end > self.memory.len() {
            return Err(FlashError::AddressOutOfRange {
                addr: CodeAddress::new(self.origin + self.memory.len() as u32),
            });
        }
        self.memory[start..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Whether a write session is currently open.
    pub fn session_open(&self) -> bool {
        self.cursor.is_some()
    }

    fn index_of(&self, addr: CodeAddress) -> FlashResult<usize> {
        let rel = addr
            .get()
            .checked_sub(self.origin)
            .ok_or(FlashError::AddressOutOfRange { addr })? as usize;
        if rel >= self.memory.len() {
            return Err(FlashError::AddressOutOfRange { addr });
        }
        Ok(rel)
    }
}

impl Archive for FlashImage {
    fn file_count(&self) -> usize {
        self.files.len()
    }

    fn file(&self, index: usize) -> FlashResult<FileEntry> {
        self.files
            .get(index)
            .copied()
            .ok_or(FlashError::FileIndexOutOfRange {
                index,
                count: self.files.len(),
            })
    }

    fn read_u8(&self, addr: CodeAddress) -> FlashResult<u8> {
        let idx = self.index_of(addr)?;
        Ok(self.memory[idx])
    }
}

impl Reprogrammer for FlashImage {
    fn open(&mut self, file_index: usize, offset: u32) -> FlashResult<()> {
        if let Some(cursor) = self.cursor {
            return Err(FlashError::SessionAlreadyOpen(cursor.file_index));
        }
        let entry = self.file(file_index)?;
        if offset > entry.len {
            return Err(FlashError::WriteOutOfBounds {
                file_index,
                offset,
                len: 0,
                capacity: entry.len,
            });
        }
        self.cursor = Some(WriteCursor {
            file_index,
            position: offset,
        });
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> FlashResult<()> {
        let cursor = self.cursor.ok_or(FlashError::SessionNotOpen)?;
        let entry = self.file(cursor.file_index)?;
        let addr = CodeAddress::new(entry.base.get() + cursor.position);
        if !entry.contains_range(addr, bytes.len() as u32) {
            return Err(FlashError::WriteOutOfBounds {
                file_index: cursor.file_index,
                offset: cursor.position,
                len: bytes.len(),
                capacity: entry.len,
            });
        }
        let start = self.index_of(addr)?;
        self.memory[start..start + bytes.len()].copy_from_slice(bytes);
        self.cursor = Some(WriteCursor {
            position: cursor.position + bytes.len() as u32,
            ..cursor
        });
        Ok(())
    }

    fn close(&mut self) -> FlashResult<()> {
        let cursor = self.cursor.take().ok_or(FlashError::SessionNotOpen)?;
        debug!(
            file_index = cursor.file_index,
            end = cursor.position,
            "flash image session closed"
        );
        Ok(())
    }
}

/// Lays out files back to back from an origin address.
pub struct FlashImageBuilder {
    origin: u32,
    memory: Vec<u8>,
    files: Vec<FileEntry>,
}

impl FlashImageBuilder {
    pub fn new(origin: u32) -> Self {
        Self {
            origin,
            memory: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Address the next file will start at.
    pub fn next_address(&self) -> CodeAddress {
        CodeAddress::new(self.origin + self.memory.len() as u32)
    }

    /// Append a file with the given contents.
    pub fn file(mut self, file_type: FileType, contents: &[u8]) -> Self {
        self.files.push(FileEntry {
            base: self.next_address(),
            len: contents.len() as u32,
            file_type,
        });
        self.memory.extend_from_slice(contents);
        self
    }

    /// Leave `len` unprogrammed bytes that belong to no file.
    pub fn padding(mut self, len: u32) -> Self {
        self.memory
            .extend(std::iter::repeat(ERASED_BYTE).take(len as usize));
        self
    }

    /// Append a zero-filled capsule container of `capacity` bytes.
    pub fn capsule_buffer(self, capacity: u32) -> Self {
        self.container(FileType::CAPSULE_BUFFER, capacity)
    }

    /// Like [`capsule_buffer`](Self::capsule_buffer), with a custom type tag.
    pub fn container(self, file_type: FileType, capacity: u32) -> Self {
        self.file(file_type, &vec![0u8; capacity as usize])
    }

    pub fn build(self) -> FlashImage {
        FlashImage {
            origin: self.origin,
            memory: self.memory,
            files: self.files,
            cursor: None,
        }
    }
}

/// A file placed ahead of the capsule container by [`FlashLayout`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    pub file_type: FileType,
    pub len: u32,
    #[serde(default)]
    pub fill: u8,
}

/// Declarative image layout, as read from tooling configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLayout {
    /// Address of the first byte of the archive.
    pub origin: u32,
    /// Files preceding the capsule container, in table order.
    #[serde(default)]
    pub files: Vec<FileSpec>,
    /// Size of the capsule container in bytes.
    pub capsule_capacity: u32,
    /// Type tag given to the capsule container.
    #[serde(default = "default_capsule_file_type")]
    pub capsule_file_type: FileType,
    /// Place the container at an odd address.
    #[serde(default)]
    pub capsule_odd_base: bool,
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self {
            origin: 0x1000,
            files: Vec::new(),
            capsule_capacity: 1024,
            capsule_file_type: FileType::CAPSULE_BUFFER,
            capsule_odd_base: false,
        }
    }
}

fn default_capsule_file_type() -> FileType {
    FileType::CAPSULE_BUFFER
}

impl FlashLayout {
    /// Smallest container that can hold the erase marker.
    pub const MIN_CAPSULE_CAPACITY: u32 = 3;

    pub fn build(&self) -> FlashResult<FlashImage> {
        if self.capsule_capacity < Self::MIN_CAPSULE_CAPACITY {
            return Err(FlashError::InvalidLayout(format!(
                "capsule capacity {} is below the minimum of {}",
                self.capsule_capacity,
                Self::MIN_CAPSULE_CAPACITY
            )));
        }
        if self.capsule_capacity > u32::from(u16::MAX) {
            return Err(FlashError::InvalidLayout(format!(
                "capsule capacity {} exceeds the 16-bit offset range",
                self.capsule_capacity
            )));
        }

        let mut builder = FlashImageBuilder::new(self.origin);
        for spec in &self.files {
            builder = builder.file(spec.file_type, &vec![spec.fill; spec.len as usize]);
        }
        let base_is_odd = builder.next_address().get() & 1 == 1;
        if base_is_odd != self.capsule_odd_base {
            builder = builder.padding(1);
        }
        Ok(builder
            .container(self.capsule_file_type, self.capsule_capacity)
            .build())
    }
}
