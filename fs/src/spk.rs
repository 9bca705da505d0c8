//! SPK ("Spinpkg") package format reader.
//!
//! On-disk layout, all integers little-endian:
//!
//! ```text
//! 0    magic "SPIN"        4    version = 1
//! 8    name[64]            72   version string[16]
//! 88   description[128]    216  file_count: u32
//! 220  deps_count: u32     224  reserved[288]
//! 512  deps_count * 96-byte dependency records (name[64], minver[16], pad)
//! ...  file_count * 256-byte file entries (path[200], size, mode, offset, pad)
//! ...  file contents, each at `offset` relative to the end of the entries
//! ```
//!
//! The reader validates bounds before handing out any slice, so a
//! truncated or corrupt package surfaces as an error instead of a wild
//! read. Package installation itself is the `spin` tool's business.

pub const SPK_MAGIC: [u8; 4] = *b"SPIN";
pub const SPK_VERSION: u32 = 1;

pub const SPK_HEADER_SIZE: usize = 512;
pub const SPK_DEP_SIZE: usize = 96;
pub const SPK_FILE_ENTRY_SIZE: usize = 256;

const NAME_LEN: usize = 64;
const VERSTR_LEN: usize = 16;
const DESC_LEN: usize = 128;
const PATH_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpkError {
    Truncated,
    BadMagic,
    BadVersion,
    CorruptEntry,
}

fn read_u32(buf: &[u8], off: usize) -> Result<u32, SpkError> {
    let bytes = buf.get(off..off + 4).ok_or(SpkError::Truncated)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn cstr_field(buf: &[u8], off: usize, len: usize) -> Result<&[u8], SpkError> {
    let field = buf.get(off..off + len).ok_or(SpkError::Truncated)?;
    let end = field.iter().position(|&b| b == 0).unwrap_or(len);
    Ok(&field[..end])
}

#[derive(Clone, Copy)]
pub struct SpkPackage<'a> {
    data: &'a [u8],
    file_count: u32,
    deps_count: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct SpkDep<'a> {
    pub name: &'a [u8],
    pub min_version: &'a [u8],
}

#[derive(Clone, Copy, Debug)]
pub struct SpkFile<'a> {
    pub path: &'a [u8],
    pub size: u32,
    pub mode: u32,
    pub contents: &'a [u8],
}

impl<'a> SpkPackage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, SpkError> {
        if data.len() < SPK_HEADER_SIZE {
            return Err(SpkError::Truncated);
        }
        if data[0..4] != SPK_MAGIC {
            return Err(SpkError::BadMagic);
        }
        if read_u32(data, 4)? != SPK_VERSION {
            return Err(SpkError::BadVersion);
        }

        let file_count = read_u32(data, 216)?;
        let deps_count = read_u32(data, 220)?;

        let pkg = Self { data, file_count, deps_count };
        if pkg.payload_base() > data.len() {
            return Err(SpkError::Truncated);
        }
        Ok(pkg)
    }

    pub fn name(&self) -> &'a [u8] {
        cstr_field(self.data, 8, NAME_LEN).unwrap_or(b"")
    }

    pub fn version(&self) -> &'a [u8] {
        cstr_field(self.data, 8 + NAME_LEN, VERSTR_LEN).unwrap_or(b"")
    }

    pub fn description(&self) -> &'a [u8] {
        cstr_field(self.data, 8 + NAME_LEN + VERSTR_LEN, DESC_LEN).unwrap_or(b"")
    }

    pub fn file_count(&self) -> u32 {
        self.file_count
    }

    pub fn deps_count(&self) -> u32 {
        self.deps_count
    }

    fn deps_base(&self) -> usize {
        SPK_HEADER_SIZE
    }

    fn entries_base(&self) -> usize {
        self.deps_base() + self.deps_count as usize * SPK_DEP_SIZE
    }

    /// Offset where file contents begin; file entry offsets are relative
    /// to this.
    fn payload_base(&self) -> usize {
        self.entries_base() + self.file_count as usize * SPK_FILE_ENTRY_SIZE
    }

    pub fn dep(&self, index: u32) -> Result<SpkDep<'a>, SpkError> {
        if index >= self.deps_count {
            return Err(SpkError::CorruptEntry);
        }
        let base = self.deps_base() + index as usize * SPK_DEP_SIZE;
        Ok(SpkDep {
            name: cstr_field(self.data, base, NAME_LEN)?,
            min_version: cstr_field(self.data, base + NAME_LEN, VERSTR_LEN)?,
        })
    }

    pub fn file(&self, index: u32) -> Result<SpkFile<'a>, SpkError> {
        if index >= self.file_count {
            return Err(SpkError::CorruptEntry);
        }
        let base = self.entries_base() + index as usize * SPK_FILE_ENTRY_SIZE;
        let path = cstr_field(self.data, base, PATH_LEN)?;
        if path.is_empty() {
            return Err(SpkError::CorruptEntry);
        }
        let size = read_u32(self.data, base + PATH_LEN)?;
        let mode = read_u32(self.data, base + PATH_LEN + 4)?;
        let offset = read_u32(self.data, base + PATH_LEN + 8)?;

        let start = self
            .payload_base()
            .checked_add(offset as usize)
            .ok_or(SpkError::CorruptEntry)?;
        let end = start.checked_add(size as usize).ok_or(SpkError::CorruptEntry)?;
        let contents = self.data.get(start..end).ok_or(SpkError::Truncated)?;

        Ok(SpkFile { path, size, mode, contents })
    }

    pub fn files(&self) -> impl Iterator<Item = Result<SpkFile<'a>, SpkError>> + '_ {
        (0..self.file_count).map(move |i| self.file(i))
    }

    pub fn deps(&self) -> impl Iterator<Item = Result<SpkDep<'a>, SpkError>> + '_ {
        (0..self.deps_count).map(move |i| self.dep(i))
    }
}
