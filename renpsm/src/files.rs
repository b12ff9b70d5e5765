//! Models and logs loaded by the driver, indexed by line for diagnostics and
//! for the `// line N` comments of generated simulators.

use std::fmt;
use std::num::NonZeroU32;
use std::ops::Range;

use codespan_reporting::files::{line_starts, Error};

/// Handle to a loaded file. Ids start at one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FileId(NonZeroU32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl TryFrom<u32> for FileId {
    type Error = <NonZeroU32 as TryFrom<u32>>::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(FileId(NonZeroU32::try_from(value)?))
    }
}

impl FileId {
    fn index(self) -> usize {
        self.0.get() as usize - 1
    }
}

pub struct SourceFile {
    name: String,
    source: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    fn new(name: String, source: String) -> SourceFile {
        let line_starts = line_starts(&source).collect();
        SourceFile {
            name,
            source,
            line_starts,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Zero-based line containing a byte offset. Offsets past the end belong
    /// to the last line.
    pub fn line_index(&self, byte_index: usize) -> usize {
        match self.line_starts.binary_search(&byte_index) {
            Ok(line) => line,
            Err(next_line) => next_line - 1,
        }
    }

    fn line_range(&self, line_index: usize) -> Result<Range<usize>, Error> {
        let max = self.line_starts.len() - 1;
        let start = *(self.line_starts.get(line_index))
            .ok_or(Error::LineTooLarge { given: line_index, max })?;
        let end = (self.line_starts.get(line_index + 1)).map_or(self.source.len(), |next| *next);
        Ok(start..end)
    }
}

#[derive(Default)]
pub struct Files {
    files: Vec<SourceFile>,
}

impl Files {
    pub fn new() -> Files {
        Files::default()
    }

    /// Add a file, returning the id used to refer to it in spans.
    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) -> FileId {
        self.files.push(SourceFile::new(name.into(), source.into()));
        let id = u32::try_from(self.files.len()).ok().and_then(NonZeroU32::new);
        FileId(id.expect("more than `u32::MAX` source files"))
    }

    pub fn get(&self, file_id: FileId) -> Result<&SourceFile, Error> {
        self.files.get(file_id.index()).ok_or(Error::FileMissing)
    }

    /// The one-based line number of a byte offset.
    pub fn line_number(&self, file_id: FileId, byte_index: usize) -> Option<usize> {
        Some(self.get(file_id).ok()?.line_index(byte_index) + 1)
    }
}

impl<'a> codespan_reporting::files::Files<'a> for Files {
    type FileId = FileId;
    type Name = &'a str;
    type Source = &'a str;

    fn name(&'a self, file_id: FileId) -> Result<&'a str, Error> {
        Ok(self.get(file_id)?.name())
    }

    fn source(&'a self, file_id: FileId) -> Result<&'a str, Error> {
        Ok(self.get(file_id)?.source())
    }

    fn line_index(&'a self, file_id: FileId, byte_index: usize) -> Result<usize, Error> {
        Ok(self.get(file_id)?.line_index(byte_index))
    }

    fn line_range(&'a self, file_id: FileId, line_index: usize) -> Result<Range<usize>, Error> {
        self.get(file_id)?.line_range(line_index)
    }
}
