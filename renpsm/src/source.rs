//! Locations in models and logs.

use std::fmt;
use std::ops::Range;

use crate::files::FileId;

/// Byte offsets into a loaded file.
pub type BytePos = u32;

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ByteRange {
    start: BytePos,
    end: BytePos,
}

impl ByteRange {
    pub fn new(start: BytePos, end: BytePos) -> ByteRange {
        ByteRange { start, end }
    }

    pub const fn start(&self) -> BytePos {
        self.start
    }

    pub const fn end(&self) -> BytePos {
        self.end
    }

    /// The smallest range covering both.
    pub fn merge(self, other: ByteRange) -> ByteRange {
        ByteRange::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl fmt::Debug for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl From<ByteRange> for Range<usize> {
    fn from(range: ByteRange) -> Range<usize> {
        range.start as usize..range.end as usize
    }
}

/// A byte range within a particular file, as labelled in diagnostics.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct FileRange {
    file_id: FileId,
    byte_range: ByteRange,
}

impl FileRange {
    pub const fn new(file_id: FileId, byte_range: ByteRange) -> FileRange {
        FileRange {
            file_id,
            byte_range,
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub const fn start(&self) -> BytePos {
        self.byte_range.start
    }

    pub const fn end(&self) -> BytePos {
        self.byte_range.end
    }

    /// Ranges in different files have nothing to cover them.
    pub fn merge(&self, other: &FileRange) -> Option<FileRange> {
        (self.file_id == other.file_id)
            .then(|| FileRange::new(self.file_id, self.byte_range.merge(other.byte_range)))
    }
}

impl fmt::Debug for FileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.file_id, self.byte_range)
    }
}

impl From<FileRange> for Range<usize> {
    fn from(range: FileRange) -> Range<usize> {
        range.byte_range.into()
    }
}

/// Where an instruction or expression came from. Nodes built by the unroller
/// or the folder may have no single origin.
#[derive(Debug, Copy, Clone)]
pub enum Span {
    Range(FileRange),
    Empty,
}

impl Span {
    pub fn merge(&self, other: &Span) -> Span {
        match (self, other) {
            (Span::Range(a), Span::Range(b)) => Span::from(a.merge(b)),
            (_, _) => Span::Empty,
        }
    }

    pub fn range(&self) -> Option<FileRange> {
        match self {
            Span::Range(range) => Some(*range),
            Span::Empty => None,
        }
    }
}

impl From<FileRange> for Span {
    fn from(range: FileRange) -> Span {
        Span::Range(range)
    }
}

impl From<Option<FileRange>> for Span {
    fn from(range: Option<FileRange>) -> Span {
        range.map_or(Span::Empty, Span::Range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(file_id: u32, start: BytePos, end: BytePos) -> FileRange {
        FileRange::new(FileId::try_from(file_id).unwrap(), ByteRange::new(start, end))
    }

    #[test]
    fn spans_stay_small() {
        assert_eq!(std::mem::size_of::<FileRange>(), 12);
        assert_eq!(std::mem::size_of::<Span>(), 12);
    }

    #[test]
    fn spans_merge_within_a_file() {
        let merged = Span::from(range(1, 4, 6)).merge(&Span::from(range(1, 1, 2)));
        let merged = merged.range().unwrap();
        assert_eq!((merged.start(), merged.end()), (1, 6));
    }

    #[test]
    fn spans_from_different_files_do_not_merge() {
        let a = Span::from(range(1, 0, 3));
        assert!(matches!(a.merge(&Span::from(range(2, 0, 3))), Span::Empty));
        assert!(matches!(a.merge(&Span::Empty), Span::Empty));
    }

    #[test]
    fn debug_output_is_compact() {
        assert_eq!(format!("{:?}", range(2, 5, 9)), "2:5..9");
    }
}
