use crate::{LayoutError, Tag};

/// A random-access source of font bytes.
///
/// The broader font-file reader owns the actual data and its table
/// directory; this crate only ever asks for byte ranges inside one table.
/// A read that cannot deliver the full requested range must fail, it must
/// never silently return fewer bytes.
pub trait FontData {
    /// Read exactly `buf.len()` bytes starting at `pos`.
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<(), ()>;
}

impl FontData for [u8] {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<(), ()> {
        let start = usize::try_from(pos).map_err(|_| ())?;
        let end = start.checked_add(buf.len()).ok_or(())?;
        let src = self.get(start..end).ok_or(())?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

impl<const N: usize> FontData for [u8; N] {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<(), ()> {
        self.as_slice().read_at(pos, buf)
    }
}

impl FontData for &[u8] {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<(), ()> {
        (**self).read_at(pos, buf)
    }
}

impl FontData for Vec<u8> {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<(), ()> {
        self.as_slice().read_at(pos, buf)
    }
}

/// The region one named table occupies within a font data source.
///
/// This is what a font file's table directory hands out: a tag plus the
/// absolute offset and length of the table's bytes.
#[derive(Clone, Copy, Debug)]
pub struct TableRegion {
    /// The table tag, used in error reports.
    pub tag: Tag,
    /// Absolute start of the table within the source.
    pub start: u64,
    /// Length of the table in bytes.
    pub len: u64,
}

impl TableRegion {
    /// A region covering an entire standalone table blob.
    pub fn whole(tag: Tag, len: u64) -> Self {
        Self { tag, start: 0, len }
    }

    pub(crate) fn decode_error(&self, offset: u64, reason: &'static str) -> LayoutError {
        LayoutError::Decode {
            table: self.tag,
            offset,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_read_at() {
        let data: &[u8] = &[1, 2, 3, 4, 5];
        let mut buf = [0; 2];
        data.read_at(1, &mut buf).unwrap();
        assert_eq!(buf, [2, 3]);

        assert!(data.read_at(4, &mut buf).is_err());
        assert!(data.read_at(6, &mut buf).is_err());
    }

    #[test]
    fn array_read_at() {
        // Arrays implement the trait directly, so a `&[u8; N]` works as a
        // `&dyn FontData` without first reborrowing as a slice.
        let data = [9, 8, 7];
        let source: &dyn FontData = &data;
        let mut buf = [0; 2];
        source.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [9, 8]);
    }
}
