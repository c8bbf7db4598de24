/// An inclusive-exclusive byte range `[offset, offset + length)` of a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn to_http_range(&self) -> String {
        format!("bytes={}-{}", self.offset, self.end() - 1)
    }

    /// Split `[0, total)` into consecutive chunks of `chunk_size` bytes. The last chunk
    /// may be shorter.
    pub fn split(total: u64, chunk_size: u64) -> Vec<ByteRange> {
        assert!(chunk_size > 0);

        let mut ranges = Vec::with_capacity(total.div_ceil(chunk_size) as usize);
        let mut offset = 0;
        while offset < total {
            let length = chunk_size.min(total - offset);
            ranges.push(ByteRange::new(offset, length));
            offset += length;
        }
        ranges
    }
}
