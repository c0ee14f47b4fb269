use std::fmt;

/// A malformed byte stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Malformed {
    /// A read needed more bytes than are left.
    Truncated { needed: usize, remaining: usize },
    /// A length prefix is larger than what the layout allows.
    Count(u64),
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { needed, remaining } => {
                write!(f, "needed {needed} bytes but only {remaining} remain")
            }
            Self::Count(n) => write!(f, "length prefix {n} is out of range"),
        }
    }
}

/// Forward-only reader over native-endian kernel data.
///
/// Every read is checked against the end of the underlying slice, so a
/// cursor built over one record can never read into the next one.
#[derive(Clone, Debug)]
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! read_int {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Result<$ty, Malformed> {
            let bytes = self.bytes(size_of::<$ty>())?;
            let mut raw = [0; size_of::<$ty>()];
            raw.copy_from_slice(bytes);
            Ok(<$ty>::from_ne_bytes(raw))
        }
    };
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    read_int!(u16, u16);
    read_int!(u32, u32);
    read_int!(u64, u64);

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], Malformed> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(Malformed::Truncated {
                needed: len,
                remaining,
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), Malformed> {
        self.bytes(len).map(|_| ())
    }

    /// Reads `n` u64 words, rejecting counts that cannot fit in the rest of the buffer.
    pub fn u64s(&mut self, n: u64) -> Result<Vec<u64>, Malformed> {
        let len = usize::try_from(n)
            .ok()
            .and_then(|n| n.checked_mul(size_of::<u64>()))
            .filter(|len| *len <= self.remaining())
            .ok_or(Malformed::Count(n))?;
        let words = self
            .bytes(len)?
            .chunks_exact(size_of::<u64>())
            .map(|it| {
                let mut raw = [0; size_of::<u64>()];
                raw.copy_from_slice(it);
                u64::from_ne_bytes(raw)
            })
            .collect();
        Ok(words)
    }

    /// Splits off the last `len` bytes as a separate cursor.
    ///
    /// The bytes are no longer reachable from `self`.
    pub fn split_tail(&mut self, len: usize) -> Result<Cursor<'a>, Malformed> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(Malformed::Truncated {
                needed: len,
                remaining,
            });
        }
        let end = self.buf.len() - len;
        let tail = Cursor::new(&self.buf[end..]);
        self.buf = &self.buf[..end];
        Ok(tail)
    }
}

#[cfg(test)]
mod test {
    use super::{Cursor, Malformed};

    #[test]
    fn test_reads_are_bounded() {
        let buf = [1, 0, 0, 0, 2, 0];
        let mut cursor = Cursor::new(&buf);
        assert_eq!(cursor.u32().unwrap(), u32::from_ne_bytes([1, 0, 0, 0]));
        assert_eq!(
            cursor.u32(),
            Err(Malformed::Truncated {
                needed: 4,
                remaining: 2
            })
        );
        // A failed read does not move the cursor.
        assert_eq!(cursor.position(), 4);
        assert_eq!(cursor.u16().unwrap(), u16::from_ne_bytes([2, 0]));
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_u64s_rejects_huge_count() {
        let buf = 7u64.to_ne_bytes();
        let mut cursor = Cursor::new(&buf);
        assert_eq!(cursor.u64s(u64::MAX), Err(Malformed::Count(u64::MAX)));
        assert_eq!(cursor.u64s(2), Err(Malformed::Count(2)));
        assert_eq!(cursor.u64s(1).unwrap(), vec![7]);
    }

    #[test]
    fn test_split_tail() {
        let buf: Vec<u8> = (0..16).collect();
        let mut cursor = Cursor::new(&buf);
        let mut tail = cursor.split_tail(4).unwrap();
        assert_eq!(cursor.remaining(), 12);
        assert_eq!(tail.bytes(4).unwrap(), &[12, 13, 14, 15]);
        assert!(cursor.skip(13).is_err());
    }
}
