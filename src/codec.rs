//! Minimal self-contained binary codec for the agent's request/response
//! envelopes. This is a deliberate subset of MessagePack's tag space: only
//! the value shapes the protocol actually needs (nil, bool, unsigned
//! integers, strings, binary blobs, maps, arrays). No floats, no signed
//! integers, no ext types.

use crate::error::DecodeError;

const NIL: u8 = 0xc0;
const FALSE: u8 = 0xc2;
const TRUE: u8 = 0xc3;
const BIN8: u8 = 0xc4;
const BIN16: u8 = 0xc5;
const BIN32: u8 = 0xc6;
const UINT8: u8 = 0xcc;
const UINT16: u8 = 0xcd;
const UINT32: u8 = 0xce;
const UINT64: u8 = 0xcf;
const STR8: u8 = 0xd9;
const STR16: u8 = 0xda;
const STR32: u8 = 0xdb;
const ARRAY16: u8 = 0xdc;
const ARRAY32: u8 = 0xdd;
const MAP16: u8 = 0xde;
const MAP32: u8 = 0xdf;

const FIXMAP_BASE: u8 = 0x80; // 0x80..0x8f, count 0..15
const FIXARRAY_BASE: u8 = 0x90; // 0x90..0x9f, count 0..15
const FIXSTR_BASE: u8 = 0xa0; // 0xa0..0xbf, len 0..31

/// Growable encode buffer. Callers pass a capacity hint to avoid repeated
/// reallocation when the rough output size is known in advance.
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn with_capacity(hint: usize) -> Self {
        Writer {
            buf: Vec::with_capacity(hint),
        }
    }

    pub fn new() -> Self {
        Writer::with_capacity(64)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append raw, already-encoded bytes verbatim (the "raw-append"
    /// optimization: a handler's pre-built body is spliced directly into
    /// the outer envelope instead of being re-traversed).
    pub fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn nil(&mut self) {
        self.buf.push(NIL);
    }

    pub fn bool(&mut self, v: bool) {
        self.buf.push(if v { TRUE } else { FALSE });
    }

    /// Encodes with the most compact tag that can hold the value.
    pub fn uint(&mut self, v: u64) {
        if v <= 0x7f {
            self.buf.push(v as u8);
        } else if v <= 0xff {
            self.buf.push(UINT8);
            self.buf.push(v as u8);
        } else if v <= 0xffff {
            self.buf.push(UINT16);
            self.buf.extend_from_slice(&(v as u16).to_be_bytes());
        } else if v <= 0xffff_ffff {
            self.buf.push(UINT32);
            self.buf.extend_from_slice(&(v as u32).to_be_bytes());
        } else {
            self.buf.push(UINT64);
            self.buf.extend_from_slice(&v.to_be_bytes());
        }
    }

    pub fn str(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let len = bytes.len();
        if len <= 31 {
            self.buf.push(FIXSTR_BASE | len as u8);
        } else if len <= 0xff {
            self.buf.push(STR8);
            self.buf.push(len as u8);
        } else if len <= 0xffff {
            self.buf.push(STR16);
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            self.buf.push(STR32);
            self.buf.extend_from_slice(&(len as u32).to_be_bytes());
        }
        self.buf.extend_from_slice(bytes);
    }

    pub fn bin(&mut self, bytes: &[u8]) {
        let len = bytes.len();
        if len <= 0xff {
            self.buf.push(BIN8);
            self.buf.push(len as u8);
        } else if len <= 0xffff {
            self.buf.push(BIN16);
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            self.buf.push(BIN32);
            self.buf.extend_from_slice(&(len as u32).to_be_bytes());
        }
        self.buf.extend_from_slice(bytes);
    }

    pub fn map_header(&mut self, count: usize) {
        if count <= 15 {
            self.buf.push(FIXMAP_BASE | count as u8);
        } else if count <= 0xffff {
            self.buf.push(MAP16);
            self.buf.extend_from_slice(&(count as u16).to_be_bytes());
        } else {
            self.buf.push(MAP32);
            self.buf.extend_from_slice(&(count as u32).to_be_bytes());
        }
    }

    pub fn array_header(&mut self, count: usize) {
        if count <= 15 {
            self.buf.push(FIXARRAY_BASE | count as u8);
        } else if count <= 0xffff {
            self.buf.push(ARRAY16);
            self.buf.extend_from_slice(&(count as u16).to_be_bytes());
        } else {
            self.buf.push(ARRAY32);
            self.buf.extend_from_slice(&(count as u32).to_be_bytes());
        }
    }
}

impl Default for Writer {
    fn default() -> Self {
        Writer::new()
    }
}

/// Borrowing, bounds-checked cursor over an encoded buffer. String and
/// binary reads return slices into the source buffer -- no allocation on
/// the decode path.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

type DResult<T> = Result<T, DecodeError>;

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> DResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn take_u8(&mut self) -> DResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> DResult<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn take_u32(&mut self) -> DResult<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn take_u64(&mut self) -> DResult<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn peek_tag(&self) -> DResult<u8> {
        if self.remaining() == 0 {
            return Err(DecodeError::Truncated);
        }
        Ok(self.buf[self.pos])
    }

    pub fn read_bool(&mut self) -> DResult<bool> {
        match self.take_u8()? {
            TRUE => Ok(true),
            FALSE => Ok(false),
            _ => Err(DecodeError::WrongType("bool")),
        }
    }

    pub fn read_uint(&mut self) -> DResult<u64> {
        let tag = self.take_u8()?;
        if tag <= 0x7f {
            Ok(tag as u64)
        } else {
            match tag {
                UINT8 => Ok(self.take_u8()? as u64),
                UINT16 => Ok(self.take_u16()? as u64),
                UINT32 => Ok(self.take_u32()? as u64),
                UINT64 => self.take_u64(),
                _ => Err(DecodeError::WrongType("uint")),
            }
        }
    }

    pub fn read_str(&mut self) -> DResult<&'a str> {
        let tag = self.take_u8()?;
        let len = if (FIXSTR_BASE..=FIXSTR_BASE | 0x1f).contains(&tag) {
            (tag & 0x1f) as usize
        } else {
            match tag {
                STR8 => self.take_u8()? as usize,
                STR16 => self.take_u16()? as usize,
                STR32 => self.take_u32()? as usize,
                _ => return Err(DecodeError::WrongType("str")),
            }
        };
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn read_bin(&mut self) -> DResult<&'a [u8]> {
        let tag = self.take_u8()?;
        let len = match tag {
            BIN8 => self.take_u8()? as usize,
            BIN16 => self.take_u16()? as usize,
            BIN32 => self.take_u32()? as usize,
            _ => return Err(DecodeError::WrongType("bin")),
        };
        self.take(len)
    }

    /// Returns the entry count of a map header, advancing past it. The
    /// entries themselves are read by the caller one key/value pair at a
    /// time via the other read_* methods.
    pub fn read_map_header(&mut self) -> DResult<usize> {
        let tag = self.take_u8()?;
        if (FIXMAP_BASE..=FIXMAP_BASE | 0x0f).contains(&tag) {
            Ok((tag & 0x0f) as usize)
        } else {
            match tag {
                MAP16 => Ok(self.take_u16()? as usize),
                MAP32 => Ok(self.take_u32()? as usize),
                _ => Err(DecodeError::WrongType("map")),
            }
        }
    }

    pub fn read_array_header(&mut self) -> DResult<usize> {
        let tag = self.take_u8()?;
        if (FIXARRAY_BASE..=FIXARRAY_BASE | 0x0f).contains(&tag) {
            Ok((tag & 0x0f) as usize)
        } else {
            match tag {
                ARRAY16 => Ok(self.take_u16()? as usize),
                ARRAY32 => Ok(self.take_u32()? as usize),
                _ => Err(DecodeError::WrongType("array")),
            }
        }
    }

    /// Skip over one encoded value of any supported shape without
    /// interpreting it. Used when scanning a map for a specific key and
    /// the current entry's key doesn't match.
    pub fn skip_value(&mut self) -> DResult<()> {
        let tag = self.peek_tag()?;
        match tag {
            NIL | FALSE | TRUE => {
                self.pos += 1;
            }
            t if t <= 0x7f => {
                self.pos += 1;
            }
            t if (FIXSTR_BASE..=FIXSTR_BASE | 0x1f).contains(&t) => {
                let _ = self.read_str()?;
            }
            t if (FIXMAP_BASE..=FIXMAP_BASE | 0x0f).contains(&t) => {
                let n = self.read_map_header()?;
                for _ in 0..n {
                    self.skip_value()?; // key
                    self.skip_value()?; // value
                }
            }
            t if (FIXARRAY_BASE..=FIXARRAY_BASE | 0x0f).contains(&t) => {
                let n = self.read_array_header()?;
                for _ in 0..n {
                    self.skip_value()?;
                }
            }
            UINT8 => {
                self.pos += 1;
                self.take_u8()?;
            }
            UINT16 => {
                self.pos += 1;
                self.take_u16()?;
            }
            UINT32 => {
                self.pos += 1;
                self.take_u32()?;
            }
            UINT64 => {
                self.pos += 1;
                self.take_u64()?;
            }
            STR8 | BIN8 => {
                let _ = self.read_str_or_bin_bytes()?;
            }
            STR16 | BIN16 => {
                let _ = self.read_str_or_bin_bytes()?;
            }
            STR32 | BIN32 => {
                let _ = self.read_str_or_bin_bytes()?;
            }
            MAP16 | MAP32 => {
                let n = self.read_map_header()?;
                for _ in 0..n {
                    self.skip_value()?;
                    self.skip_value()?;
                }
            }
            ARRAY16 | ARRAY32 => {
                let n = self.read_array_header()?;
                for _ in 0..n {
                    self.skip_value()?;
                }
            }
            t => return Err(DecodeError::UnknownTag(t)),
        }
        Ok(())
    }

    /// Helper for skip_value: consumes a str8/16/32 or bin8/16/32 value
    /// (the tag byte determines which) and returns its raw bytes, without
    /// caring whether it's valid UTF-8 (skip doesn't need to interpret).
    fn read_str_or_bin_bytes(&mut self) -> DResult<&'a [u8]> {
        let tag = self.take_u8()?;
        let len = match tag {
            STR8 | BIN8 => self.take_u8()? as usize,
            STR16 | BIN16 => self.take_u16()? as usize,
            STR32 | BIN32 => self.take_u32()? as usize,
            _ => return Err(DecodeError::WrongType("str_or_bin")),
        };
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_small_uint() {
        let mut w = Writer::new();
        w.uint(0);
        w.uint(127);
        let bytes = w.into_bytes();
        assert_eq!(bytes, vec![0x00, 0x7f]);
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_uint().unwrap(), 0);
        assert_eq!(r.read_uint().unwrap(), 127);
    }

    #[test]
    fn uint_tag_boundaries() {
        for v in [128u64, 255, 256, 65535, 65536, 0xffff_ffff, 0x1_0000_0000] {
            let mut w = Writer::new();
            w.uint(v);
            let bytes = w.into_bytes();
            let mut r = Reader::new(&bytes);
            assert_eq!(r.read_uint().unwrap(), v, "roundtrip failed for {v}");
        }
    }

    #[test]
    fn str_tag_boundaries() {
        for len in [0usize, 31, 32, 255, 256, 65535, 65536] {
            let s: String = "a".repeat(len);
            let mut w = Writer::new();
            w.str(&s);
            let bytes = w.into_bytes();
            let mut r = Reader::new(&bytes);
            assert_eq!(r.read_str().unwrap(), s.as_str());
        }
    }

    #[test]
    fn fixstr_uses_fixed_tag_up_to_31() {
        let mut w = Writer::new();
        w.str(&"x".repeat(31));
        assert_eq!(w.as_slice()[0], FIXSTR_BASE | 31);

        let mut w2 = Writer::new();
        w2.str(&"x".repeat(32));
        assert_eq!(w2.as_slice()[0], STR8);
    }

    #[test]
    fn bin_roundtrip() {
        let data = vec![1u8, 2, 3, 4, 255];
        let mut w = Writer::new();
        w.bin(&data);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_bin().unwrap(), data.as_slice());
    }

    #[test]
    fn map_and_array_headers() {
        for n in [0usize, 15, 16, 65535, 65536] {
            let mut w = Writer::new();
            w.map_header(n);
            let bytes = w.into_bytes();
            let mut r = Reader::new(&bytes);
            assert_eq!(r.read_map_header().unwrap(), n);

            let mut w = Writer::new();
            w.array_header(n);
            let bytes = w.into_bytes();
            let mut r = Reader::new(&bytes);
            assert_eq!(r.read_array_header().unwrap(), n);
        }
    }

    #[test]
    fn skip_every_supported_shape() {
        let mut w = Writer::new();
        w.nil();
        w.bool(true);
        w.uint(42);
        w.uint(100_000);
        w.str("hello");
        w.bin(&[9, 9, 9]);
        w.map_header(1);
        w.str("k");
        w.uint(1);
        w.array_header(2);
        w.uint(1);
        w.uint(2);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        for _ in 0..7 {
            r.skip_value().unwrap();
        }
        assert!(r.is_empty());
    }

    #[test]
    fn truncated_buffer_errors_without_panic() {
        let mut r = Reader::new(&[STR8]); // tag present, length byte missing
        assert!(matches!(r.read_str(), Err(DecodeError::Truncated)));
    }

    #[test]
    fn unknown_tag_rejected_by_skip() {
        let mut r = Reader::new(&[0xc1]); // reserved/unused tag
        assert!(matches!(r.skip_value(), Err(DecodeError::UnknownTag(0xc1))));
    }
}
