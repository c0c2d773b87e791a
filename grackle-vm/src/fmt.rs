//! Fixed-capacity string building for the printing opcodes

const HEX: [u8; 16] = *b"0123456789abcdef";

/// Counted string buffer with no heap behind it
///
/// Writes past the capacity are silently dropped, so callers can format
/// without checking for room first.
#[derive(Debug)]
pub struct StrBuf {
    len: u8,
    buf: [u8; 255],
}

impl StrBuf {
    /// Maximum number of bytes the buffer can hold
    pub const MAX: usize = 254;

    /// Builds a new empty buffer
    pub const fn new() -> Self {
        StrBuf {
            len: 0,
            buf: [0; 255],
        }
    }

    /// Contents written so far
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..usize::from(self.len)]
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    /// Checks whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Empties the buffer
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Appends one byte, dropping it if the buffer is full
    pub fn put_raw_byte(&mut self, b: u8) {
        if usize::from(self.len) < Self::MAX {
            self.buf[usize::from(self.len)] = b;
            self.len += 1;
        }
    }

    /// Appends a newline
    pub fn put_newline(&mut self) {
        self.put_raw_byte(b'\n');
    }

    /// Appends `n` spaces
    pub fn put_spaces(&mut self, n: u8) {
        for _ in 0..n {
            self.put_raw_byte(b' ');
        }
    }

    /// Appends a string
    pub fn put_str(&mut self, s: &str) {
        for b in s.bytes() {
            self.put_raw_byte(b);
        }
    }

    /// Appends the contents of another buffer
    pub fn append(&mut self, other: &StrBuf) {
        for b in other.bytes() {
            self.put_raw_byte(*b);
        }
    }

    /// Appends a byte as exactly two hex digits
    pub fn put_hex_u8(&mut self, v: u8) {
        self.put_raw_byte(HEX[usize::from(v >> 4)]);
        self.put_raw_byte(HEX[usize::from(v & 0xf)]);
    }

    /// Appends a halfword as exactly four hex digits
    pub fn put_hex_u16(&mut self, v: u16) {
        self.put_hex_u8((v >> 8) as u8);
        self.put_hex_u8(v as u8);
    }

    /// Appends a word in hex with leading zeros trimmed
    pub fn put_hex(&mut self, v: u32) {
        let mut started = false;
        for shift in (0..8).rev() {
            let digit = ((v >> (shift * 4)) & 0xf) as usize;
            if digit != 0 || started || shift == 0 {
                self.put_raw_byte(HEX[digit]);
                started = true;
            }
        }
    }

    /// Appends a word in signed decimal
    pub fn put_decimal(&mut self, v: i32) {
        let mut m = v as u32;
        if v < 0 {
            self.put_raw_byte(b'-');
            m = m.wrapping_neg();
        }
        let mut digits = [0u8; 10];
        let mut n = 0;
        loop {
            digits[n] = b'0' + (m % 10) as u8;
            n += 1;
            m /= 10;
            if m == 0 {
                break;
            }
        }
        for d in digits[..n].iter().rev() {
            self.put_raw_byte(*d);
        }
    }
}

impl Default for StrBuf {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decimal_formatting() {
        let mut s = StrBuf::new();
        s.put_decimal(0);
        assert_eq!(s.bytes(), b"0");
        s.clear();
        s.put_decimal(-2147483648);
        assert_eq!(s.bytes(), b"-2147483648");
        s.clear();
        s.put_decimal(2147483647);
        assert_eq!(s.bytes(), b"2147483647");
        s.clear();
        s.put_decimal(-1);
        assert_eq!(s.bytes(), b"-1");
    }

    #[test]
    fn hex_formatting() {
        let mut s = StrBuf::new();
        s.put_hex(0);
        assert_eq!(s.bytes(), b"0");
        s.clear();
        s.put_hex(0x1f0f);
        assert_eq!(s.bytes(), b"1f0f");
        s.clear();
        s.put_hex(0xffffffff);
        assert_eq!(s.bytes(), b"ffffffff");
        s.clear();
        s.put_hex(0x7fffffff);
        assert_eq!(s.bytes(), b"7fffffff");
    }

    #[test]
    fn fixed_width_hex() {
        let mut s = StrBuf::new();
        s.put_hex_u8(0x05);
        s.put_hex_u16(0x0001);
        assert_eq!(s.bytes(), b"050001");
    }

    #[test]
    fn saturates_at_capacity() {
        let mut s = StrBuf::new();
        for _ in 0..300 {
            s.put_raw_byte(b'x');
        }
        assert_eq!(s.len(), StrBuf::MAX);
        s.put_newline();
        assert_eq!(s.len(), StrBuf::MAX);
    }

    #[test]
    fn append_and_clear() {
        let mut a = StrBuf::new();
        a.put_str("left");
        let mut b = StrBuf::new();
        b.put_spaces(2);
        b.put_str("right");
        a.append(&b);
        assert_eq!(a.bytes(), b"left  right");
        a.clear();
        assert!(a.is_empty());
        a.put_newline();
        assert_eq!(a.bytes(), b"\n");
    }
}
