//! Weak rolling checksum
//!
//! rsync-style Adler variant: `s1` is the byte sum, `s2` the sum of prefix
//! sums, both kept to 16 bits and packed as `s2 << 16 | s1`. Sliding the
//! window by one byte is O(1), and so is dropping the leading byte when the
//! window shrinks at the end of a stream.

/// Rolling checksum over a window of bytes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RollingChecksum {
    s1: u32,
    s2: u32,
    len: usize,
}

impl RollingChecksum {
    /// Creates a checksum over an empty window.
    pub const fn new() -> Self {
        Self { s1: 0, s2: 0, len: 0 }
    }

    /// Checksum of a whole window, computed in O(window length).
    pub fn from_window(window: &[u8]) -> Self {
        let mut sum = Self::new();
        sum.update(window);
        sum
    }

    /// Appends bytes to the end of the window.
    pub fn update(&mut self, bytes: &[u8]) {
        let mut s1 = self.s1;
        let mut s2 = self.s2;
        for &b in bytes {
            s1 = s1.wrapping_add(u32::from(b));
            s2 = s2.wrapping_add(s1);
        }
        self.s1 = s1 & 0xffff;
        self.s2 = s2 & 0xffff;
        self.len += bytes.len();
    }

    /// Slides a non-empty window one byte forward: `outgoing` leaves at the
    /// front, `incoming` enters at the back. Window length is unchanged.
    #[inline]
    pub fn roll(&mut self, outgoing: u8, incoming: u8) {
        debug_assert!(self.len > 0, "cannot roll an empty window");
        let out = u32::from(outgoing);
        let window = self.len as u32;

        self.s1 = self.s1.wrapping_sub(out).wrapping_add(u32::from(incoming)) & 0xffff;
        self.s2 = self
            .s2
            .wrapping_sub(window.wrapping_mul(out))
            .wrapping_add(self.s1)
            & 0xffff;
    }

    /// Drops the leading byte of a non-empty window without adding one.
    #[inline]
    pub fn trim_front(&mut self, outgoing: u8) {
        debug_assert!(self.len > 0, "cannot trim an empty window");
        let out = u32::from(outgoing);
        let window = self.len as u32;

        self.s1 = self.s1.wrapping_sub(out) & 0xffff;
        self.s2 = self.s2.wrapping_sub(window.wrapping_mul(out)) & 0xffff;
        self.len -= 1;
    }

    /// Packed 32-bit checksum value.
    #[inline]
    pub fn value(&self) -> u32 {
        (self.s2 << 16) | self.s1
    }

    /// Number of bytes in the window.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// One-shot weak checksum of a block.
pub fn weak_checksum(block: &[u8]) -> u32 {
    RollingChecksum::from_window(block).value()
}
