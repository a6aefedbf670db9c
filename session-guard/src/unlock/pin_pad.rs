use zeroize::Zeroize;

use crate::validation::PIN_LENGTH;

/// Digits typed on the unlock keypad. Wiped on clear and on drop.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct PinBuffer {
    digits: [u8; PIN_LENGTH],
    len: usize,
}

impl PinBuffer {
    pub fn new() -> Self {
        Self {
            digits: [0u8; PIN_LENGTH],
            len: 0,
        }
    }

    /// Append an ASCII digit. Returns `true` once the buffer is full; extra
    /// digits are ignored.
    pub fn push(&mut self, digit: char) -> bool {
        if self.is_full() || !digit.is_ascii_digit() {
            return self.is_full();
        }
        self.digits[self.len] = digit as u8;
        self.len += 1;
        self.is_full()
    }

    pub fn pop(&mut self) {
        if self.len > 0 {
            self.len -= 1;
            self.digits[self.len] = 0;
        }
    }

    pub fn clear(&mut self) {
        self.zeroize();
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == PIN_LENGTH
    }

    pub fn as_str(&self) -> &str {
        // Only ASCII digits are ever stored.
        std::str::from_utf8(&self.digits[..self.len]).unwrap_or_default()
    }

    /// Dots for the PIN indicator, e.g. `"●●○○"`.
    pub fn masked(&self) -> String {
        (0..PIN_LENGTH)
            .map(|i| if i < self.len { '●' } else { '○' })
            .collect()
    }
}

impl Default for PinBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PinBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinBuffer").field("len", &self.len).finish()
    }
}
