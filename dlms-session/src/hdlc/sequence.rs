//! Modulo-8 HDLC sequence numbers

use std::fmt;

const MODULUS: u8 = 8;

/// Send (N(S)) or receive (N(R)) sequence counter in the range 0..=7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HdlcSequenceNumber(u8);

impl HdlcSequenceNumber {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Advance by one, wrapping 7 to 0, and return the new value
    pub fn increment(&mut self) -> u8 {
        self.0 = (self.0 + 1) % MODULUS;
        self.0
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

impl fmt::Display for HdlcSequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_wraps() {
        let mut seq = HdlcSequenceNumber::new();
        let seen: Vec<u8> = (0..8).map(|_| seq.increment()).collect();
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7, 0]);
        assert_eq!(seq.value(), 0);
    }

    #[test]
    fn test_reset() {
        let mut seq = HdlcSequenceNumber::new();
        seq.increment();
        seq.increment();
        assert_eq!(seq.to_string(), "2");
        seq.reset();
        assert_eq!(seq, HdlcSequenceNumber::default());
    }
}
