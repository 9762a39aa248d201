use std::fmt;

/// Integer wrapper that prints with `'` digit-group separators, for the
/// node-count and hit/miss numbers in statistics output.
pub struct NiceInt(i128);

impl NiceInt {
    pub fn from_usize(value: usize) -> Self {
        Self(value as i128)
    }
}

impl From<u64> for NiceInt {
    fn from(value: u64) -> Self {
        Self(value as i128)
    }
}

impl fmt::Display for NiceInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.0.abs().to_string();
        if self.0 < 0 {
            write!(f, "-")?;
        }
        let first = (digits.len() - 1) % 3 + 1;
        write!(f, "{}", &digits[..first])?;
        let mut rest = &digits[first..];
        while !rest.is_empty() {
            write!(f, "'{}", &rest[..3])?;
            rest = &rest[3..];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::NiceInt;

    #[test]
    fn groups_digits() {
        assert_eq!(NiceInt::from_usize(0).to_string(), "0");
        assert_eq!(NiceInt::from_usize(999).to_string(), "999");
        assert_eq!(NiceInt::from_usize(1000).to_string(), "1'000");
        assert_eq!(NiceInt::from(3_000_000u64).to_string(), "3'000'000");
        assert_eq!(NiceInt(-1234).to_string(), "-1'234");
    }
}
