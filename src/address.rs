use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// A guest virtual address.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(u64);

impl Address {
    pub const MAX: Self = Self(u64::MAX);

    pub fn offset(&self) -> u64 {
        self.0
    }
}

impl nohash_hasher::IsEnabled for Address {}

impl From<u64> for Address {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl From<u32> for Address {
    fn from(v: u32) -> Self {
        Self(v as u64)
    }
}

impl From<usize> for Address {
    fn from(v: usize) -> Self {
        Self(v as u64)
    }
}

impl From<Address> for u64 {
    fn from(t: Address) -> Self {
        t.0
    }
}

impl From<Address> for usize {
    fn from(t: Address) -> Self {
        t.0 as _
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "{:#x}", self.0)
    }
}

impl Add<Address> for Address {
    type Output = Self;

    fn add(self, rhs: Address) -> Self {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl Sub<Address> for Address {
    type Output = Self;

    fn sub(self, rhs: Address) -> Self {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl Add<u64> for Address {
    type Output = Self;

    fn add(self, rhs: u64) -> Self {
        Self(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address {
    type Output = Self;

    fn sub(self, rhs: u64) -> Self {
        Self(self.0.wrapping_sub(rhs))
    }
}

impl Add<usize> for Address {
    type Output = Self;

    fn add(self, rhs: usize) -> Self {
        Self(self.0.wrapping_add(rhs as u64))
    }
}

impl AddAssign<u64> for Address {
    fn add_assign(&mut self, rhs: u64) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

/// A half-open interval `[start, end)` of guest virtual addresses.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AddressRange {
    start: Address,
    end: Address,
}

impl AddressRange {
    pub fn new(start: impl Into<Address>, end: impl Into<Address>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn size(&self) -> u64 {
        self.end.offset().wrapping_sub(self.start.offset())
    }

    pub fn contains(&self, address: impl Into<Address>) -> bool {
        let address = address.into();
        self.start <= address && address < self.end
    }

    pub fn contains_range(&self, other: AddressRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: AddressRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Grow this range in place to the union with `other`.
    pub fn cover(&mut self, other: AddressRange) {
        if other.start < self.start {
            self.start = other.start;
        }
        if other.end > self.end {
            self.end = other.end;
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_range_contains() {
        let range = AddressRange::new(0x1000u64, 0x100cu64);

        assert_eq!(range.size(), 0xc);
        assert!(range.contains(0x1000u64));
        assert!(range.contains(0x100bu64));
        assert!(!range.contains(0x100cu64));
        assert!(!range.contains(0xfffu64));

        assert!(range.contains_range(AddressRange::new(0x1004u64, 0x1008u64)));
        assert!(range.contains_range(range));
        assert!(!range.contains_range(AddressRange::new(0x1004u64, 0x1010u64)));
    }

    #[test]
    fn test_range_overlaps() {
        let range = AddressRange::new(0x1000u64, 0x100cu64);

        assert!(range.overlaps(AddressRange::new(0x100bu64, 0x2000u64)));
        assert!(range.overlaps(AddressRange::new(0x800u64, 0x1001u64)));
        assert!(!range.overlaps(AddressRange::new(0x100cu64, 0x2000u64)));
        assert!(!range.overlaps(AddressRange::new(0x800u64, 0x1000u64)));
    }

    #[test]
    fn test_range_cover() {
        let mut range = AddressRange::new(0x1000u64, 0x100cu64);

        range.cover(AddressRange::new(0x100cu64, 0x1014u64));
        assert_eq!(range, AddressRange::new(0x1000u64, 0x1014u64));

        range.cover(AddressRange::new(0x800u64, 0x900u64));
        assert_eq!(range, AddressRange::new(0x800u64, 0x1014u64));
    }
}
