use core::fmt;

/// Value at which the TTI counter wraps back to 0 (1024 frames of 10 subframes)
pub const TTI_WRAP: u32 = 10240;

/// Subframe counter as delivered by the PHY, always in `[0, 10240)`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tti(u32);

/// Forward distance from `b` to `a`, assuming `a` is not before `b`
pub fn tti_interval(a: u32, b: u32) -> u32 {
    if a >= b { a - b } else { TTI_WRAP - b + a }
}

/// Signed difference between two TTI values, handling wrap-around of the counter
pub fn tti_int_diff(a: i32, b: i32) -> i32 {
    let wrap = TTI_WRAP as i32;
    let mut diff = a - b;
    while diff < -wrap / 2 {
        diff += wrap;
    }
    while diff >= wrap / 2 {
        diff -= wrap;
    }
    diff
}

impl Tti {
    /// Builds a TTI, reducing the raw value modulo 10240
    pub fn new(value: u32) -> Tti {
        Tti(value % TTI_WRAP)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Subframe index within the radio frame, 0..10
    pub fn subframe(self) -> u32 {
        self.0 % 10
    }

    /// System frame number, 0..1024
    pub fn sfn(self) -> u32 {
        self.0 / 10
    }

    /// Adds a (possibly negative) number of subframes
    pub fn add(self, n: i32) -> Tti {
        let v = (self.0 as i64 + n as i64).rem_euclid(TTI_WRAP as i64);
        Tti(v as u32)
    }

    pub fn sub(self, n: i32) -> Tti {
        self.add(-n)
    }

    /// Forward distance from `earlier` to self
    pub fn interval(self, earlier: Tti) -> u32 {
        tti_interval(self.0, earlier.0)
    }

    /// Signed difference in subframes, in `[-5120, 5120)`
    pub fn diff(self, b: Tti) -> i32 {
        tti_int_diff(self.0 as i32, b.0 as i32)
    }

    /// True for the subframe carrying SystemInformationBlockType1
    pub fn is_sib1(self) -> bool {
        self.sfn() % 2 == 0 && self.subframe() == 5
    }
}

impl From<u32> for Tti {
    fn from(value: u32) -> Self {
        Tti::new(value)
    }
}

impl fmt::Display for Tti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:5}", self.0)
    }
}

impl fmt::Debug for Tti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sfn(), self.subframe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_diff() {
        let initial = Tti::new(0);
        let mut tti = initial;
        let iterations = 10000;
        let increment = 1234;
        for _ in 0..iterations {
            let tti2 = tti.add(increment);
            assert_eq!(tti2.diff(tti), increment);
            assert_eq!(tti.diff(tti2), -increment);
            tti = tti2;
        }
        for _ in 0..iterations {
            tti = tti.sub(increment);
        }
        assert_eq!(tti, initial);
    }

    #[test]
    fn test_interval_wraps() {
        assert_eq!(tti_interval(10, 5), 5);
        assert_eq!(tti_interval(3, 10238), 5);
        assert_eq!(Tti::new(2).interval(Tti::new(10239)), 3);
        assert_eq!(Tti::new(10245).value(), 5);
    }

    #[test]
    fn test_sfn_and_subframe() {
        let tti = Tti::new(1235);
        assert_eq!(tti.sfn(), 123);
        assert_eq!(tti.subframe(), 5);
        assert!(!tti.is_sib1());
        assert!(Tti::new(1245).is_sib1());
        assert_eq!(Tti::new(0).sub(4).value(), 10236);
    }
}
