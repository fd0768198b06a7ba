use std::ops::RangeInclusive;

pub trait GetBit {
    #[must_use]
    fn bit(self, i: u8) -> bool;

    #[must_use]
    fn bits(self, range: RangeInclusive<u8>) -> Self;
}

macro_rules! impl_get_bit {
    ($t:ty) => {
        impl GetBit for $t {
            #[inline]
            fn bit(self, i: u8) -> bool {
                debug_assert!(i < (<$t>::BITS as u8));
                self & (1 << i) != 0
            }

            #[inline]
            fn bits(self, range: RangeInclusive<u8>) -> Self {
                let start = *range.start();
                let end = *range.end();
                debug_assert!(end < (<$t>::BITS as u8));

                (self >> start) & (<$t>::MAX >> (<$t>::BITS as u8 - (end - start + 1)))
            }
        }
    };
}

impl_get_bit!(u8);
impl_get_bit!(u16);
impl_get_bit!(u32);
impl_get_bit!(u64);

pub trait U16Ext {
    fn lsb(self) -> u8;

    fn msb(self) -> u8;
}

impl U16Ext for u16 {
    #[inline(always)]
    fn lsb(self) -> u8 {
        self as u8
    }

    #[inline(always)]
    fn msb(self) -> u8 {
        (self >> 8) as u8
    }
}

pub trait U32Ext {
    fn low_halfword(self) -> u16;

    fn high_halfword(self) -> u16;
}

impl U32Ext for u32 {
    #[inline(always)]
    fn low_halfword(self) -> u16 {
        self as u16
    }

    #[inline(always)]
    fn high_halfword(self) -> u16 {
        (self >> 16) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn bit_ranges() {
        assert_eq!(0b1011_0110_u8.bits(2..=4), 0b101);
        assert_eq!(0xFFFF_u16.bits(0..=15), 0xFFFF);
        assert_eq!(0x8000_0000_u32.bits(31..=31), 1);
        assert!(0x0100_u16.bit(8));
    }

    #[test]
    fn halves() {
        let value = 0x1234_5678_u32;
        assert_eq!(value.low_halfword(), 0x5678);
        assert_eq!(value.high_halfword(), 0x1234);
        assert_eq!(0xAB34_u16.msb(), 0xAB);
        assert_eq!(0xAB34_u16.lsb(), 0x34);
    }
}
