//! 地址与页号
//!
//! 模拟机器只有一级页，虚拟页号直接下标地址空间表，物理页号下标帧数组。

use crate::config::{PAGE_SIZE, PAGE_SIZE_BITS};
use core::fmt::{self, Debug, Formatter};
use core::ops::Range;

macro_rules! number_type {
    ($(#[$doc:meta])* $name:ident, $tag:literal) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default)]
        pub struct $name(pub usize);

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, ":{:#x}"), self.0)
            }
        }
        impl From<usize> for $name {
            fn from(v: usize) -> Self {
                Self(v)
            }
        }
        impl From<$name> for usize {
            fn from(v: $name) -> Self {
                v.0
            }
        }
    };
}

number_type!(
    /// 模拟内存中的字节偏移
    PhysAddr,
    "PA"
);
number_type!(
    /// 进程内的字节地址
    VirtAddr,
    "VA"
);
number_type!(
    /// 帧号
    PhysPageNum,
    "PPN"
);
number_type!(
    /// 虚拟页号
    VirtPageNum,
    "VPN"
);

impl VirtAddr {
    /// 所在页
    pub fn floor(&self) -> VirtPageNum {
        VirtPageNum(self.0 >> PAGE_SIZE_BITS)
    }
    /// 覆盖`[0, self)`所需的页数，溢出时饱和
    pub fn ceil(&self) -> VirtPageNum {
        VirtPageNum(self.0.div_ceil(PAGE_SIZE))
    }
    pub fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl From<VirtPageNum> for VirtAddr {
    fn from(v: VirtPageNum) -> Self {
        Self(v.0 << PAGE_SIZE_BITS)
    }
}

impl From<PhysPageNum> for PhysAddr {
    fn from(v: PhysPageNum) -> Self {
        Self(v.0 << PAGE_SIZE_BITS)
    }
}

/// 左闭右开的虚拟页号区间
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VPNRange {
    start: VirtPageNum,
    end: VirtPageNum,
}

impl VPNRange {
    pub fn new(start: VirtPageNum, end: VirtPageNum) -> Self {
        assert!(start <= end, "start {:?} > end {:?}!", start, end);
        Self { start, end }
    }
    pub fn start(&self) -> VirtPageNum {
        self.start
    }
    pub fn end(&self) -> VirtPageNum {
        self.end
    }
    pub fn len(&self) -> usize {
        self.end.0 - self.start.0
    }
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
    /// 是否至少共享一页
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl IntoIterator for VPNRange {
    type Item = VirtPageNum;
    type IntoIter = core::iter::Map<Range<usize>, fn(usize) -> VirtPageNum>;

    fn into_iter(self) -> Self::IntoIter {
        (self.start.0..self.end.0).map(VirtPageNum as fn(usize) -> VirtPageNum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_arithmetic() {
        let va = VirtAddr(PAGE_SIZE * 3 + 17);
        assert_eq!(va.floor(), VirtPageNum(3));
        assert_eq!(va.ceil(), VirtPageNum(4));
        assert_eq!(va.page_offset(), 17);
        assert_eq!(VirtAddr(PAGE_SIZE * 2).ceil(), VirtPageNum(2));
        assert_eq!(VirtAddr(0).ceil(), VirtPageNum(0));
        assert_eq!(VirtAddr::from(VirtPageNum(5)), VirtAddr(5 * PAGE_SIZE));
        assert_eq!(PhysAddr::from(PhysPageNum(2)), PhysAddr(2 * PAGE_SIZE));
        assert_eq!(format!("{:?}", PhysPageNum(10)), "PPN:0xa");
    }

    #[test]
    fn vpn_range_iterates_half_open() {
        let range = VPNRange::new(VirtPageNum(2), VirtPageNum(5));
        assert_eq!(range.len(), 3);
        let pages: Vec<_> = range.into_iter().collect();
        assert_eq!(pages, vec![VirtPageNum(2), VirtPageNum(3), VirtPageNum(4)]);
        assert!(VPNRange::new(VirtPageNum(1), VirtPageNum(1)).is_empty());
    }

    #[test]
    fn ranges_overlap_only_when_sharing_a_page() {
        let a = VPNRange::new(VirtPageNum(0), VirtPageNum(3));
        let b = VPNRange::new(VirtPageNum(3), VirtPageNum(4));
        let c = VPNRange::new(VirtPageNum(2), VirtPageNum(6));
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }
}
