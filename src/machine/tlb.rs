//! TLB表项

use bitflags::bitflags;

use crate::mm::{PhysPageNum, VirtPageNum};

bitflags! {
    /// TLB表项中的标志位
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct TlbFlags: u8 {
        const VALID = 1 << 0;
        const READ_ONLY = 1 << 1;
        const USED = 1 << 2;
        const DIRTY = 1 << 3;
    }
}

/// 一条地址翻译：vpn -> ppn
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TranslationEntry {
    pub vpn: VirtPageNum,
    pub ppn: PhysPageNum,
    pub flags: TlbFlags,
}

impl TranslationEntry {
    /// 新装入的表项：有效、未使用、未修改
    pub fn new(vpn: VirtPageNum, ppn: PhysPageNum, read_only: bool) -> Self {
        let mut flags = TlbFlags::VALID;
        if read_only {
            flags |= TlbFlags::READ_ONLY;
        }
        Self { vpn, ppn, flags }
    }
    pub fn is_valid(&self) -> bool {
        self.flags.contains(TlbFlags::VALID)
    }
    pub fn is_used(&self) -> bool {
        self.flags.contains(TlbFlags::USED)
    }
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(TlbFlags::DIRTY)
    }
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(TlbFlags::READ_ONLY)
    }
    /// 仅清除有效位，保留其余内容
    pub fn invalidate(&mut self) {
        self.flags.remove(TlbFlags::VALID);
    }
}
