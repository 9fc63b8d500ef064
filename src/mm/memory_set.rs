//! 进程的地址空间表
//!
//! 每个虚拟页记录它的段映射、只读属性、交换槽和当前所在的物理页帧。
//! 地址空间按页连续：可执行映像的页，之后是栈页和参数页（由调用者以`extra_pages`给出）。

use std::sync::Arc;

use super::{Pid, PhysPageNum, VPNRange, VirtPageNum};
use crate::config::{MAX_ADDRESS_SPACE_PAGES, PAGE_SIZE};
use crate::error::{VmError, VmResult};
use crate::loader::{Executable, Section};

/// 页面当前的权威位置，优先级 Resident > SwapBacked > SectionBacked > Unmapped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageLocation {
    /// 匿名页（栈、参数、段之间的空隙），首次访问时清零
    Unmapped,
    /// 由第`section`个段的第`offset`页提供内容
    SectionBacked { section: usize, offset: usize },
    SwapBacked(usize),
    Resident(PhysPageNum),
}

#[derive(Clone, Copy, Debug, Default)]
struct PageEntry {
    section: Option<(usize, usize)>,
    read_only: bool,
    /// 驻留时仍可保留，作为最近一次写回内容的缓存
    swap_slot: Option<usize>,
    frame: Option<PhysPageNum>,
}

pub struct AddressSpace {
    pid: Pid,
    sections: Vec<Arc<dyn Section>>,
    pages: Vec<PageEntry>,
}

impl AddressSpace {
    /// 按可执行映像的段建立页表项，另外追加`extra_pages`个匿名页
    pub fn new(pid: Pid, exe: &Executable, extra_pages: usize) -> VmResult<Self> {
        let ranges: Vec<VPNRange> = exe.sections.iter().map(|s| s.vpn_range()).collect();
        for (i, a) in ranges.iter().enumerate() {
            if ranges[i + 1..].iter().any(|b| a.overlaps(b)) {
                return Err(VmError::BadExecutable("overlapping sections"));
            }
        }
        let num_pages = exe
            .num_pages()
            .checked_add(extra_pages)
            .filter(|&n| n <= MAX_ADDRESS_SPACE_PAGES)
            .ok_or(VmError::BadExecutable("address space too large"))?;
        let mut pages = vec![PageEntry::default(); num_pages];
        for (si, section) in exe.sections.iter().enumerate() {
            for (offset, vpn) in section.vpn_range().into_iter().enumerate() {
                let entry = &mut pages[vpn.0];
                entry.section = Some((si, offset));
                entry.read_only = section.is_read_only();
            }
        }
        Ok(Self {
            pid,
            sections: exe.sections.clone(),
            pages,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    /// 第一个非法虚拟地址
    pub fn bound(&self) -> usize {
        self.pages.len() * PAGE_SIZE
    }

    pub fn contains(&self, vpn: VirtPageNum) -> bool {
        vpn.0 < self.pages.len()
    }

    /// 越界时返回None
    pub fn lookup(&self, vpn: VirtPageNum) -> Option<PageLocation> {
        let entry = self.pages.get(vpn.0)?;
        Some(match (entry.frame, entry.swap_slot, entry.section) {
            (Some(ppn), _, _) => PageLocation::Resident(ppn),
            (None, Some(slot), _) => PageLocation::SwapBacked(slot),
            (None, None, Some((section, offset))) => PageLocation::SectionBacked { section, offset },
            (None, None, None) => PageLocation::Unmapped,
        })
    }

    pub fn is_read_only(&self, vpn: VirtPageNum) -> bool {
        self.pages.get(vpn.0).is_some_and(|e| e.read_only)
    }

    pub fn swap_slot(&self, vpn: VirtPageNum) -> Option<usize> {
        self.pages.get(vpn.0).and_then(|e| e.swap_slot)
    }

    pub fn frame(&self, vpn: VirtPageNum) -> Option<PhysPageNum> {
        self.pages.get(vpn.0).and_then(|e| e.frame)
    }

    /// 段映射：(段下标, 段内页号)
    pub fn section_page(&self, vpn: VirtPageNum) -> Option<(usize, usize)> {
        self.pages.get(vpn.0).and_then(|e| e.section)
    }

    pub fn section(&self, index: usize) -> Option<&Arc<dyn Section>> {
        self.sections.get(index)
    }

    pub fn sections(&self) -> &[Arc<dyn Section>] {
        &self.sections
    }

    pub fn bind_resident(&mut self, vpn: VirtPageNum, ppn: PhysPageNum) {
        let entry = &mut self.pages[vpn.0];
        assert!(
            entry.frame.is_none(),
            "{} {:?} is already resident in {:?}",
            self.pid,
            vpn,
            entry.frame
        );
        entry.frame = Some(ppn);
    }

    pub fn unbind(&mut self, vpn: VirtPageNum) -> Option<PhysPageNum> {
        self.pages.get_mut(vpn.0).and_then(|e| e.frame.take())
    }

    pub fn record_swap(&mut self, vpn: VirtPageNum, slot: usize) {
        self.pages[vpn.0].swap_slot = Some(slot);
    }

    /// 所有驻留页
    pub fn resident_frames(&self) -> impl Iterator<Item = (VirtPageNum, PhysPageNum)> + '_ {
        self.pages
            .iter()
            .enumerate()
            .filter_map(|(vpn, e)| e.frame.map(|ppn| (VirtPageNum(vpn), ppn)))
    }

    /// 所有持有交换槽的页
    pub fn swap_slots(&self) -> impl Iterator<Item = (VirtPageNum, usize)> + '_ {
        self.pages
            .iter()
            .enumerate()
            .filter_map(|(vpn, e)| e.swap_slot.map(|slot| (VirtPageNum(vpn), slot)))
    }
}
