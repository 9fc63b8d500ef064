//! 模拟的处理器
//!
//! 内核只通过这里访问"硬件"：固定大小的TLB、记录出错虚拟地址的寄存器、
//! 平坦的物理内存字节数组，以及当前运行进程的标识。
//! TLB与物理内存的修改都在关抢占的短临界区内完成（见 [`UPSafeCell`]）。

mod tlb;

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::PAGE_SIZE;
use crate::mm::{PhysAddr, PhysPageNum, Pid, VirtAddr};
use crate::sync::UPSafeCell;

pub use self::tlb::{TlbFlags, TranslationEntry};

/// 访存时硬件可能抛出的异常
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exception {
    /// TLB中没有该虚拟页的有效表项，出错地址记录在BadVAddr寄存器
    TlbMiss,
    /// 对只读页执行写操作
    ReadOnly,
}

pub struct Processor {
    /// 槽位为None表示从未装入过翻译
    tlb: UPSafeCell<Vec<Option<TranslationEntry>>>,
    bad_vaddr: AtomicUsize,
    memory: UPSafeCell<Vec<u8>>,
    current: UPSafeCell<Option<Pid>>,
    num_phys_pages: usize,
}

impl Processor {
    pub fn new(num_phys_pages: usize, tlb_size: usize) -> Self {
        assert!(tlb_size > 0, "the tlb needs at least one slot");
        Self {
            tlb: UPSafeCell::new(vec![None; tlb_size]),
            bad_vaddr: AtomicUsize::new(0),
            memory: UPSafeCell::new(vec![0u8; num_phys_pages * PAGE_SIZE]),
            current: UPSafeCell::new(None),
            num_phys_pages,
        }
    }

    pub fn num_phys_pages(&self) -> usize {
        self.num_phys_pages
    }

    pub fn tlb_size(&self) -> usize {
        self.tlb.exclusive_access().len()
    }

    pub fn read_tlb_entry(&self, index: usize) -> Option<TranslationEntry> {
        self.tlb.exclusive_access()[index]
    }

    pub fn write_tlb_entry(&self, index: usize, entry: Option<TranslationEntry>) {
        self.tlb.exclusive_access()[index] = entry;
    }

    /// 一次性读出全部槽位，供替换策略使用
    pub fn tlb_snapshot(&self) -> Vec<Option<TranslationEntry>> {
        self.tlb.exclusive_access().clone()
    }

    /// 在关抢占状态下批量修改TLB
    pub fn update_tlb<R>(&self, f: impl FnOnce(&mut [Option<TranslationEntry>]) -> R) -> R {
        f(&mut self.tlb.exclusive_access())
    }

    /// 最近一次异常的出错虚拟地址
    pub fn bad_vaddr(&self) -> usize {
        self.bad_vaddr.load(Ordering::SeqCst)
    }

    pub fn current_process(&self) -> Option<Pid> {
        *self.current.exclusive_access()
    }

    pub fn set_current_process(&self, pid: Option<Pid>) {
        *self.current.exclusive_access() = pid;
    }

    /// 按TLB翻译一个虚拟地址，命中时像硬件一样置位used（写时还有dirty）
    pub fn translate(&self, vaddr: usize, write: bool) -> Result<PhysAddr, Exception> {
        let va = VirtAddr::from(vaddr);
        let vpn = va.floor();
        let mut tlb = self.tlb.exclusive_access();
        let hit = tlb
            .iter_mut()
            .flatten()
            .find(|entry| entry.is_valid() && entry.vpn == vpn);
        let Some(entry) = hit else {
            self.bad_vaddr.store(vaddr, Ordering::SeqCst);
            return Err(Exception::TlbMiss);
        };
        if write && entry.is_read_only() {
            self.bad_vaddr.store(vaddr, Ordering::SeqCst);
            return Err(Exception::ReadOnly);
        }
        entry.flags |= TlbFlags::USED;
        if write {
            entry.flags |= TlbFlags::DIRTY;
        }
        let base: PhysAddr = entry.ppn.into();
        Ok(PhysAddr(base.0 + va.page_offset()))
    }

    /// 从物理内存读出`buf.len()`字节
    pub fn read_memory(&self, pa: PhysAddr, buf: &mut [u8]) {
        let memory = self.memory.exclusive_access();
        buf.copy_from_slice(&memory[pa.0..pa.0 + buf.len()]);
    }

    pub fn write_memory(&self, pa: PhysAddr, data: &[u8]) {
        let mut memory = self.memory.exclusive_access();
        memory[pa.0..pa.0 + data.len()].copy_from_slice(data);
    }

    /// 获取整页物理内存的可变引用并执行`f`
    pub fn with_frame_mut<R>(&self, ppn: PhysPageNum, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let start = PhysAddr::from(ppn).0;
        let mut memory = self.memory.exclusive_access();
        f(&mut memory[start..start + PAGE_SIZE])
    }

    pub fn read_frame(&self, ppn: PhysPageNum, buf: &mut [u8]) {
        self.read_memory(ppn.into(), &mut buf[..PAGE_SIZE]);
    }
}
