//! Memory management implementation
//!
//! Demand-paged virtual memory for a simulated single-processor machine.
//! Frames are handed out by the frame allocator, located through one global
//! inverted page table, populated lazily from executable sections, swap or
//! zeroes, and evicted to a page-indexed swap file under pressure.
//!
//! 帧分配器、反置页表、交换区以及各进程的地址空间表作为一个整体，
//! 由同一把锁保护，缺页处理在全系统范围内串行。

mod accessor;
mod address;
mod fault;
mod frame_allocator;
mod memory_set;
mod page_table;
pub mod policy;
mod swap;

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};

pub use self::address::{PhysAddr, PhysPageNum, VPNRange, VirtAddr, VirtPageNum};
pub use self::frame_allocator::{FrameAllocator, StackFrameAllocator};
pub use self::memory_set::{AddressSpace, PageLocation};
pub use self::page_table::{FrameInfo, InvertedPageTable, PageKey, Pid};
pub use self::swap::{PageFile, SwapStore};

use crate::error::{VmError, VmResult};
use crate::machine::Processor;
use crate::sync::Lock;
use crate::trap::trap_handler;

/// 调页活动的计数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VmStats {
    pub tlb_misses: usize,
    pub page_faults: usize,
    pub evictions: usize,
    pub swap_outs: usize,
    pub swap_ins: usize,
    pub zero_fills: usize,
    pub section_loads: usize,
}

/// 进程退出时回收的资源
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reclaimed {
    pub frames: usize,
    pub swap_slots: usize,
}

pub(crate) struct MemoryManagerInner {
    frames: StackFrameAllocator,
    ipt: InvertedPageTable,
    swap: SwapStore,
    spaces: HashMap<Pid, AddressSpace>,
    stats: VmStats,
}

/// 虚拟内存管理器
pub struct MemoryManager {
    machine: Arc<Processor>,
    inner: Lock<MemoryManagerInner>,
}

impl MemoryManager {
    pub fn new(machine: Arc<Processor>, swap: SwapStore) -> Self {
        let num_frames = machine.num_phys_pages();
        let mut frames = StackFrameAllocator::new();
        frames.init(PhysPageNum(0), PhysPageNum(num_frames));
        info!(
            "[mm] {} frames of {} bytes, {} tlb slots",
            num_frames,
            crate::config::PAGE_SIZE,
            machine.tlb_size()
        );
        Self {
            machine,
            inner: Lock::new(MemoryManagerInner {
                frames,
                ipt: InvertedPageTable::new(num_frames),
                swap,
                spaces: HashMap::new(),
                stats: VmStats::default(),
            }),
        }
    }

    pub fn machine(&self) -> &Arc<Processor> {
        &self.machine
    }

    /// 登记一个新建的地址空间，此后才能对其处理缺页
    pub fn register(&self, space: AddressSpace) {
        let pid = space.pid();
        let mut inner = self.inner.acquire();
        debug!("[mm] register {} with {} pages", pid, space.num_pages());
        let previous = inner.spaces.insert(pid, space);
        assert!(previous.is_none(), "{} registered twice", pid);
    }

    /// 进程退出：释放它的全部页帧与交换槽，并清除指向这些页帧的TLB槽位
    pub fn release(&self, pid: Pid) -> VmResult<Reclaimed> {
        let cpu = &*self.machine;
        let mut inner = self.inner.acquire();
        let space = inner.spaces.remove(&pid).ok_or(VmError::UnknownProcess(pid))?;

        let resident: Vec<_> = space.resident_frames().collect();
        cpu.update_tlb(|tlb| {
            for slot in tlb.iter_mut() {
                if slot.is_some_and(|e| resident.iter().any(|&(_, ppn)| ppn == e.ppn)) {
                    *slot = None;
                }
            }
        });
        for &(vpn, ppn) in resident.iter() {
            inner.ipt.unbind(PageKey::new(pid, vpn));
            inner.frames.release(ppn);
        }
        let mut swap_slots = 0;
        for (_, slot) in space.swap_slots() {
            inner.swap.free_slot(slot);
            swap_slots += 1;
        }
        if cpu.current_process() == Some(pid) {
            cpu.set_current_process(None);
        }
        let reclaimed = Reclaimed {
            frames: resident.len(),
            swap_slots,
        };
        debug!("[mm] released {}: {:?}", pid, reclaimed);
        Ok(reclaimed)
    }

    pub fn is_registered(&self, pid: Pid) -> bool {
        self.inner.acquire().spaces.contains_key(&pid)
    }

    pub fn lookup(&self, pid: Pid, vpn: VirtPageNum) -> Option<PageLocation> {
        self.inner.acquire().spaces.get(&pid)?.lookup(vpn)
    }

    pub fn address_bound(&self, pid: Pid) -> Option<usize> {
        self.inner.acquire().spaces.get(&pid).map(|s| s.bound())
    }

    pub fn num_pages(&self, pid: Pid) -> Option<usize> {
        self.inner.acquire().spaces.get(&pid).map(|s| s.num_pages())
    }

    pub fn free_frames(&self) -> usize {
        self.inner.acquire().frames.free_count()
    }

    pub fn resident_pages(&self) -> usize {
        self.inner.acquire().ipt.resident_count()
    }

    pub fn swap_slots_in_use(&self) -> usize {
        self.inner.acquire().swap.slots_in_use()
    }

    /// 页帧当前的占用者与访问位
    pub fn frame_info(&self, ppn: PhysPageNum) -> FrameInfo {
        *self.inner.acquire().ipt.frame(ppn)
    }

    pub fn stats(&self) -> VmStats {
        self.inner.acquire().stats
    }

    /// 上下文切换：TLB全部置为无效，反置页表不受影响
    pub fn save_state(&self) {
        let mut inner = self.inner.acquire();
        inner.flush_tlb(&self.machine);
        self.machine.set_current_process(None);
    }

    /// 处理`pid`在`vaddr`处的TLB缺失
    pub fn handle_tlb_miss(&self, pid: Pid, vaddr: usize) -> VmResult<()> {
        let cpu = &*self.machine;
        let mut inner = self.inner.acquire();
        inner.switch_to(cpu, pid);
        match cpu.translate(vaddr, false) {
            Ok(_) => Ok(()),
            Err(cause) => trap_handler(&mut inner, cpu, pid, cause),
        }
    }

    /// 预先装入整个地址空间（不经过TLB），返回装入的页数
    ///
    /// 空闲帧检查与装入在同一次持锁内完成，装入过程不会换出任何页面。
    pub fn populate_all(&self, pid: Pid) -> VmResult<usize> {
        let mut inner = self.inner.acquire();
        let need = inner
            .spaces
            .get(&pid)
            .ok_or(VmError::UnknownProcess(pid))?
            .num_pages();
        let free = inner.frames.free_count();
        if need > free {
            return Err(VmError::InsufficientMemory { need, free });
        }
        for vpn in 0..need {
            inner.ensure_resident(&self.machine, pid, VirtPageNum(vpn))?;
        }
        Ok(need)
    }

    /// 校验各张表之间的一致性，返回第一处不一致的描述
    pub fn check_invariants(&self) -> Result<(), String> {
        let inner = self.inner.acquire();
        inner.ipt.check_inverse()?;

        let total = inner.ipt.num_frames();
        if inner.ipt.resident_count() + inner.frames.free_count() != total {
            return Err(format!(
                "{} resident + {} free != {} frames",
                inner.ipt.resident_count(),
                inner.frames.free_count(),
                total
            ));
        }
        for (key, ppn) in inner.ipt.iter() {
            if inner.frames.is_free(ppn) {
                return Err(format!("{:?} occupied by {:?} is in the free pool", ppn, key));
            }
            let space = inner
                .spaces
                .get(&key.pid)
                .ok_or_else(|| format!("{:?} owned by unregistered {}", ppn, key.pid))?;
            if space.frame(key.vpn) != Some(ppn) {
                return Err(format!("{:?} -> {:?} missing from the address space", key, ppn));
            }
        }

        let mut slots = 0;
        for (pid, space) in inner.spaces.iter() {
            for (vpn, ppn) in space.resident_frames() {
                if inner.ipt.lookup(PageKey::new(*pid, vpn)) != Some(ppn) {
                    return Err(format!("{} {:?} claims {:?} unknown to the table", pid, vpn, ppn));
                }
                if space.is_read_only(vpn) && inner.ipt.frame(ppn).dirty {
                    return Err(format!("read-only {} {:?} is dirty", pid, vpn));
                }
            }
            for (vpn, slot) in space.swap_slots() {
                let key = PageKey::new(*pid, vpn);
                if inner.swap.occupant(slot) != Some(key) {
                    return Err(format!(
                        "{:?} records swap slot {} owned by {:?}",
                        key,
                        slot,
                        inner.swap.occupant(slot)
                    ));
                }
                if space.is_read_only(vpn) {
                    return Err(format!("read-only {:?} has swap slot {}", key, slot));
                }
                slots += 1;
            }
        }
        if slots != inner.swap.slots_in_use() {
            return Err(format!(
                "{} swap slots recorded, {} in use",
                slots,
                inner.swap.slots_in_use()
            ));
        }

        let current = self.machine.current_process();
        for entry in self.machine.tlb_snapshot().into_iter().flatten() {
            if !entry.is_valid() {
                continue;
            }
            let key = current
                .map(|pid| PageKey::new(pid, entry.vpn))
                .ok_or_else(|| format!("valid {:?} with no current process", entry))?;
            if inner.ipt.lookup(key) != Some(entry.ppn) {
                return Err(format!("stale valid tlb entry {:?}", entry));
            }
            if entry.is_read_only() && entry.is_dirty() {
                return Err(format!("read-only tlb entry {:?} is dirty", entry));
            }
        }
        Ok(())
    }
}
