//! 缺页处理
//!
//! 所有函数都在全局内存锁内调用；修改TLB时另外进入关抢占的短临界区。
//! TLB表项被覆盖或置为无效之前，先把它的used/dirty位归并到页帧表，
//! 这样页帧表始终能回答"这个页帧是否被写过"。

use log::{debug, error, trace, warn};

use super::memory_set::PageLocation;
use super::page_table::InvertedPageTable;
use super::policy::{self, choose_install_slot, choose_victim};
use super::{MemoryManagerInner, PageKey, Pid, PhysPageNum, VirtAddr, VirtPageNum};
use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};
use crate::machine::{Processor, TranslationEntry};

/// 把一条有效表项的访问位归并到它所指的页帧
fn fold_bits(ipt: &mut InvertedPageTable, entry: &TranslationEntry) {
    let info = ipt.frame_mut(entry.ppn);
    if info.occupant.is_some() {
        info.referenced |= entry.is_used();
        info.dirty |= entry.is_dirty();
    }
}

impl MemoryManagerInner {
    /// 切换到`pid`的地址空间；与当前进程不同时清空TLB
    pub(crate) fn switch_to(&mut self, cpu: &Processor, pid: Pid) {
        if cpu.current_process() != Some(pid) {
            self.flush_tlb(cpu);
            cpu.set_current_process(Some(pid));
        }
    }

    /// 上下文切换时保存状态：所有槽位置为无效，表项内容保留
    pub(crate) fn flush_tlb(&mut self, cpu: &Processor) {
        let ipt = &mut self.ipt;
        cpu.update_tlb(|tlb| {
            for entry in tlb.iter_mut().flatten().filter(|e| e.is_valid()) {
                fold_bits(ipt, entry);
                entry.invalidate();
            }
        });
    }

    /// 使所有指向`ppn`的有效表项失效
    fn invalidate_frame(&mut self, cpu: &Processor, ppn: PhysPageNum) {
        let ipt = &mut self.ipt;
        cpu.update_tlb(|tlb| {
            for entry in tlb
                .iter_mut()
                .flatten()
                .filter(|e| e.is_valid() && e.ppn == ppn)
            {
                fold_bits(ipt, entry);
                entry.invalidate();
            }
        });
    }

    /// 处理`pid`在`vaddr`上的TLB缺失，返回后访存可以重试
    pub(crate) fn resolve(&mut self, cpu: &Processor, pid: Pid, vaddr: usize) -> VmResult<()> {
        let vpn = VirtAddr(vaddr).floor();
        let space = self.spaces.get(&pid).ok_or(VmError::UnknownProcess(pid))?;
        let location = space.lookup(vpn).ok_or(VmError::InvalidAddress(vaddr))?;
        let read_only = space.is_read_only(vpn);
        self.stats.tlb_misses += 1;

        let ppn = match location {
            PageLocation::Resident(ppn) => ppn,
            _ => {
                self.stats.page_faults += 1;
                self.page_in(cpu, pid, vpn)?
            }
        };
        self.install_translation(cpu, vpn, ppn, read_only);
        Ok(())
    }

    /// 保证页面驻留，但不装入TLB
    pub(crate) fn ensure_resident(
        &mut self,
        cpu: &Processor,
        pid: Pid,
        vpn: VirtPageNum,
    ) -> VmResult<PhysPageNum> {
        let space = self.spaces.get(&pid).ok_or(VmError::UnknownProcess(pid))?;
        match space.lookup(vpn) {
            None => Err(VmError::InvalidAddress(VirtAddr::from(vpn).0)),
            Some(PageLocation::Resident(ppn)) => Ok(ppn),
            Some(_) => self.page_in(cpu, pid, vpn),
        }
    }

    /// 取得一个页帧（必要时先换出），填充内容并建立映射
    fn page_in(&mut self, cpu: &Processor, pid: Pid, vpn: VirtPageNum) -> VmResult<PhysPageNum> {
        let ppn = match self.frames.acquire() {
            Ok(ppn) => ppn,
            Err(VmError::FrameExhausted) => {
                self.evict(cpu)?;
                self.frames.acquire()?
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = self.fill_frame(cpu, pid, vpn, ppn) {
            self.frames.release(ppn);
            return Err(e);
        }
        self.ipt.bind(PageKey::new(pid, vpn), ppn);
        let space = self.spaces.get_mut(&pid).ok_or(VmError::UnknownProcess(pid))?;
        space.bind_resident(vpn, ppn);
        debug!("[fault] {} {:?} -> {:?}", pid, vpn, ppn);
        Ok(ppn)
    }

    /// 按交换区、段、清零的顺序填充页帧
    fn fill_frame(&mut self, cpu: &Processor, pid: Pid, vpn: VirtPageNum, ppn: PhysPageNum) -> VmResult<()> {
        let space = self.spaces.get(&pid).ok_or(VmError::UnknownProcess(pid))?;
        if let Some(slot) = space.swap_slot(vpn) {
            let mut page = vec![0u8; PAGE_SIZE];
            self.swap.read_page(slot, &mut page)?;
            cpu.with_frame_mut(ppn, |frame| frame.copy_from_slice(&page));
            self.stats.swap_ins += 1;
            return Ok(());
        }
        match space.section_page(vpn) {
            Some((index, offset)) => {
                let corrupt = VmError::CorruptAddressSpace { pid, vpn };
                let Some(section) = space.section(index) else {
                    error!("[fault] {} {:?} names missing section {}", pid, vpn, index);
                    return Err(corrupt);
                };
                cpu.with_frame_mut(ppn, |frame| section.load_page(offset, frame))
                    .map_err(|e| {
                        error!(
                            "[fault] {} {:?}: section `{}` page {} failed: {}",
                            pid,
                            vpn,
                            section.name(),
                            offset,
                            e
                        );
                        corrupt
                    })?;
                self.stats.section_loads += 1;
            }
            None => {
                cpu.with_frame_mut(ppn, |frame| frame.fill(0));
                self.stats.zero_fills += 1;
            }
        }
        Ok(())
    }

    /// 换出一个页帧并归还给空闲池
    ///
    /// 脏页写回它的交换槽（没有则新分配）；写回失败时牺牲者保持原样。
    fn evict(&mut self, cpu: &Processor) -> VmResult<()> {
        let slots = policy::snapshot(&cpu.tlb_snapshot());
        let ipt = &self.ipt;
        let victim = choose_victim(&slots, |ppn| ipt.occupant(ppn).is_some())
            .or_else(|| ipt.fallback_victim())
            .ok_or(VmError::FrameExhausted)?;

        self.invalidate_frame(cpu, victim);
        let info = *self.ipt.frame(victim);
        let Some(key) = info.occupant else {
            return Err(VmError::FrameExhausted);
        };
        let space = self.spaces.get_mut(&key.pid).ok_or(VmError::CorruptAddressSpace {
            pid: key.pid,
            vpn: key.vpn,
        })?;

        if info.dirty {
            let existing = space.swap_slot(key.vpn);
            let slot = existing.unwrap_or_else(|| self.swap.allocate_slot(key));
            let mut page = vec![0u8; PAGE_SIZE];
            cpu.read_frame(victim, &mut page);
            if let Err(e) = self.swap.write_page(slot, &page) {
                if existing.is_none() {
                    self.swap.free_slot(slot);
                }
                warn!("[fault] write-back of {:?} failed: {}", key, e);
                return Err(e);
            }
            space.record_swap(key.vpn, slot);
            self.stats.swap_outs += 1;
        }

        space.unbind(key.vpn);
        self.ipt.unbind(key);
        self.frames.release(victim);
        self.stats.evictions += 1;
        debug!(
            "[fault] evicted {} {:?} from {:?}{}",
            key.pid,
            key.vpn,
            victim,
            if info.dirty { " (written back)" } else { "" }
        );
        Ok(())
    }

    /// 把翻译写入一个TLB槽，被覆盖的有效表项先归并访问位
    fn install_translation(&mut self, cpu: &Processor, vpn: VirtPageNum, ppn: PhysPageNum, read_only: bool) {
        let ipt = &mut self.ipt;
        let index = cpu.update_tlb(|tlb| {
            let index = choose_install_slot(&policy::snapshot(tlb));
            if let Some(old) = tlb[index].filter(|e| e.is_valid()) {
                fold_bits(ipt, &old);
            }
            tlb[index] = Some(TranslationEntry::new(vpn, ppn, read_only));
            index
        });
        trace!("[tlb] slot {} <- {:?} -> {:?}", index, vpn, ppn);
    }
}
