//! 调页策略
//!
//! 进程创建时按[`PagingPolicy`]选定一个[`Pager`]：
//! 预先调页在创建时装入全部页面，按需调页只在缺页时装入。
//! 两者退出时的回收与运行中的缺页处理相同。

use log::debug;

use crate::config::PagingPolicy;
use crate::error::VmResult;
use crate::mm::{MemoryManager, Pid, Reclaimed};

pub trait Pager: Send + Sync {
    fn policy(&self) -> PagingPolicy;
    /// 地址空间登记之后调用
    fn load_sections(&self, mm: &MemoryManager, pid: Pid) -> VmResult<()>;
    /// 进程退出时释放页帧和交换槽
    fn unload_sections(&self, mm: &MemoryManager, pid: Pid) -> VmResult<Reclaimed> {
        mm.release(pid)
    }
    /// 处理`vaddr`处的TLB缺失
    fn resolve_fault(&self, mm: &MemoryManager, pid: Pid, vaddr: usize) -> VmResult<()> {
        mm.handle_tlb_miss(pid, vaddr)
    }
}

/// 创建时即把整个地址空间装入物理内存
pub struct EagerPager;

impl Pager for EagerPager {
    fn policy(&self) -> PagingPolicy {
        PagingPolicy::Eager
    }

    fn load_sections(&self, mm: &MemoryManager, pid: Pid) -> VmResult<()> {
        let loaded = mm.populate_all(pid)?;
        debug!("[pager] {} loaded {} pages eagerly", pid, loaded);
        Ok(())
    }
}

/// 所有页面都推迟到第一次访问
pub struct DemandPager;

impl Pager for DemandPager {
    fn policy(&self) -> PagingPolicy {
        PagingPolicy::Demand
    }

    fn load_sections(&self, _mm: &MemoryManager, pid: Pid) -> VmResult<()> {
        debug!("[pager] {} deferred to demand paging", pid);
        Ok(())
    }
}

pub fn pager_for(policy: PagingPolicy) -> Box<dyn Pager> {
    match policy {
        PagingPolicy::Eager => Box::new(EagerPager),
        PagingPolicy::Demand => Box::new(DemandPager),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::VmError;
    use crate::loader::{Executable, MemorySection};
    use crate::machine::Processor;
    use crate::mm::{AddressSpace, PageLocation, SwapStore, VirtPageNum};

    fn memory(frames: usize) -> MemoryManager {
        MemoryManager::new(
            Arc::new(Processor::new(frames, 4)),
            SwapStore::anonymous().unwrap(),
        )
    }

    fn register(mm: &MemoryManager, pid: Pid, pages: usize) {
        let exe = Executable::new(
            vec![Arc::new(MemorySection::new("text", VirtPageNum(0), 1, true, vec![9; 8]))],
            0,
        );
        mm.register(AddressSpace::new(pid, &exe, pages - 1).unwrap());
    }

    #[test]
    fn eager_loads_every_page() {
        let mm = memory(4);
        register(&mm, Pid(1), 3);
        EagerPager.load_sections(&mm, Pid(1)).unwrap();
        assert_eq!(mm.free_frames(), 1);
        for vpn in 0..3 {
            assert!(matches!(
                mm.lookup(Pid(1), VirtPageNum(vpn)),
                Some(PageLocation::Resident(_))
            ));
        }
        assert_eq!(mm.stats().section_loads, 1);
        assert_eq!(mm.stats().zero_fills, 2);
        assert!(mm.check_invariants().is_ok());
    }

    #[test]
    fn eager_refuses_when_memory_is_short() {
        let mm = memory(2);
        register(&mm, Pid(1), 3);
        let err = EagerPager.load_sections(&mm, Pid(1)).unwrap_err();
        assert!(matches!(err, VmError::InsufficientMemory { need: 3, free: 2 }));
        assert_eq!(mm.free_frames(), 2);
    }

    #[test]
    fn eager_load_fits_beside_resident_pages_without_evicting() {
        let mm = memory(4);
        mm.register(AddressSpace::new(Pid(2), &Executable::empty(), 1).unwrap());
        DemandPager.resolve_fault(&mm, Pid(2), 0).unwrap();
        register(&mm, Pid(1), 3);

        EagerPager.load_sections(&mm, Pid(1)).unwrap();
        assert_eq!(mm.free_frames(), 0);
        assert_eq!(mm.stats().evictions, 0);
        assert!(matches!(mm.lookup(Pid(2), VirtPageNum(0)), Some(PageLocation::Resident(_))));
        assert_eq!(mm.resident_pages(), 4);

        // 再有一个进程时帧已不够，预先调页直接拒绝而不是换出
        register(&mm, Pid(3), 1);
        assert!(matches!(
            EagerPager.load_sections(&mm, Pid(3)),
            Err(VmError::InsufficientMemory { need: 1, free: 0 })
        ));
        assert_eq!(mm.stats().evictions, 0);
        assert!(mm.check_invariants().is_ok());
    }

    #[test]
    fn eager_load_of_unknown_process_fails() {
        let mm = memory(2);
        assert!(matches!(
            EagerPager.load_sections(&mm, Pid(9)),
            Err(VmError::UnknownProcess(Pid(9)))
        ));
    }

    #[test]
    fn demand_loads_nothing_up_front() {
        let mm = memory(2);
        register(&mm, Pid(1), 3);
        DemandPager.load_sections(&mm, Pid(1)).unwrap();
        assert_eq!(mm.free_frames(), 2);
        DemandPager.resolve_fault(&mm, Pid(1), 5).unwrap();
        assert_eq!(mm.free_frames(), 1);
        let reclaimed = DemandPager.unload_sections(&mm, Pid(1)).unwrap();
        assert_eq!(reclaimed.frames, 1);
        assert_eq!(mm.free_frames(), 2);
    }

    #[test]
    fn policy_selects_pager() {
        assert_eq!(pager_for(PagingPolicy::Eager).policy(), PagingPolicy::Eager);
        assert_eq!(pager_for(PagingPolicy::Demand).policy(), PagingPolicy::Demand);
    }
}
