//! TaskManager任务管理器实现
//!
//! 任务管理工作：1. 分配pid并创建进程 2. 登记运行中的进程 3. 等待进程退出
//! 所有进程共享同一个模拟处理器和同一个内存管理器。

mod pager;
mod process;

use std::collections::BTreeMap;
use std::sync::Arc;

use log::info;

use crate::config::{KernelConfig, PagingPolicy};
use crate::error::VmResult;
use crate::loader::Executable;
use crate::machine::Processor;
use crate::mm::{MemoryManager, Pid, SwapStore};
use crate::sync::UPSafeCell;

pub use self::pager::{pager_for, DemandPager, EagerPager, Pager};
pub use self::process::{arguments_size, Process, ProcessStatus, KILLED_EXIT_CODE};

/// 任务管理器
pub struct TaskManager {
    config: KernelConfig,
    mm: Arc<MemoryManager>,
    inner: UPSafeCell<TaskManagerInner>,
}

/// 任务管理器内部
struct TaskManagerInner {
    /// 下一个可用的pid
    next_pid: usize,
    /// 尚未被join的进程
    processes: BTreeMap<Pid, Arc<Process>>,
}

impl TaskManager {
    /// 按配置创建处理器、交换区和内存管理器
    pub fn boot(config: KernelConfig) -> VmResult<Self> {
        let machine = Arc::new(Processor::new(config.phys_pages, config.tlb_size));
        let swap = match &config.swap_path {
            Some(path) => SwapStore::open(path)?,
            None => SwapStore::anonymous()?,
        };
        info!(
            "[kernel] boot: {} frames, {} tlb slots, {} stack pages, {} paging, swap {}",
            config.phys_pages,
            config.tlb_size,
            config.stack_pages,
            config.policy,
            config
                .swap_path
                .as_ref()
                .map_or_else(|| "<anonymous>".to_string(), |p| p.display().to_string())
        );
        let mm = Arc::new(MemoryManager::new(machine, swap));
        Ok(Self::with_memory(config, mm))
    }

    /// 使用已有的内存管理器
    pub fn with_memory(config: KernelConfig, mm: Arc<MemoryManager>) -> Self {
        Self {
            config,
            mm,
            inner: UPSafeCell::new(TaskManagerInner {
                next_pid: 1,
                processes: BTreeMap::new(),
            }),
        }
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.mm
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// 以默认调页策略创建进程
    pub fn spawn(&self, exe: &Executable, args: &[&str]) -> VmResult<Arc<Process>> {
        self.spawn_with(exe, args, self.config.policy)
    }

    pub fn spawn_with(
        &self,
        exe: &Executable,
        args: &[&str],
        policy: PagingPolicy,
    ) -> VmResult<Arc<Process>> {
        let pid = self.alloc_pid();
        let process = Process::exec(pid, self.mm.clone(), exe, args, self.config.stack_pages, policy)?;
        self.inner
            .exclusive_access()
            .processes
            .insert(pid, process.clone());
        Ok(process)
    }

    fn alloc_pid(&self) -> Pid {
        let mut inner = self.inner.exclusive_access();
        let pid = Pid(inner.next_pid);
        inner.next_pid += 1;
        pid
    }

    pub fn process(&self, pid: Pid) -> Option<Arc<Process>> {
        self.inner.exclusive_access().processes.get(&pid).cloned()
    }

    /// 尚未被join的进程
    pub fn pids(&self) -> Vec<Pid> {
        self.inner.exclusive_access().processes.keys().copied().collect()
    }

    /// 等待进程退出并把它移出进程表；pid未知时返回None
    pub fn join(&self, pid: Pid) -> Option<i32> {
        let process = self.process(pid)?;
        let code = process.join();
        self.inner.exclusive_access().processes.remove(&pid);
        Some(code)
    }

    /// 终止所有仍在运行的进程
    pub fn shutdown(&self) {
        let processes: Vec<_> = self.inner.exclusive_access().processes.values().cloned().collect();
        for process in processes {
            process.exit(KILLED_EXIT_CODE);
        }
        info!("[kernel] shutdown, {} frames free", self.mm.free_frames());
    }
}
