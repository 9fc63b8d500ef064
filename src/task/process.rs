//! 进程控制块

use std::sync::Arc;

use log::{info, warn};

use super::pager::{pager_for, Pager};
use crate::config::{PagingPolicy, ARGUMENT_PAGES, PAGE_SIZE};
use crate::error::{VmError, VmResult};
use crate::loader::Executable;
use crate::mm::{AddressSpace, MemoryManager, Pid};
use crate::sync::{Condition, Lock};

/// 进程状态
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    /// 运行态
    Running,
    /// 退出态，带退出码
    Exited(i32),
}

/// 因致命错误被终止时使用的退出码
pub const KILLED_EXIT_CODE: i32 = -1;

pub struct Process {
    pid: Pid,
    mm: Arc<MemoryManager>,
    pager: Box<dyn Pager>,
    entry_point: usize,
    /// 参数页起点，也是初始栈顶
    initial_sp: usize,
    argc: usize,
    argv: usize,
    status: Lock<ProcessStatus>,
    exited: Condition,
}

/// argv 在参数页中占用的字节数：每个参数一个4字节指针加上带NUL的字符串
pub fn arguments_size(args: &[&str]) -> usize {
    args.iter().map(|arg| 4 + arg.len() + 1).sum()
}

impl Process {
    /// 建立地址空间并写入参数
    ///
    /// 布局：映像各页，随后`stack_pages`个栈页，最后一页放argv。
    pub fn exec(
        pid: Pid,
        mm: Arc<MemoryManager>,
        exe: &Executable,
        args: &[&str],
        stack_pages: usize,
        policy: PagingPolicy,
    ) -> VmResult<Arc<Self>> {
        let args_size = arguments_size(args);
        if args_size > PAGE_SIZE {
            return Err(VmError::ArgumentsTooLong(args_size));
        }
        let space = AddressSpace::new(pid, exe, stack_pages.saturating_add(ARGUMENT_PAGES))?;
        let num_pages = space.num_pages();
        let argv = (num_pages - ARGUMENT_PAGES) * PAGE_SIZE;
        mm.register(space);

        let pager = pager_for(policy);
        if let Err(e) = pager
            .load_sections(&mm, pid)
            .and_then(|_| Self::write_arguments(&mm, pid, argv, args))
        {
            warn!("[task] {} failed to start: {}", pid, e);
            mm.release(pid)?;
            return Err(e);
        }
        info!(
            "[task] {} created: {} pages, {} paging, {} args",
            pid,
            num_pages,
            policy,
            args.len()
        );
        Ok(Arc::new(Self {
            pid,
            mm,
            pager,
            entry_point: exe.entry_point,
            initial_sp: argv,
            argc: args.len(),
            argv,
            status: Lock::new(ProcessStatus::Running),
            exited: Condition::new(),
        }))
    }

    /// 指针表在前，字符串紧随其后
    fn write_arguments(mm: &MemoryManager, pid: Pid, argv: usize, args: &[&str]) -> VmResult<()> {
        let mut entry_offset = argv;
        let mut string_offset = argv + args.len() * 4;
        for arg in args {
            let pointer = (string_offset as u32).to_le_bytes();
            let mut bytes = arg.as_bytes().to_vec();
            bytes.push(0);
            let written = mm.write_virtual_memory(pid, entry_offset, &pointer)?
                + mm.write_virtual_memory(pid, string_offset, &bytes)?;
            if written != pointer.len() + bytes.len() {
                return Err(VmError::InvalidAddress(string_offset));
            }
            entry_offset += 4;
            string_offset += bytes.len();
        }
        Ok(())
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }
    pub fn entry_point(&self) -> usize {
        self.entry_point
    }
    pub fn initial_sp(&self) -> usize {
        self.initial_sp
    }
    pub fn argc(&self) -> usize {
        self.argc
    }
    pub fn argv(&self) -> usize {
        self.argv
    }
    pub fn policy(&self) -> PagingPolicy {
        self.pager.policy()
    }
    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.mm
    }

    pub fn status(&self) -> ProcessStatus {
        *self.status.acquire()
    }

    pub fn read_memory(&self, vaddr: usize, buf: &mut [u8]) -> VmResult<usize> {
        let result = self.mm.read_virtual_memory(self.pid, vaddr, buf);
        self.check(result)
    }

    pub fn write_memory(&self, vaddr: usize, data: &[u8]) -> VmResult<usize> {
        let result = self.mm.write_virtual_memory(self.pid, vaddr, data);
        self.check(result)
    }

    pub fn read_string(&self, vaddr: usize, max_len: usize) -> VmResult<Option<String>> {
        let result = self.mm.read_virtual_memory_string(self.pid, vaddr, max_len);
        self.check(result)
    }

    /// 读出第`index`个命令行参数
    pub fn argument(&self, index: usize) -> VmResult<Option<String>> {
        if index >= self.argc {
            return Ok(None);
        }
        let mut pointer = [0u8; 4];
        if self.read_memory(self.argv + index * 4, &mut pointer)? != pointer.len() {
            return Ok(None);
        }
        self.read_string(u32::from_le_bytes(pointer) as usize, PAGE_SIZE)
    }

    /// 处理`vaddr`处的TLB缺失
    pub fn resolve_fault(&self, vaddr: usize) -> VmResult<()> {
        let result = self.pager.resolve_fault(&self.mm, self.pid, vaddr);
        self.check(result)
    }

    /// 致命错误终止进程，其他错误原样返回
    fn check<T>(&self, result: VmResult<T>) -> VmResult<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!("[task] {} killed: {}", self.pid, e);
                self.exit(KILLED_EXIT_CODE);
            }
        }
        result
    }

    /// 释放全部页帧与交换槽后唤醒等待者；重复调用无效果
    pub fn exit(&self, code: i32) {
        let mut status = self.status.acquire();
        if let ProcessStatus::Exited(_) = *status {
            return;
        }
        match self.pager.unload_sections(&self.mm, self.pid) {
            Ok(reclaimed) => info!(
                "[task] {} exited with code {}, reclaimed {} frames and {} swap slots",
                self.pid, code, reclaimed.frames, reclaimed.swap_slots
            ),
            Err(e) => warn!("[task] {} exit: {}", self.pid, e),
        }
        *status = ProcessStatus::Exited(code);
        self.exited.wake_all(&status);
    }

    /// 阻塞直到进程退出，返回退出码
    pub fn join(&self) -> i32 {
        let mut status = self.status.acquire();
        loop {
            let current = *status;
            match current {
                ProcessStatus::Exited(code) => return code,
                ProcessStatus::Running => self.exited.sleep(&mut status),
            }
        }
    }
}
