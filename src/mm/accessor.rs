//! 在内核缓冲区与进程虚拟内存之间搬运字节
//!
//! 访问范围被截断到`[0, bound)`；起始地址越界时传输0字节。
//! 逐页经由TLB翻译，缺失时进入trap处理后重试，每页最多传输`PAGE_SIZE - offset`字节。

use core::ops::Range;

use super::{MemoryManager, Pid, PhysAddr, VirtAddr};
use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};
use crate::trap::trap_handler;

impl MemoryManager {
    /// 从`vaddr`开始读取最多`buf.len()`字节，返回实际读取的字节数
    pub fn read_virtual_memory(&self, pid: Pid, vaddr: usize, buf: &mut [u8]) -> VmResult<usize> {
        let cpu = &*self.machine;
        self.transfer(pid, vaddr, buf.len(), false, |pa, range| {
            cpu.read_memory(pa, &mut buf[range]);
        })
    }

    /// 向`vaddr`开始写入最多`data.len()`字节，返回实际写入的字节数
    pub fn write_virtual_memory(&self, pid: Pid, vaddr: usize, data: &[u8]) -> VmResult<usize> {
        let cpu = &*self.machine;
        self.transfer(pid, vaddr, data.len(), true, |pa, range| {
            cpu.write_memory(pa, &data[range]);
        })
    }

    /// 读取以NUL结尾的字符串，最多读`max_len + 1`字节；找不到NUL时返回None
    pub fn read_virtual_memory_string(
        &self,
        pid: Pid,
        vaddr: usize,
        max_len: usize,
    ) -> VmResult<Option<String>> {
        let bound = self.address_bound(pid).ok_or(VmError::UnknownProcess(pid))?;
        // 先截断到地址空间内再分配缓冲区
        let want = max_len.saturating_add(1).min(bound.saturating_sub(vaddr));
        let mut bytes = vec![0u8; want];
        let read = self.read_virtual_memory(pid, vaddr, &mut bytes)?;
        Ok(bytes[..read]
            .iter()
            .position(|&b| b == 0)
            .map(|nul| String::from_utf8_lossy(&bytes[..nul]).into_owned()))
    }

    /// 逐页翻译并调用`copy(物理地址, 缓冲区区间)`
    fn transfer(
        &self,
        pid: Pid,
        vaddr: usize,
        len: usize,
        write: bool,
        mut copy: impl FnMut(PhysAddr, Range<usize>),
    ) -> VmResult<usize> {
        let cpu = &*self.machine;
        let mut inner = self.inner.acquire();
        let bound = inner
            .spaces
            .get(&pid)
            .ok_or(VmError::UnknownProcess(pid))?
            .bound();
        if vaddr >= bound {
            return Ok(0);
        }
        let amount = len.min(bound - vaddr);
        inner.switch_to(cpu, pid);

        let mut done = 0;
        while done < amount {
            let va = vaddr + done;
            let chunk = (PAGE_SIZE - VirtAddr(va).page_offset()).min(amount - done);
            let pa = loop {
                match cpu.translate(va, write) {
                    Ok(pa) => break pa,
                    Err(cause) => trap_handler(&mut inner, cpu, pid, cause)?,
                }
            };
            copy(pa, done..done + chunk);
            done += chunk;
        }
        Ok(done)
    }
}
