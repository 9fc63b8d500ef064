//! Trap handling functionality
//!
//! 访存异常的分发：TLB缺失交给缺页处理，写只读页则判定为保护违例。
//! 调用者持有全局内存锁，出错地址从BadVAddr寄存器读取。

use log::{trace, warn};

use crate::error::{VmError, VmResult};
use crate::machine::{Exception, Processor};
use crate::mm::{MemoryManagerInner, Pid, VirtAddr};

/// 处理`pid`触发的异常；返回Ok时出错的访存可以重试
pub(crate) fn trap_handler(
    mm: &mut MemoryManagerInner,
    cpu: &Processor,
    pid: Pid,
    cause: Exception,
) -> VmResult<()> {
    let vaddr = cpu.bad_vaddr();
    match cause {
        Exception::TlbMiss => {
            trace!("[trap] {} tlb miss at {:#x}", pid, vaddr);
            mm.resolve(cpu, pid, vaddr)
        }
        Exception::ReadOnly => {
            let vpn = VirtAddr(vaddr).floor();
            warn!("[trap] {} wrote read-only page {:?}", pid, vpn);
            Err(VmError::ProtectionViolation { pid, vpn })
        }
    }
}
