//! 虚拟内存子系统的错误类型

use std::io;

use thiserror::Error;

use crate::mm::{Pid, VirtPageNum};

/// Result alias used across the crate.
pub type VmResult<T> = Result<T, VmError>;

/// Errors raised while resolving faults or moving bytes.
#[derive(Debug, Error)]
pub enum VmError {
    /// 空闲页帧耗尽，只在缺页处理内部出现，由换出解决
    #[error("physical frames exhausted")]
    FrameExhausted,
    /// 交换文件读写失败
    #[error("swap slot {slot} i/o failed")]
    SwapIo {
        /// 出错的交换槽
        slot: usize,
        #[source]
        source: io::Error,
    },
    /// 写只读页
    #[error("process {pid} wrote read-only page {vpn:?}")]
    ProtectionViolation {
        /// 违规进程
        pid: Pid,
        /// 只读页
        vpn: VirtPageNum,
    },
    /// 地址越界
    #[error("virtual address {0:#x} is outside the address space")]
    InvalidAddress(usize),
    /// 页面既不驻留、也不在交换区、也没有可用的段映射
    #[error("process {pid} page {vpn:?} has no usable backing")]
    CorruptAddressSpace {
        /// 出错的进程
        pid: Pid,
        /// 出错的页
        vpn: VirtPageNum,
    },
    /// 进程没有登记地址空间
    #[error("no address space registered for process {0}")]
    UnknownProcess(Pid),
    /// 预先装入时物理内存不足
    #[error("insufficient physical memory: need {need} frames, {free} free")]
    InsufficientMemory {
        /// 需要的页帧数
        need: usize,
        /// 当前空闲的页帧数
        free: usize,
    },
    /// 可执行文件格式错误
    #[error("bad executable: {0}")]
    BadExecutable(&'static str),
    /// 参数超过一页
    #[error("arguments need {0} bytes, more than one page")]
    ArgumentsTooLong(usize),
    /// 其他I/O错误
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl VmError {
    /// 是否必须终止出错的进程
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SwapIo { .. } | Self::ProtectionViolation { .. } | Self::CorruptAddressSpace { .. }
        )
    }
}
