//! 按需调页的虚拟内存管理器
//!
//! 在模拟的单处理器机器上运行：TLB缺失由缺页处理解决，页面从可执行映像、
//! 交换区或清零页中装入，物理内存不足时换出页帧。
//!
//! - [`machine`]：模拟的处理器、TLB与物理内存
//! - [`mm`]：帧分配、反置页表、交换区、地址空间、缺页处理与虚存访问
//! - [`task`]：进程的创建、参数布局、退出与等待
//! - [`loader`]：可执行映像与段

pub mod config;
pub mod error;
pub mod loader;
pub mod logging;
pub mod machine;
pub mod mm;
pub mod sync;
pub mod task;
mod trap;

pub use crate::error::{VmError, VmResult};
