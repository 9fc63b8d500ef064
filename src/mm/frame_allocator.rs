//! 实现FrameAllocator
//! 管理模拟机器上的全部物理页帧，空闲页帧池由全局内存锁保护

use super::PhysPageNum;
use crate::error::{VmError, VmResult};

pub trait FrameAllocator {
    fn new() -> Self;
    fn alloc(&mut self) -> Option<PhysPageNum>;
    fn dealloc(&mut self, ppn: PhysPageNum);
}

/// an implementation for frame allocator
pub struct StackFrameAllocator {
    current: usize,       // 从未分配过的空闲帧起点
    end: usize,           // 空闲帧的结束页号
    recycled: Vec<usize>, // 回收站
}

impl StackFrameAllocator {
    pub fn init(&mut self, l: PhysPageNum, r: PhysPageNum) {
        self.current = l.0;
        self.end = r.0;
        self.recycled.clear();
    }

    /// 分配一个物理页帧，池空时返回FrameExhausted，由调用者先行换出
    pub fn acquire(&mut self) -> VmResult<PhysPageNum> {
        self.alloc().ok_or(VmError::FrameExhausted)
    }

    /// 归还页帧，调用者需保证该帧已没有占用者
    pub fn release(&mut self, ppn: PhysPageNum) {
        self.dealloc(ppn);
    }

    /// 空闲帧数量
    pub fn free_count(&self) -> usize {
        self.end - self.current + self.recycled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free_count() == 0
    }

    pub fn is_free(&self, ppn: PhysPageNum) -> bool {
        ppn.0 >= self.current && ppn.0 < self.end || self.recycled.contains(&ppn.0)
    }
}

impl FrameAllocator for StackFrameAllocator {
    fn new() -> Self {
        Self {
            current: 0,
            end: 0,
            recycled: Vec::new(),
        }
    }
    fn alloc(&mut self) -> Option<PhysPageNum> {
        // 优先弹出回收站的帧以供分配
        if let Some(ppn) = self.recycled.pop() {
            Some(ppn.into())
        } else if self.current == self.end {
            None
        } else {
            self.current += 1;
            Some((self.current - 1).into())
        }
    }
    fn dealloc(&mut self, ppn: PhysPageNum) {
        let ppn = ppn.0;
        // validity check
        if ppn >= self.current || self.recycled.iter().any(|&v| v == ppn) {
            panic!("Frame ppn={:#x} has not been allocated!", ppn);
        }
        // recycle
        self.recycled.push(ppn);
    }
}
