//! 交换区
//!
//! 无文件头的页槽序列，槽号`s`位于文件偏移`s * PAGE_SIZE`处；
//! 槽的占用情况只保存在内存中。

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::trace;

use super::PageKey;
use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};

/// 按整页随机读写的后备存储
pub trait PageFile: Send {
    fn read_page_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
    fn write_page_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;
}

impl PageFile for File {
    fn read_page_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }

    fn write_page_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(data)
    }
}

pub struct SwapStore {
    file: Box<dyn PageFile>,
    /// 下标即槽号，None 为空闲
    occupants: Vec<Option<PageKey>>,
    free: BTreeSet<usize>,
}

impl SwapStore {
    pub fn new(file: Box<dyn PageFile>) -> Self {
        Self {
            file,
            occupants: Vec::new(),
            free: BTreeSet::new(),
        }
    }

    /// 创建（或截断）指定路径的交换文件
    pub fn open(path: &Path) -> VmResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// 使用匿名临时文件，进程结束后自动删除
    pub fn anonymous() -> VmResult<Self> {
        Ok(Self::new(Box::new(tempfile::tempfile()?)))
    }

    /// 分配编号最小的空闲槽，没有空闲槽时扩展文件
    pub fn allocate_slot(&mut self, owner: PageKey) -> usize {
        let slot = match self.free.pop_first() {
            Some(slot) => slot,
            None => {
                self.occupants.push(None);
                self.occupants.len() - 1
            }
        };
        self.occupants[slot] = Some(owner);
        trace!("[swap] slot {} -> {:?}", slot, owner);
        slot
    }

    /// 标记为可复用，内容不清除
    pub fn free_slot(&mut self, slot: usize) {
        let occupant = self.occupants.get_mut(slot).and_then(Option::take);
        assert!(occupant.is_some(), "swap slot {} is not allocated", slot);
        self.free.insert(slot);
    }

    pub fn occupant(&self, slot: usize) -> Option<PageKey> {
        self.occupants.get(slot).copied().flatten()
    }

    pub fn slots_in_use(&self) -> usize {
        self.occupants.len() - self.free.len()
    }

    pub fn write_page(&mut self, slot: usize, data: &[u8]) -> VmResult<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        self.file
            .write_page_at(Self::offset(slot), data)
            .map_err(|source| VmError::SwapIo { slot, source })
    }

    pub fn read_page(&mut self, slot: usize, buf: &mut [u8]) -> VmResult<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        self.file
            .read_page_at(Self::offset(slot), buf)
            .map_err(|source| VmError::SwapIo { slot, source })
    }

    fn offset(slot: usize) -> u64 {
        (slot * PAGE_SIZE) as u64
    }
}
