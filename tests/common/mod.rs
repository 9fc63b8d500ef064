#![allow(dead_code)]

use std::io;
use std::sync::Arc;

use vmkernel::config::PAGE_SIZE;
use vmkernel::loader::{Executable, Section};
use vmkernel::machine::Processor;
use vmkernel::mm::{AddressSpace, MemoryManager, PageFile, Pid, SwapStore};

pub fn memory(frames: usize) -> Arc<MemoryManager> {
    memory_with_swap(frames, SwapStore::anonymous().unwrap())
}

pub fn memory_with_swap(frames: usize, swap: SwapStore) -> Arc<MemoryManager> {
    Arc::new(MemoryManager::new(Arc::new(Processor::new(frames, 4)), swap))
}

/// 只有匿名页的地址空间
pub fn anonymous(mm: &MemoryManager, pid: Pid, pages: usize) {
    mm.register(AddressSpace::new(pid, &Executable::empty(), pages).unwrap());
}

pub fn with_sections(mm: &MemoryManager, pid: Pid, sections: Vec<Arc<dyn Section>>, extra: usize) {
    let exe = Executable::new(sections, 0);
    mm.register(AddressSpace::new(pid, &exe, extra).unwrap());
}

pub fn page(vpn: usize) -> usize {
    vpn * PAGE_SIZE
}

pub fn read_byte(mm: &MemoryManager, pid: Pid, vaddr: usize) -> u8 {
    let mut byte = [0u8; 1];
    assert_eq!(mm.read_virtual_memory(pid, vaddr, &mut byte).unwrap(), 1);
    byte[0]
}

pub fn fill_page(mm: &MemoryManager, pid: Pid, vpn: usize, value: u8) {
    let data = vec![value; PAGE_SIZE];
    assert_eq!(mm.write_virtual_memory(pid, page(vpn), &data).unwrap(), PAGE_SIZE);
}

/// 读写都失败的交换设备
pub struct BrokenDisk;

impl PageFile for BrokenDisk {
    fn read_page_at(&mut self, _offset: u64, _buf: &mut [u8]) -> io::Result<()> {
        Err(io::Error::other("swap device gone"))
    }
    fn write_page_at(&mut self, _offset: u64, _data: &[u8]) -> io::Result<()> {
        Err(io::Error::other("swap device gone"))
    }
}
