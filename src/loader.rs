//! # loader模块职责
//! - 定义可执行映像中"段"的抽象：起始虚拟页、页数、是否只读、按页装入
//! - 提供内存中的段[`MemorySection`]，以及从ELF文件解析出的可执行映像[`Executable`]
//!
//! 缺页时只会调用[`Section::load_page`]装入单独一页，整段数据从不一次性拷贝进物理内存。

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;
use xmas_elf::program::Type;
use xmas_elf::ElfFile;

use crate::config::{MAX_ADDRESS_SPACE_PAGES, PAGE_SIZE};
use crate::error::{VmError, VmResult};
use crate::mm::{VPNRange, VirtAddr, VirtPageNum};

/// 可执行映像中的一个段
pub trait Section: Send + Sync {
    fn name(&self) -> &str;
    fn first_vpn(&self) -> VirtPageNum;
    fn num_pages(&self) -> usize;
    fn is_read_only(&self) -> bool;
    /// 把段内第`index`页写入`frame`（恰好一页）
    fn load_page(&self, index: usize, frame: &mut [u8]) -> VmResult<()>;

    fn vpn_range(&self) -> VPNRange {
        let start = self.first_vpn();
        VPNRange::new(start, VirtPageNum(start.0.saturating_add(self.num_pages())))
    }
}

impl fmt::Debug for dyn Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("name", &self.name())
            .field("first_vpn", &self.first_vpn())
            .field("num_pages", &self.num_pages())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

/// 内容保存在内存中的段，超出数据长度的部分按零填充
pub struct MemorySection {
    name: String,
    first_vpn: VirtPageNum,
    num_pages: usize,
    read_only: bool,
    data: Vec<u8>,
    loads: AtomicUsize,
}

impl MemorySection {
    pub fn new(
        name: impl Into<String>,
        first_vpn: VirtPageNum,
        num_pages: usize,
        read_only: bool,
        data: Vec<u8>,
    ) -> Self {
        assert!(
            data.len() <= num_pages * PAGE_SIZE,
            "section data ({} bytes) exceeds {} pages",
            data.len(),
            num_pages
        );
        Self {
            name: name.into(),
            first_vpn,
            num_pages,
            read_only,
            data,
            loads: AtomicUsize::new(0),
        }
    }

    /// 按数据长度向上取整得到页数
    pub fn from_bytes(
        name: impl Into<String>,
        first_vpn: VirtPageNum,
        read_only: bool,
        data: Vec<u8>,
    ) -> Self {
        let num_pages = VirtAddr(data.len()).ceil().0;
        Self::new(name, first_vpn, num_pages, read_only, data)
    }

    /// 迄今为止装入过多少次页面
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

impl Section for MemorySection {
    fn name(&self) -> &str {
        &self.name
    }
    fn first_vpn(&self) -> VirtPageNum {
        self.first_vpn
    }
    fn num_pages(&self) -> usize {
        self.num_pages
    }
    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn load_page(&self, index: usize, frame: &mut [u8]) -> VmResult<()> {
        if index >= self.num_pages {
            return Err(VmError::BadExecutable("section page index out of range"));
        }
        frame.fill(0);
        let start = index * PAGE_SIZE;
        if start < self.data.len() {
            let end = (start + PAGE_SIZE).min(self.data.len());
            frame[..end - start].copy_from_slice(&self.data[start..end]);
        }
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// 一个可执行映像：若干段和入口地址
#[derive(Clone, Debug)]
pub struct Executable {
    pub sections: Vec<Arc<dyn Section>>,
    pub entry_point: usize,
}

impl Executable {
    pub fn new(sections: Vec<Arc<dyn Section>>, entry_point: usize) -> Self {
        Self {
            sections,
            entry_point,
        }
    }

    /// 没有任何段的映像，地址空间只有栈和参数页
    pub fn empty() -> Self {
        Self::new(Vec::new(), 0)
    }

    /// 映像占据的页数：从0号页到最高段的末尾
    pub fn num_pages(&self) -> usize {
        self.sections
            .iter()
            .map(|s| s.first_vpn().0.saturating_add(s.num_pages()))
            .max()
            .unwrap_or(0)
    }

    /// 解析ELF文件，每个LOAD段成为一个[`MemorySection`]，不可写的段只读
    pub fn from_elf(elf_data: &[u8]) -> VmResult<Self> {
        let elf = ElfFile::new(elf_data).map_err(VmError::BadExecutable)?;
        let magic = elf.header.pt1.magic;
        if magic != [0x7f, 0x45, 0x4c, 0x46] {
            return Err(VmError::BadExecutable("invalid elf magic"));
        }
        let mut sections: Vec<Arc<dyn Section>> = Vec::new();
        for (i, ph) in elf.program_iter().enumerate() {
            if ph.get_type().map_err(VmError::BadExecutable)? != Type::Load {
                continue;
            }
            let start_va = VirtAddr(header_value(ph.virtual_addr())?);
            let mem_size = header_value(ph.mem_size())?;
            let end_va = start_va
                .0
                .checked_add(mem_size)
                .map(VirtAddr)
                .ok_or(VmError::BadExecutable("segment address overflows"))?;
            let first_vpn = start_va.floor();
            if end_va.ceil().0 > MAX_ADDRESS_SPACE_PAGES {
                return Err(VmError::BadExecutable("image too large"));
            }
            let num_pages = end_va.ceil().0 - first_vpn.0;

            let offset = header_value(ph.offset())?;
            let file_size = header_value(ph.file_size())?;
            if file_size > mem_size {
                return Err(VmError::BadExecutable("segment file size exceeds memory size"));
            }
            let bytes = offset
                .checked_add(file_size)
                .and_then(|end| elf_data.get(offset..end))
                .ok_or(VmError::BadExecutable("segment lies outside the file"))?;
            // 段的起点不一定页对齐，页内偏移之前补零
            let mut data = vec![0u8; start_va.page_offset()];
            data.extend_from_slice(bytes);

            let read_only = !ph.flags().is_write();
            debug!(
                "[loader] segment {}: {:?} x{} pages, read_only={}",
                i, first_vpn, num_pages, read_only
            );
            sections.push(Arc::new(MemorySection::new(
                format!("segment{}", i),
                first_vpn,
                num_pages,
                read_only,
                data,
            )));
        }
        Ok(Self::new(sections, elf.header.pt2.entry_point() as usize))
    }
}

/// 程序头中的64位数值转换为本机地址
fn header_value(value: u64) -> VmResult<usize> {
    usize::try_from(value).map_err(|_| VmError::BadExecutable("segment address overflows"))
}

/// 测试用的最小ELF：一个LOAD段
#[cfg(test)]
pub(crate) fn tiny_elf(vaddr: u64, payload: &[u8], mem_size: u64, writable: bool) -> Vec<u8> {
    const DATA_OFFSET: u64 = 64 + 56;
    let mut elf = Vec::new();
    elf.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    elf.extend_from_slice(&[0; 8]);
    elf.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    elf.extend_from_slice(&0xf3u16.to_le_bytes()); // RISC-V
    elf.extend_from_slice(&1u32.to_le_bytes());
    elf.extend_from_slice(&vaddr.to_le_bytes()); // entry
    elf.extend_from_slice(&64u64.to_le_bytes()); // phoff
    elf.extend_from_slice(&0u64.to_le_bytes()); // shoff
    elf.extend_from_slice(&0u32.to_le_bytes());
    elf.extend_from_slice(&64u16.to_le_bytes());
    elf.extend_from_slice(&56u16.to_le_bytes());
    elf.extend_from_slice(&1u16.to_le_bytes());
    elf.extend_from_slice(&64u16.to_le_bytes());
    elf.extend_from_slice(&0u16.to_le_bytes());
    elf.extend_from_slice(&0u16.to_le_bytes());
    assert_eq!(elf.len(), 64);

    let flags: u32 = if writable { 0x6 } else { 0x5 };
    elf.extend_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    elf.extend_from_slice(&flags.to_le_bytes());
    elf.extend_from_slice(&DATA_OFFSET.to_le_bytes());
    elf.extend_from_slice(&vaddr.to_le_bytes());
    elf.extend_from_slice(&vaddr.to_le_bytes());
    elf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    elf.extend_from_slice(&mem_size.to_le_bytes());
    elf.extend_from_slice(&(PAGE_SIZE as u64).to_le_bytes());
    assert_eq!(elf.len() as u64, DATA_OFFSET);

    elf.extend_from_slice(payload);
    elf
}
