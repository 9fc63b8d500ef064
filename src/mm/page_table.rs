//! Implementation of the inverted page table.
//!
//! 全局一张表，以 (进程, 虚拟页号) 为键找到驻留页所在的物理页帧；
//! 同时维护按物理页号索引的页帧占用表。两张表互为逆映射：
//! 页帧F的占用者是(p,v)，当且仅当反置页表把(p,v)映射到F。

use std::collections::HashMap;
use std::fmt;

use super::{PhysPageNum, VirtPageNum};

/// 进程标识
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub usize);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

/// (进程, 虚拟页号) 二元组，直接作为哈希表的键
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub pid: Pid,
    pub vpn: VirtPageNum,
}

impl PageKey {
    pub fn new(pid: Pid, vpn: VirtPageNum) -> Self {
        Self { pid, vpn }
    }
}

/// 物理页帧的元数据
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameInfo {
    pub occupant: Option<PageKey>,
    /// 自装入以来被写过
    pub dirty: bool,
    /// 自装入以来被访问过
    pub referenced: bool,
}

pub struct InvertedPageTable {
    map: HashMap<PageKey, PhysPageNum>,
    frames: Vec<FrameInfo>,
}

impl InvertedPageTable {
    pub fn new(num_frames: usize) -> Self {
        Self {
            map: HashMap::new(),
            frames: vec![FrameInfo::default(); num_frames],
        }
    }

    pub fn lookup(&self, key: PageKey) -> Option<PhysPageNum> {
        self.map.get(&key).copied()
    }

    pub fn occupant(&self, ppn: PhysPageNum) -> Option<PageKey> {
        self.frames.get(ppn.0).and_then(|info| info.occupant)
    }

    pub fn frame(&self, ppn: PhysPageNum) -> &FrameInfo {
        &self.frames[ppn.0]
    }

    pub fn frame_mut(&mut self, ppn: PhysPageNum) -> &mut FrameInfo {
        &mut self.frames[ppn.0]
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn resident_count(&self) -> usize {
        self.map.len()
    }

    /// 建立 key -> ppn 映射，新装入的页帧是干净且未被访问的
    pub fn bind(&mut self, key: PageKey, ppn: PhysPageNum) {
        let info = &mut self.frames[ppn.0];
        assert!(
            info.occupant.is_none(),
            "frame {:?} already holds {:?}",
            ppn,
            info.occupant
        );
        let previous = self.map.insert(key, ppn);
        assert!(previous.is_none(), "{:?} already resident in {:?}", key, previous);
        *info = FrameInfo {
            occupant: Some(key),
            dirty: false,
            referenced: false,
        };
    }

    /// 解除映射并清空页帧元数据，返回原来的页帧
    pub fn unbind(&mut self, key: PageKey) -> Option<PhysPageNum> {
        let ppn = self.map.remove(&key)?;
        self.frames[ppn.0] = FrameInfo::default();
        Some(ppn)
    }

    /// 驻留页帧的占用者与元数据
    pub fn iter(&self) -> impl Iterator<Item = (PageKey, PhysPageNum)> + '_ {
        self.map.iter().map(|(key, ppn)| (*key, *ppn))
    }

    /// TLB里找不到可用牺牲者时的兜底：优先未被访问的页帧，否则第一个被占用的页帧
    pub fn fallback_victim(&self) -> Option<PhysPageNum> {
        let occupied = || {
            self.frames
                .iter()
                .enumerate()
                .filter(|(_, info)| info.occupant.is_some())
        };
        occupied()
            .find(|(_, info)| !info.referenced)
            .or_else(|| occupied().next())
            .map(|(index, _)| PhysPageNum(index))
    }

    /// 检查两张表互为逆映射
    pub fn check_inverse(&self) -> Result<(), String> {
        for (key, ppn) in self.map.iter() {
            if self.occupant(*ppn) != Some(*key) {
                return Err(format!(
                    "{:?} maps to {:?} but the frame lists {:?}",
                    key,
                    ppn,
                    self.occupant(*ppn)
                ));
            }
        }
        for (index, info) in self.frames.iter().enumerate() {
            if let Some(key) = info.occupant {
                if self.map.get(&key) != Some(&PhysPageNum(index)) {
                    return Err(format!("frame {:#x} lists {:?} which maps elsewhere", index, key));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(pid: usize, vpn: usize) -> PageKey {
        PageKey::new(Pid(pid), VirtPageNum(vpn))
    }

    #[test]
    fn bind_and_unbind_keep_tables_inverse() {
        let mut ipt = InvertedPageTable::new(4);
        ipt.bind(key(1, 0), PhysPageNum(2));
        ipt.bind(key(2, 0), PhysPageNum(3));
        assert_eq!(ipt.lookup(key(1, 0)), Some(PhysPageNum(2)));
        assert_eq!(ipt.occupant(PhysPageNum(3)), Some(key(2, 0)));
        assert!(ipt.check_inverse().is_ok());

        ipt.frame_mut(PhysPageNum(2)).dirty = true;
        assert_eq!(ipt.unbind(key(1, 0)), Some(PhysPageNum(2)));
        assert_eq!(ipt.frame(PhysPageNum(2)), &FrameInfo::default());
        assert_eq!(ipt.lookup(key(1, 0)), None);
        assert_eq!(ipt.unbind(key(1, 0)), None);
        assert_eq!(ipt.resident_count(), 1);
        assert!(ipt.check_inverse().is_ok());
    }

    #[test]
    #[should_panic(expected = "already holds")]
    fn aliasing_a_frame_panics() {
        let mut ipt = InvertedPageTable::new(2);
        ipt.bind(key(1, 0), PhysPageNum(1));
        ipt.bind(key(1, 1), PhysPageNum(1));
    }

    #[test]
    fn fallback_prefers_unreferenced_frames() {
        let mut ipt = InvertedPageTable::new(3);
        assert_eq!(ipt.fallback_victim(), None);
        ipt.bind(key(1, 0), PhysPageNum(0));
        ipt.bind(key(1, 1), PhysPageNum(2));
        ipt.frame_mut(PhysPageNum(0)).referenced = true;
        assert_eq!(ipt.fallback_victim(), Some(PhysPageNum(2)));
        ipt.frame_mut(PhysPageNum(2)).referenced = true;
        assert_eq!(ipt.fallback_victim(), Some(PhysPageNum(0)));
    }

    #[test]
    fn pid_displays_with_prefix() {
        assert_eq!(Pid(7).to_string(), "pid:7");
    }
}
