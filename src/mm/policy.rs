//! TLB槽位选择：装入位置与换出牺牲者
//!
//! 两者都是槽位元数据快照上的纯函数，不接触任何表。

use super::PhysPageNum;
use crate::machine::TranslationEntry;

/// 单个TLB槽位的元数据
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotMeta {
    pub valid: bool,
    pub used: bool,
    pub dirty: bool,
    /// 槽位指向的页帧，从未装入过时为None
    pub frame: Option<PhysPageNum>,
}

impl SlotMeta {
    pub fn from_entry(entry: Option<&TranslationEntry>) -> Self {
        match entry {
            Some(e) => Self {
                valid: e.is_valid(),
                used: e.is_used(),
                dirty: e.is_dirty(),
                frame: Some(e.ppn),
            },
            None => Self::default(),
        }
    }
}

pub fn snapshot(tlb: &[Option<TranslationEntry>]) -> Vec<SlotMeta> {
    tlb.iter().map(|e| SlotMeta::from_entry(e.as_ref())).collect()
}

/// 新翻译写入哪个槽：无效 > 未使用 > 干净 > 0号
pub fn choose_install_slot(slots: &[SlotMeta]) -> usize {
    slots
        .iter()
        .position(|s| !s.valid)
        .or_else(|| slots.iter().position(|s| !s.used))
        .or_else(|| slots.iter().position(|s| !s.dirty))
        .unwrap_or(0)
}

/// 在TLB引用的页帧中挑选牺牲者
///
/// 只考虑仍有占用者的页帧（由`occupied`判定），依次取：
/// 第一个无效槽、第一个未使用槽、第一个干净槽、0号槽。
/// 都不满足时返回None，由调用者退回到页帧表扫描。
pub fn choose_victim(slots: &[SlotMeta], occupied: impl Fn(PhysPageNum) -> bool) -> Option<PhysPageNum> {
    let candidates: Vec<(usize, SlotMeta, PhysPageNum)> = slots
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.frame.filter(|&f| occupied(f)).map(|f| (i, *s, f)))
        .collect();
    let first = |pred: fn(&SlotMeta) -> bool| candidates.iter().find(|c| pred(&c.1)).map(|c| c.2);
    first(|s| !s.valid)
        .or_else(|| first(|s| !s.used))
        .or_else(|| first(|s| !s.dirty))
        .or_else(|| candidates.iter().find(|c| c.0 == 0).map(|c| c.2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(valid: bool, used: bool, dirty: bool, frame: usize) -> SlotMeta {
        SlotMeta {
            valid,
            used,
            dirty,
            frame: Some(PhysPageNum(frame)),
        }
    }

    #[test]
    fn install_prefers_empty_then_unused_then_clean() {
        let empty = SlotMeta::default();
        assert_eq!(choose_install_slot(&[slot(true, true, true, 0), empty]), 1);
        assert_eq!(
            choose_install_slot(&[slot(true, true, true, 0), slot(true, false, true, 1), slot(true, true, false, 2)]),
            1
        );
        assert_eq!(
            choose_install_slot(&[slot(true, true, true, 0), slot(true, true, false, 1)]),
            1
        );
        assert_eq!(
            choose_install_slot(&[slot(true, true, true, 0), slot(true, true, true, 1)]),
            0
        );
    }

    #[test]
    fn victim_skips_free_frames() {
        // 页帧0已被释放，指向它的无效槽不可选
        let slots = [slot(false, false, false, 0), slot(true, false, true, 1)];
        assert_eq!(choose_victim(&slots, |f| f.0 == 1), Some(PhysPageNum(1)));
        let slots = [slot(false, false, false, 0), slot(true, true, true, 1)];
        assert_eq!(choose_victim(&slots, |f| f.0 == 1), None);
    }

    #[test]
    fn victim_priority_order() {
        let all = |_: PhysPageNum| true;
        let slots = [
            slot(true, true, true, 0),
            slot(true, true, false, 1),
            slot(true, false, true, 2),
            slot(false, true, true, 3),
        ];
        assert_eq!(choose_victim(&slots, all), Some(PhysPageNum(3)));
        assert_eq!(choose_victim(&slots[..3], all), Some(PhysPageNum(2)));
        assert_eq!(choose_victim(&slots[..2], all), Some(PhysPageNum(1)));
        assert_eq!(choose_victim(&slots[..1], all), Some(PhysPageNum(0)));
    }

    #[test]
    fn slot_zero_only_when_it_is_occupied() {
        let slots = [slot(true, true, true, 0), slot(true, true, true, 1)];
        assert_eq!(choose_victim(&slots, |f| f.0 == 1), None);
        assert_eq!(choose_victim(&[SlotMeta::default()], |_| true), None);
    }
}
