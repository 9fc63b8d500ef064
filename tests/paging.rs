mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::*;
use proptest::prelude::*;
use vmkernel::config::PAGE_SIZE;
use vmkernel::loader::{MemorySection, Section};
use vmkernel::mm::{PageLocation, Pid, VirtPageNum};
use vmkernel::VmError;

#[test]
fn read_only_section_is_reloaded_not_swapped() {
    let mm = memory(2);
    let pid = Pid(1);
    let text = Arc::new(MemorySection::from_bytes(
        "text",
        VirtPageNum(0),
        true,
        (0..3 * PAGE_SIZE).map(|i| (i % 7) as u8).collect(),
    ));
    with_sections(&mm, pid, vec![text.clone() as Arc<dyn Section>], 0);

    for round in 0..3 {
        for vpn in 0..3 {
            let mut buf = vec![0u8; PAGE_SIZE];
            mm.read_virtual_memory(pid, page(vpn), &mut buf).unwrap();
            assert_eq!(buf[5], ((vpn * PAGE_SIZE + 5) % 7) as u8, "round {}", round);
            if let Some(PageLocation::Resident(ppn)) = mm.lookup(pid, VirtPageNum(vpn)) {
                assert!(!mm.frame_info(ppn).dirty);
            }
        }
    }
    assert_eq!(mm.swap_slots_in_use(), 0);
    assert_eq!(mm.stats().swap_outs, 0);
    assert!(text.load_count() > 3);
    assert_eq!(text.load_count(), mm.stats().section_loads);
    mm.check_invariants().unwrap();
}

#[test]
fn writable_section_keeps_modifications_across_eviction() {
    let mm = memory(1);
    let pid = Pid(1);
    let data = Arc::new(MemorySection::from_bytes("data", VirtPageNum(0), false, vec![5; 2 * PAGE_SIZE]));
    with_sections(&mm, pid, vec![data.clone() as Arc<dyn Section>], 0);

    mm.write_virtual_memory(pid, 10, b"changed").unwrap();
    assert_eq!(read_byte(&mm, pid, page(1)), 5);
    assert_eq!(mm.lookup(pid, VirtPageNum(0)), Some(PageLocation::SwapBacked(0)));

    let mut back = [0u8; 9];
    mm.read_virtual_memory(pid, 9, &mut back).unwrap();
    assert_eq!(&back, b"\x05changed\x05");
    // 第0页从交换区回来，不再从段装入
    assert_eq!(data.load_count(), 2);
}

#[test]
fn writes_to_read_only_pages_are_refused() {
    let mm = memory(2);
    let pid = Pid(1);
    let text: Arc<dyn Section> = Arc::new(MemorySection::from_bytes("text", VirtPageNum(0), true, vec![1; 8]));
    with_sections(&mm, pid, vec![text], 1);

    let err = mm.write_virtual_memory(pid, 4, b"x").unwrap_err();
    assert!(matches!(err, VmError::ProtectionViolation { pid: Pid(1), vpn: VirtPageNum(0) }));
    assert_eq!(read_byte(&mm, pid, 4), 1);
    // 栈页可写
    assert_eq!(mm.write_virtual_memory(pid, page(1), b"ok").unwrap(), 2);
    mm.check_invariants().unwrap();
}

#[test]
fn transfers_are_clamped_to_the_address_space() {
    let mm = memory(2);
    let pid = Pid(1);
    anonymous(&mm, pid, 2);
    let bound = 2 * PAGE_SIZE;
    assert_eq!(mm.address_bound(pid), Some(bound));

    let mut buf = [0u8; 16];
    assert_eq!(mm.read_virtual_memory(pid, bound, &mut buf).unwrap(), 0);
    assert_eq!(mm.read_virtual_memory(pid, usize::MAX, &mut buf).unwrap(), 0);
    assert_eq!(mm.write_virtual_memory(pid, bound - 4, &[9; 16]).unwrap(), 4);
    assert_eq!(mm.read_virtual_memory(pid, bound - 6, &mut buf).unwrap(), 6);
    assert_eq!(&buf[..6], &[0, 0, 9, 9, 9, 9]);
    assert!(matches!(
        mm.read_virtual_memory(Pid(9), 0, &mut buf),
        Err(VmError::UnknownProcess(Pid(9)))
    ));
}

#[test]
fn strings_stop_at_nul_or_give_up() {
    let mm = memory(2);
    let pid = Pid(1);
    anonymous(&mm, pid, 2);
    mm.write_virtual_memory(pid, PAGE_SIZE - 3, b"hello\0world").unwrap();
    assert_eq!(
        mm.read_virtual_memory_string(pid, PAGE_SIZE - 3, 16).unwrap().as_deref(),
        Some("hello")
    );
    assert_eq!(mm.read_virtual_memory_string(pid, PAGE_SIZE - 3, 5).unwrap().as_deref(), Some("hello"));
    assert_eq!(mm.read_virtual_memory_string(pid, PAGE_SIZE - 3, 4).unwrap(), None);
    assert_eq!(mm.read_virtual_memory_string(pid, 2 * PAGE_SIZE, 4).unwrap(), None);
}

#[test]
fn huge_string_limits_are_clamped_to_the_address_space() {
    let mm = memory(2);
    let pid = Pid(1);
    anonymous(&mm, pid, 2);
    mm.write_virtual_memory(pid, 0, b"boot\0").unwrap();
    assert_eq!(
        mm.read_virtual_memory_string(pid, 0, usize::MAX).unwrap().as_deref(),
        Some("boot")
    );
    assert_eq!(mm.read_virtual_memory_string(pid, usize::MAX, usize::MAX).unwrap(), None);

    // 没有NUL时读到地址空间末尾为止
    fill_page(&mm, pid, 1, b'z');
    assert_eq!(mm.read_virtual_memory_string(pid, page(1), usize::MAX).unwrap(), None);
    assert!(matches!(
        mm.read_virtual_memory_string(Pid(7), 0, usize::MAX),
        Err(VmError::UnknownProcess(Pid(7)))
    ));
}

#[test]
fn context_switch_invalidates_translations() {
    let mm = memory(4);
    anonymous(&mm, Pid(1), 1);
    anonymous(&mm, Pid(2), 1);
    mm.write_virtual_memory(Pid(1), 0, b"one").unwrap();
    mm.write_virtual_memory(Pid(2), 0, b"two").unwrap();

    let mut buf = [0u8; 3];
    mm.read_virtual_memory(Pid(1), 0, &mut buf).unwrap();
    assert_eq!(&buf, b"one");
    mm.read_virtual_memory(Pid(2), 0, &mut buf).unwrap();
    assert_eq!(&buf, b"two");

    mm.save_state();
    assert!(mm
        .machine()
        .tlb_snapshot()
        .iter()
        .flatten()
        .all(|entry| !entry.is_valid()));
    let misses = mm.stats().tlb_misses;
    mm.read_virtual_memory(Pid(2), 0, &mut buf).unwrap();
    assert_eq!(mm.stats().tlb_misses, misses + 1);
    // 只是TLB缺失，页面仍然驻留
    assert_eq!(mm.stats().page_faults, 2);
    mm.check_invariants().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn random_traffic_keeps_tables_consistent(
        ops in prop::collection::vec((0usize..3, 0usize..4, any::<bool>(), any::<u8>()), 1..80)
    ) {
        let mm = memory(3);
        for pid in 0..3 {
            anonymous(&mm, Pid(pid), 4);
        }
        let mut model: HashMap<(usize, usize), u8> = HashMap::new();
        for (pid, vpn, write, value) in ops {
            let vaddr = page(vpn) + (value as usize % PAGE_SIZE);
            if write {
                mm.write_virtual_memory(Pid(pid), vaddr, &[value]).unwrap();
                model.insert((pid, vaddr), value);
            } else {
                let expected = model.get(&(pid, vaddr)).copied().unwrap_or(0);
                prop_assert_eq!(read_byte(&mm, Pid(pid), vaddr), expected);
            }
            prop_assert_eq!(mm.check_invariants(), Ok(()));
        }
        for ((pid, vaddr), value) in model {
            prop_assert_eq!(read_byte(&mm, Pid(pid), vaddr), value);
        }
    }
}
