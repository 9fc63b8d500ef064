//! vmkernel入口main函数
//!
//! 不带参数时运行内置的多进程内存压力负载；带参数时把每个参数当作ELF文件，
//! 按需调入它的整个地址空间。结束时输出调页统计并校验各张表的一致性。

use std::env;
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use log::*;

use vmkernel::config::{KernelConfig, PAGE_SIZE};
use vmkernel::loader::{Executable, MemorySection, Section};
use vmkernel::mm::VirtPageNum;
use vmkernel::task::{Process, TaskManager};
use vmkernel::{logging, VmError, VmResult};

/// 压力负载中的进程数
const WORKERS: usize = 4;
/// 每个进程的数据段页数
const DATA_PAGES: usize = 6;

fn main() -> ExitCode {
    logging::init();
    let config = KernelConfig::from_env();
    let tm = match TaskManager::boot(config) {
        Ok(tm) => Arc::new(tm),
        Err(e) => {
            error!("[kernel] boot failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let paths: Vec<String> = env::args().skip(1).collect();
    let result = if paths.is_empty() {
        pressure_workload(&tm)
    } else {
        run_images(&tm, &paths)
    };
    tm.shutdown();

    let stats = tm.memory().stats();
    println!("[kernel] {:?}", stats);
    let consistent = match tm.memory().check_invariants() {
        Ok(()) => true,
        Err(e) => {
            error!("[kernel] inconsistent tables: {}", e);
            false
        }
    };
    match result {
        Ok(()) if consistent => ExitCode::SUCCESS,
        Ok(()) => ExitCode::FAILURE,
        Err(e) => {
            error!("[kernel] {}", e);
            ExitCode::FAILURE
        }
    }
}

/// 依次装入每个ELF文件并读遍它的地址空间
fn run_images(tm: &TaskManager, paths: &[String]) -> VmResult<()> {
    for path in paths {
        let image = fs::read(path)?;
        let exe = Executable::from_elf(&image)?;
        let process = tm.spawn(&exe, &[path.as_str()])?;
        let bound = tm.memory().address_bound(process.pid()).unwrap_or(0);
        let mut page = [0u8; PAGE_SIZE];
        let mut checksum = 0u32;
        for vaddr in (0..bound).step_by(PAGE_SIZE) {
            let read = process.read_memory(vaddr, &mut page)?;
            checksum = page[..read]
                .iter()
                .fold(checksum, |acc, &b| acc.rotate_left(5) ^ u32::from(b));
        }
        println!(
            "[kernel] {}: entry {:#x}, {} pages, checksum {:#010x}",
            path,
            process.entry_point(),
            bound / PAGE_SIZE,
            checksum
        );
        process.exit(0);
        tm.join(process.pid());
    }
    Ok(())
}

/// 多个进程并发写满自己的栈、读回校验，物理页帧总数小于所有进程的页数之和
fn pressure_workload(tm: &Arc<TaskManager>) -> VmResult<()> {
    let mut workers = Vec::new();
    for id in 0..WORKERS {
        let tag = id as u8 + 1;
        let data = vec![tag; DATA_PAGES * PAGE_SIZE / 2];
        let section: Arc<dyn Section> = Arc::new(MemorySection::new(
            "data",
            VirtPageNum(0),
            DATA_PAGES,
            id % 2 == 0,
            data,
        ));
        let exe = Executable::new(vec![section], 0);
        let name = format!("worker{}", id);
        let process = tm.spawn(&exe, &[name.as_str()])?;
        workers.push(thread::spawn(move || run_worker(&process, tag)));
    }
    let mut failure = None;
    for worker in workers {
        match worker.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => failure = Some(e),
            Err(_) => failure = Some(VmError::Io(std::io::Error::other("worker panicked"))),
        }
    }
    failure.map_or(Ok(()), Err)
}

fn run_worker(process: &Process, tag: u8) -> VmResult<()> {
    let pid = process.pid();
    let stack_top = process.initial_sp();
    let stack_base = DATA_PAGES * PAGE_SIZE;
    for round in 0..3u8 {
        let pattern: Vec<u8> = (0..stack_top - stack_base)
            .map(|i| (i as u8).wrapping_mul(tag).wrapping_add(round))
            .collect();
        process.write_memory(stack_base, &pattern)?;
        let mut back = vec![0u8; pattern.len()];
        process.read_memory(stack_base, &mut back)?;
        if back != pattern {
            process.exit(1);
            return Err(VmError::CorruptAddressSpace {
                pid,
                vpn: VirtPageNum(stack_base / PAGE_SIZE),
            });
        }
        let mut data = vec![0u8; DATA_PAGES * PAGE_SIZE];
        process.read_memory(0, &mut data)?;
        let expected = DATA_PAGES * PAGE_SIZE / 2;
        if data[..expected].iter().any(|&b| b != tag) || data[expected..].iter().any(|&b| b != 0) {
            process.exit(1);
            return Err(VmError::CorruptAddressSpace { pid, vpn: VirtPageNum(0) });
        }
    }
    let name = process.argument(0)?.unwrap_or_default();
    info!("[kernel] {} ({}) verified its memory", name, pid);
    process.exit(0);
    Ok(())
}
