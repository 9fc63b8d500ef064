//! 实现UPSafeCell<T>结构体，模拟"关闭抢占"的短临界区
//!
//! 硬件状态（TLB槽位、物理内存）的修改只持续几条指令，
//! 期间不允许其他线程观察到写了一半的表项。

use parking_lot::{Mutex, MutexGuard};

pub struct UPSafeCell<T> {
    inner: Mutex<T>,
}

impl<T> UPSafeCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }
    /// 关闭抢占并独占访问内部数据，守卫析构时恢复
    pub fn exclusive_access(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn exclusive_access_serializes_updates() {
        let cell = Arc::new(UPSafeCell::new(0usize));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *cell.exclusive_access() += 1;
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(*cell.exclusive_access(), 4000);
    }
}
