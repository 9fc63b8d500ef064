//! 互斥锁与条件变量
//!
//! 获取锁会阻塞调用线程（不忙等），没有超时；同一线程重复获取视为内核错误。

use core::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, MutexGuard};

/// 记录持有线程的互斥锁
pub struct Lock<T> {
    inner: Mutex<T>,
    holder: Mutex<Option<ThreadId>>,
}

impl<T> Lock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            holder: Mutex::new(None),
        }
    }

    /// 阻塞直到获得锁
    pub fn acquire(&self) -> LockGuard<'_, T> {
        assert!(
            !self.is_held_by_current_thread(),
            "lock: reentrant acquire on {:?}",
            thread::current().id()
        );
        let guard = self.inner.lock();
        self.set_holder(Some(thread::current().id()));
        LockGuard { lock: self, guard }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        *self.holder.lock() == Some(thread::current().id())
    }

    fn set_holder(&self, holder: Option<ThreadId>) {
        *self.holder.lock() = holder;
    }
}

/// 锁守卫，析构即释放
pub struct LockGuard<'a, T> {
    lock: &'a Lock<T>,
    guard: MutexGuard<'a, T>,
}

impl<'a, T> LockGuard<'a, T> {
    /// 提前释放，等价于drop
    pub fn release(self) {}
}

impl<'a, T> Deref for LockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> DerefMut for LockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<'a, T> Drop for LockGuard<'a, T> {
    fn drop(&mut self) {
        // 先清除持有者，随后字段析构时才真正解锁
        self.lock.set_holder(None);
    }
}

/// 建立在[`Lock`]之上的条件变量
#[derive(Default)]
pub struct Condition {
    cv: Condvar,
}

impl Condition {
    pub fn new() -> Self {
        Self { cv: Condvar::new() }
    }

    /// 原子地释放锁并睡眠，被唤醒后重新持有锁再返回
    ///
    /// 可能出现虚假唤醒，调用者需要在循环中重新检查条件。
    pub fn sleep<T>(&self, guard: &mut LockGuard<'_, T>) {
        debug_assert!(guard.lock.is_held_by_current_thread());
        guard.lock.set_holder(None);
        self.cv.wait(&mut guard.guard);
        guard.lock.set_holder(Some(thread::current().id()));
    }

    /// 唤醒至多一个睡眠线程；传入守卫以证明调用者持有锁
    pub fn wake<T>(&self, _guard: &LockGuard<'_, T>) {
        self.cv.notify_one();
    }

    pub fn wake_all<T>(&self, _guard: &LockGuard<'_, T>) {
        self.cv.notify_all();
    }
}
