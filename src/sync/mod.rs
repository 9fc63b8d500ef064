//! 同步原语：关抢占的单处理器互斥单元、可检查持有者的锁与条件变量

mod lock;
mod up;

pub use self::lock::{Condition, Lock, LockGuard};
pub use self::up::UPSafeCell;
