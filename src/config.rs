//! 设置全局使用的常量，以及启动时可调整的运行配置

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use log::warn;

/// 页大小：1KiB
pub const PAGE_SIZE: usize = 0x400;
pub const PAGE_SIZE_BITS: usize = 0xa;

/// 默认的物理页帧数
pub const NUM_PHYS_PAGES: usize = 32;
/// 默认的TLB槽位数
pub const TLB_SIZE: usize = 4;
/// 每个进程的用户栈页数
pub const USER_STACK_PAGES: usize = 8;
/// 参数页数：argv 全部放在地址空间的最后一页
pub const ARGUMENT_PAGES: usize = 1;
/// 单个地址空间的页数上限（64MiB）
pub const MAX_ADDRESS_SPACE_PAGES: usize = 1 << 16;

/// 进程创建时选用的调页策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PagingPolicy {
    /// 创建时即装入全部页面
    Eager,
    /// 缺页时再装入
    #[default]
    Demand,
}

impl FromStr for PagingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eager" => Ok(Self::Eager),
            "demand" => Ok(Self::Demand),
            other => Err(format!("unknown paging policy `{}`", other)),
        }
    }
}

impl fmt::Display for PagingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eager => f.write_str("eager"),
            Self::Demand => f.write_str("demand"),
        }
    }
}

/// 内核运行配置
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// 物理页帧数
    pub phys_pages: usize,
    /// TLB槽位数
    pub tlb_size: usize,
    /// 用户栈页数
    pub stack_pages: usize,
    /// 交换文件路径，`None` 时使用匿名临时文件
    pub swap_path: Option<PathBuf>,
    /// 默认调页策略
    pub policy: PagingPolicy,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            phys_pages: NUM_PHYS_PAGES,
            tlb_size: TLB_SIZE,
            stack_pages: USER_STACK_PAGES,
            swap_path: None,
            policy: PagingPolicy::default(),
        }
    }
}

impl KernelConfig {
    /// 从环境变量读取配置，未设置或无法解析的项保持默认值
    ///
    /// `VM_PHYS_PAGES` `VM_TLB_SIZE` `VM_STACK_PAGES` `VM_SWAP` `VM_PAGER`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_parse::<usize>("VM_PHYS_PAGES") {
            config.phys_pages = n;
        }
        if let Some(n) = env_parse::<usize>("VM_TLB_SIZE") {
            config.tlb_size = n;
        }
        if let Some(n) = env_parse::<usize>("VM_STACK_PAGES") {
            config.stack_pages = n;
        }
        if let Ok(path) = env::var("VM_SWAP") {
            config.swap_path = Some(PathBuf::from(path));
        }
        if let Some(policy) = env_parse::<PagingPolicy>("VM_PAGER") {
            config.policy = policy;
        }
        config.sanitized()
    }

    pub fn with_phys_pages(mut self, n: usize) -> Self {
        self.phys_pages = n;
        self.sanitized()
    }

    pub fn with_tlb_size(mut self, n: usize) -> Self {
        self.tlb_size = n;
        self.sanitized()
    }

    pub fn with_stack_pages(mut self, n: usize) -> Self {
        self.stack_pages = n;
        self
    }

    pub fn with_policy(mut self, policy: PagingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_swap_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.swap_path = Some(path.into());
        self
    }

    /// 至少需要一个物理页帧和一个TLB槽位
    fn sanitized(mut self) -> Self {
        if self.phys_pages == 0 {
            warn!("[config] phys_pages = 0, using 1");
            self.phys_pages = 1;
        }
        if self.tlb_size == 0 {
            warn!("[config] tlb_size = 0, using 1");
            self.tlb_size = 1;
        }
        self
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("[config] ignoring {}={:?}: cannot parse", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_matches_shift() {
        assert_eq!(1 << PAGE_SIZE_BITS, PAGE_SIZE);
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("Eager".parse::<PagingPolicy>(), Ok(PagingPolicy::Eager));
        assert_eq!("demand".parse::<PagingPolicy>(), Ok(PagingPolicy::Demand));
        assert!("lru".parse::<PagingPolicy>().is_err());
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let config = KernelConfig::default().with_phys_pages(0).with_tlb_size(0);
        assert_eq!(config.phys_pages, 1);
        assert_eq!(config.tlb_size, 1);
    }
}
