// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/device.rs - 计算设备抽象
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::fmt;

use thiserror::Error;

use crate::frame::RgbFrame;

mod host;
pub use self::host::{HostBuffer, HostDevice, HostLimits};
pub(crate) use self::host::LiveGuard;

/// 计算内核声明的线程组大小（每个线程组内的线程数）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
  pub x: u32,
  pub y: u32,
  pub z: u32,
}

impl WorkgroupSize {
  pub const fn new(x: u32, y: u32, z: u32) -> Self {
    Self { x, y, z }
  }
}

impl fmt::Display for WorkgroupSize {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}×{}×{}", self.x, self.y, self.z)
  }
}

/// 一次调度的线程组数量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadGroups {
  pub x: u32,
  pub y: u32,
  pub z: u32,
}

impl ThreadGroups {
  pub const fn new(x: u32, y: u32, z: u32) -> Self {
    Self { x, y, z }
  }

  /// 按线程组大小精确铺满给定范围，不能整除时返回 None
  pub fn tiling(extent: (u32, u32, u32), workgroup: WorkgroupSize) -> Option<Self> {
    let (ex, ey, ez) = extent;
    let WorkgroupSize { x, y, z } = workgroup;
    if x == 0 || y == 0 || z == 0 {
      return None;
    }
    if ex % x != 0 || ey % y != 0 || ez % z != 0 {
      return None;
    }
    Some(Self::new(ex / x, ey / y, ez / z))
  }
}

impl fmt::Display for ThreadGroups {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}×{}×{}", self.x, self.y, self.z)
  }
}

/// 内核的输入绑定
pub enum KernelSource<'a, D: ComputeDevice + ?Sized> {
  Texture(&'a D::Texture),
  Buffer(&'a D::Buffer),
}

/// 一次调度的资源绑定：一个输入，一个输出缓冲区
pub struct Bindings<'a, D: ComputeDevice + ?Sized> {
  pub source: KernelSource<'a, D>,
  pub target: &'a D::Buffer,
}

#[derive(Error, Debug)]
pub enum DeviceError {
  #[error("设备内存不足: 请求 {requested} 字节, 上限 {limit} 字节")]
  OutOfMemory { requested: u64, limit: u64 },
  #[error("无效的缓冲区尺寸: {count} 条记录 x {stride} 个元素")]
  InvalidBufferSize { count: usize, stride: usize },
  #[error("缓冲区大小不匹配: 期望 {expected} 个元素, 实际 {actual} 个元素")]
  SizeMismatch { expected: usize, actual: usize },
  #[error("内核 {kernel} 不存在第 {pass} 个入口")]
  MissingPass { kernel: String, pass: usize },
  #[error("内核的输入与输出绑定到同一缓冲区")]
  AliasedBindings,
  #[error("推理执行失败: {0}")]
  Execution(String),
  #[error("设备资源锁已失效: {0}")]
  Poisoned(String),
}

/// 并行计算设备
///
/// 设备上的工作按提交顺序执行，前一次调度写入的缓冲区对后一次调度可见，
/// 调用方不需要在调度之间等待。唯一的阻塞点是 [`ComputeDevice::read_buffer`]。
///
/// 缓冲区在被丢弃时释放。
pub trait ComputeDevice {
  type Buffer;
  type Texture;
  type Kernel;

  /// 分配 `count` 条记录、每条 `stride` 个 f32 的结构化缓冲区，内容初始化为零
  fn create_buffer(
    &self,
    label: &str,
    count: usize,
    stride: usize,
  ) -> Result<Self::Buffer, DeviceError>;

  /// 缓冲区的 f32 元素总数
  fn buffer_len(&self, buffer: &Self::Buffer) -> usize;

  fn upload_texture(&self, frame: &RgbFrame) -> Result<Self::Texture, DeviceError>;

  /// 内核第 `pass` 个入口声明的线程组大小
  fn kernel_workgroup(&self, kernel: &Self::Kernel, pass: usize) -> Option<WorkgroupSize>;

  fn dispatch(
    &self,
    kernel: &Self::Kernel,
    pass: usize,
    bindings: Bindings<'_, Self>,
    groups: ThreadGroups,
  ) -> Result<(), DeviceError>;

  /// 将缓冲区完整拷贝回主机内存，会等待之前提交的工作完成
  fn read_buffer(&self, buffer: &Self::Buffer, dst: &mut [f32]) -> Result<(), DeviceError>;
}
