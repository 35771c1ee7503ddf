// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/device/host.rs - 主机内存参考设备
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
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, trace};

use crate::{
  device::{
    Bindings, ComputeDevice, DeviceError, KernelSource, ThreadGroups, WorkgroupSize,
  },
  frame::RgbFrame,
  kernel::{HostKernel, Invocation, KernelInput},
};

// 与 wgpu 默认的 max_storage_buffer_binding_size 一致
const DEFAULT_MAX_BUFFER_BYTES: u64 = 128 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLimits {
  /// 单个缓冲区的最大字节数
  pub max_storage_buffer_binding_size: u64,
}

impl Default for HostLimits {
  fn default() -> Self {
    Self {
      max_storage_buffer_binding_size: DEFAULT_MAX_BUFFER_BYTES,
    }
  }
}

#[derive(Debug, Default)]
pub(crate) struct HostStats {
  live_buffers: AtomicUsize,
  live_workers: AtomicUsize,
  dispatches: AtomicUsize,
  uploads: AtomicUsize,
  readbacks: AtomicUsize,
}

/// 存活期间计数加一，丢弃时减一
pub(crate) struct LiveGuard {
  stats: Arc<HostStats>,
  counter: fn(&HostStats) -> &AtomicUsize,
}

impl LiveGuard {
  fn new(stats: &Arc<HostStats>, counter: fn(&HostStats) -> &AtomicUsize) -> Self {
    counter(stats).fetch_add(1, Ordering::SeqCst);
    Self {
      stats: Arc::clone(stats),
      counter,
    }
  }
}

impl Drop for LiveGuard {
  fn drop(&mut self) {
    (self.counter)(&self.stats).fetch_sub(1, Ordering::SeqCst);
  }
}

/// 主机内存中的结构化缓冲区
pub struct HostBuffer {
  label: String,
  stride: usize,
  len: usize,
  data: RwLock<Box<[f32]>>,
  _live: LiveGuard,
}

impl HostBuffer {
  pub fn label(&self) -> &str {
    &self.label
  }

  /// 每条记录的 f32 元素数
  pub fn stride(&self) -> usize {
    self.stride
  }

  pub fn records(&self) -> usize {
    self.len / self.stride
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// 从主机写入整个缓冲区
  pub(crate) fn write(&self, src: &[f32]) -> Result<(), DeviceError> {
    if src.len() != self.len {
      return Err(DeviceError::SizeMismatch {
        expected: self.len,
        actual: src.len(),
      });
    }
    let mut data = self.data.write().map_err(poisoned)?;
    data.copy_from_slice(src);
    Ok(())
  }

  /// 整体拷贝到主机切片
  pub(crate) fn read_into(&self, dst: &mut [f32]) -> Result<(), DeviceError> {
    if dst.len() != self.len {
      return Err(DeviceError::SizeMismatch {
        expected: self.len,
        actual: dst.len(),
      });
    }
    let data = self.data.read().map_err(poisoned)?;
    dst.copy_from_slice(&data);
    Ok(())
  }
}

impl fmt::Debug for HostBuffer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HostBuffer")
      .field("label", &self.label)
      .field("stride", &self.stride)
      .field("len", &self.len)
      .finish()
  }
}

fn poisoned<T>(err: PoisonError<T>) -> DeviceError {
  DeviceError::Poisoned(err.to_string())
}

/// 在主机内存上执行的参考设备
///
/// 内核按 `线程组数 × 线程组大小` 逐个调用，调度范围与缓冲区不匹配时
/// 未覆盖的区域保持原值，与真实设备的行为一致。
///
/// 克隆得到的句柄共享同一组计数器。
#[derive(Debug, Clone, Default)]
pub struct HostDevice {
  limits: HostLimits,
  stats: Arc<HostStats>,
}

impl HostDevice {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_limits(limits: HostLimits) -> Self {
    Self {
      limits,
      stats: Arc::default(),
    }
  }

  pub fn limits(&self) -> HostLimits {
    self.limits
  }

  pub fn live_buffers(&self) -> usize {
    self.stats.live_buffers.load(Ordering::SeqCst)
  }

  pub fn live_workers(&self) -> usize {
    self.stats.live_workers.load(Ordering::SeqCst)
  }

  pub fn dispatch_count(&self) -> usize {
    self.stats.dispatches.load(Ordering::SeqCst)
  }

  pub fn upload_count(&self) -> usize {
    self.stats.uploads.load(Ordering::SeqCst)
  }

  pub fn readback_count(&self) -> usize {
    self.stats.readbacks.load(Ordering::SeqCst)
  }

  pub(crate) fn worker_guard(&self) -> LiveGuard {
    LiveGuard::new(&self.stats, |stats| &stats.live_workers)
  }
}

impl ComputeDevice for HostDevice {
  type Buffer = HostBuffer;
  type Texture = RgbFrame;
  type Kernel = HostKernel;

  fn create_buffer(
    &self,
    label: &str,
    count: usize,
    stride: usize,
  ) -> Result<Self::Buffer, DeviceError> {
    if count == 0 || stride == 0 {
      return Err(DeviceError::InvalidBufferSize { count, stride });
    }

    let (len, bytes) = count
      .checked_mul(stride)
      .and_then(|len| Some((len, len.checked_mul(size_of::<f32>())?)))
      .ok_or(DeviceError::InvalidBufferSize { count, stride })?;
    let requested = bytes as u64;
    let limit = self.limits.max_storage_buffer_binding_size;
    if requested > limit {
      return Err(DeviceError::OutOfMemory { requested, limit });
    }

    debug!(
      "分配缓冲区 {}: {} 条记录 x {} 个元素 ({} 字节)",
      label, count, stride, requested
    );

    Ok(HostBuffer {
      label: label.to_string(),
      stride,
      len,
      data: RwLock::new(vec![0.0; len].into_boxed_slice()),
      _live: LiveGuard::new(&self.stats, |stats| &stats.live_buffers),
    })
  }

  fn buffer_len(&self, buffer: &Self::Buffer) -> usize {
    buffer.len()
  }

  fn upload_texture(&self, frame: &RgbFrame) -> Result<Self::Texture, DeviceError> {
    self.stats.uploads.fetch_add(1, Ordering::SeqCst);
    trace!("上传纹理: {}x{}", frame.width(), frame.height());
    Ok(frame.clone())
  }

  fn kernel_workgroup(&self, kernel: &Self::Kernel, pass: usize) -> Option<WorkgroupSize> {
    kernel.pass(pass).map(|pass| pass.workgroup())
  }

  fn dispatch(
    &self,
    kernel: &Self::Kernel,
    pass: usize,
    bindings: Bindings<'_, Self>,
    groups: ThreadGroups,
  ) -> Result<(), DeviceError> {
    let entry = kernel.pass(pass).ok_or_else(|| DeviceError::MissingPass {
      kernel: kernel.name().to_string(),
      pass,
    })?;

    let source_guard;
    let source = match bindings.source {
      KernelSource::Texture(frame) => KernelInput::Texture(frame),
      KernelSource::Buffer(buffer) => {
        if std::ptr::eq(buffer, bindings.target) {
          return Err(DeviceError::AliasedBindings);
        }
        source_guard = buffer.data.read().map_err(poisoned)?;
        KernelInput::Buffer(&source_guard[..])
      }
    };

    let mut target = bindings.target.data.write().map_err(poisoned)?;
    let stride = bindings.target.stride;

    let workgroup = entry.workgroup();
    let extent_x = groups.x * workgroup.x;
    let extent_y = groups.y * workgroup.y;
    let extent_z = groups.z * workgroup.z;

    trace!(
      "调度内核 {}#{}: 线程组 {}, 线程组大小 {}",
      kernel.name(),
      pass,
      groups,
      workgroup
    );

    for z in 0..extent_z {
      for y in 0..extent_y {
        for x in 0..extent_x {
          let mut invocation = Invocation::new([x, y, z], &source, &mut target[..], stride);
          entry.run(&mut invocation);
        }
      }
    }

    self.stats.dispatches.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn read_buffer(&self, buffer: &Self::Buffer, dst: &mut [f32]) -> Result<(), DeviceError> {
    // 主机设备的调度是同步完成的，这里不需要额外等待
    buffer.read_into(dst)?;
    self.stats.readbacks.fetch_add(1, Ordering::SeqCst);
    debug!("回读缓冲区 {}: {} 个元素", buffer.label(), dst.len());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fill_index_kernel() -> HostKernel {
    HostKernel::new("fill-index").with_pass(WorkgroupSize::new(4, 1, 1), |invocation| {
      let index = invocation.id()[0] as usize;
      invocation.store(index, index as f32 + 1.0);
    })
  }

  #[test]
  fn buffers_are_counted_until_dropped() {
    let device = HostDevice::new();
    let a = device.create_buffer("a", 4, 4).unwrap();
    let b = device.create_buffer("b", 1, 1).unwrap();
    assert_eq!(device.live_buffers(), 2);
    assert_eq!(a.records(), 4);
    assert_eq!(a.len(), 16);
    drop(a);
    assert_eq!(device.live_buffers(), 1);
    drop(b);
    assert_eq!(device.live_buffers(), 0);
  }

  #[test]
  fn zero_sized_buffer_is_rejected() {
    let device = HostDevice::new();
    let err = device.create_buffer("empty", 0, 4).unwrap_err();
    assert!(matches!(err, DeviceError::InvalidBufferSize { count: 0, stride: 4 }));
    assert_eq!(device.live_buffers(), 0);
  }

  #[test]
  fn allocation_over_limit_fails() {
    let device = HostDevice::with_limits(HostLimits {
      max_storage_buffer_binding_size: 64,
    });
    assert!(device.create_buffer("fits", 4, 4).is_ok());
    let err = device.create_buffer("too-big", 5, 4).unwrap_err();
    assert!(matches!(
      err,
      DeviceError::OutOfMemory {
        requested: 80,
        limit: 64
      }
    ));
  }

  #[test]
  fn overflowing_buffer_size_is_rejected() {
    let device = HostDevice::new();
    let err = device
      .create_buffer("huge", usize::MAX / 4 + 1, 4)
      .unwrap_err();
    assert!(matches!(err, DeviceError::InvalidBufferSize { stride: 4, .. }));
    let err = device.create_buffer("huge", usize::MAX / 2, 1).unwrap_err();
    assert!(matches!(err, DeviceError::InvalidBufferSize { stride: 1, .. }));
    assert_eq!(device.live_buffers(), 0);
  }

  #[test]
  fn dispatch_only_covers_requested_groups() {
    let device = HostDevice::new();
    let kernel = fill_index_kernel();
    let source = device.create_buffer("source", 1, 1).unwrap();
    let target = device.create_buffer("target", 12, 1).unwrap();

    device
      .dispatch(
        &kernel,
        0,
        Bindings {
          source: KernelSource::Buffer(&source),
          target: &target,
        },
        ThreadGroups::new(2, 1, 1),
      )
      .unwrap();

    let mut host = vec![0.0; 12];
    device.read_buffer(&target, &mut host).unwrap();
    assert_eq!(&host[..8], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    // 未调度的尾部保持原值
    assert_eq!(&host[8..], &[0.0; 4]);
    assert_eq!(device.dispatch_count(), 1);
    assert_eq!(device.readback_count(), 1);
  }

  #[test]
  fn out_of_range_invocations_are_discarded() {
    let device = HostDevice::new();
    let kernel = fill_index_kernel();
    let source = device.create_buffer("source", 1, 1).unwrap();
    let target = device.create_buffer("target", 6, 1).unwrap();

    device
      .dispatch(
        &kernel,
        0,
        Bindings {
          source: KernelSource::Buffer(&source),
          target: &target,
        },
        ThreadGroups::new(2, 1, 1),
      )
      .unwrap();

    let mut host = vec![0.0; 6];
    device.read_buffer(&target, &mut host).unwrap();
    assert_eq!(host, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
  }

  #[test]
  fn aliased_bindings_are_rejected() {
    let device = HostDevice::new();
    let kernel = fill_index_kernel();
    let buffer = device.create_buffer("both", 4, 1).unwrap();

    let err = device
      .dispatch(
        &kernel,
        0,
        Bindings {
          source: KernelSource::Buffer(&buffer),
          target: &buffer,
        },
        ThreadGroups::new(1, 1, 1),
      )
      .unwrap_err();
    assert!(matches!(err, DeviceError::AliasedBindings));
    assert_eq!(device.dispatch_count(), 0);
  }

  #[test]
  fn missing_pass_is_a_device_error() {
    let device = HostDevice::new();
    let kernel = fill_index_kernel();
    let source = device.create_buffer("source", 1, 1).unwrap();
    let target = device.create_buffer("target", 4, 1).unwrap();

    let err = device
      .dispatch(
        &kernel,
        3,
        Bindings {
          source: KernelSource::Buffer(&source),
          target: &target,
        },
        ThreadGroups::new(1, 1, 1),
      )
      .unwrap_err();
    assert!(matches!(err, DeviceError::MissingPass { pass: 3, .. }));
  }

  #[test]
  fn readback_checks_destination_length() {
    let device = HostDevice::new();
    let buffer = device.create_buffer("buffer", 4, 4).unwrap();
    let mut host = vec![0.0; 15];
    let err = device.read_buffer(&buffer, &mut host).unwrap_err();
    assert!(matches!(
      err,
      DeviceError::SizeMismatch {
        expected: 16,
        actual: 15
      }
    ));
    assert_eq!(device.readback_count(), 0);
  }

  #[test]
  fn clones_share_counters() {
    let device = HostDevice::new();
    let handle = device.clone();
    let _buffer = handle.create_buffer("shared", 1, 4).unwrap();
    assert_eq!(device.live_buffers(), 1);
  }
}
