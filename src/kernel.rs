// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/kernel.rs - 预处理与后处理内核调度
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

use tracing::{debug, error};

use crate::{
  device::{Bindings, ComputeDevice, DeviceError, KernelSource, ThreadGroups},
  landmark::VERTEX_COUNT,
  resource::ConfigurationError,
  tensor::{IMAGE_SIZE, InputTensor, TensorLayout},
};

mod host;
pub use self::host::{
  HostKernel, HostPass, Invocation, KernelInput, POSTPROCESS_WORKGROUP, PREPROCESS_WORKGROUP,
};

/// 预处理内核的入口编号
pub const PREPROCESS_PASS_NHWC: usize = 0;
pub const PREPROCESS_PASS_NCHW: usize = 1;
/// 后处理内核的入口编号
pub const POSTPROCESS_PASS: usize = 0;

const PREPROCESS_EXTENT: (u32, u32, u32) = (IMAGE_SIZE as u32, IMAGE_SIZE as u32, 1);
const POSTPROCESS_EXTENT: (u32, u32, u32) = (VERTEX_COUNT as u32, 1, 1);

/// 把源图像写入输入张量的预处理器，每种张量布局一个实现
pub trait ImagePreprocessor<D: ComputeDevice> {
  fn layout(&self) -> TensorLayout;

  fn groups(&self) -> ThreadGroups;

  fn dispatch(
    &self,
    device: &D,
    source: &D::Texture,
    tensor: &InputTensor<D>,
  ) -> Result<(), DeviceError>;
}

/// 根据内核声明的线程组大小计算铺满范围所需的线程组数
fn exact_groups<D: ComputeDevice>(
  device: &D,
  kernel: &D::Kernel,
  name: &'static str,
  pass: usize,
  extent: (u32, u32, u32),
) -> Result<ThreadGroups, ConfigurationError> {
  let workgroup = device.kernel_workgroup(kernel, pass).ok_or_else(|| {
    error!("{} 内核缺少第 {} 个入口", name, pass);
    ConfigurationError::MissingKernelPass { kernel: name, pass }
  })?;

  let groups = ThreadGroups::tiling(extent, workgroup).ok_or_else(|| {
    error!(
      "{} 内核的线程组大小 {} 无法铺满 {:?}",
      name, workgroup, extent
    );
    ConfigurationError::WorkgroupMismatch {
      kernel: name,
      workgroup,
      extent,
    }
  })?;

  debug!(
    "{} 内核第 {} 个入口: 线程组大小 {}, 线程组数 {}",
    name, pass, workgroup, groups
  );
  Ok(groups)
}

fn dispatch_preprocess<D: ComputeDevice>(
  device: &D,
  kernel: &D::Kernel,
  pass: usize,
  groups: ThreadGroups,
  source: &D::Texture,
  tensor: &InputTensor<D>,
) -> Result<(), DeviceError> {
  device.dispatch(
    kernel,
    pass,
    Bindings {
      source: KernelSource::Texture(source),
      target: tensor.buffer(),
    },
    groups,
  )
}

/// 通道优先 (1, 3, 192, 192) 布局
pub struct NchwPreprocessor<'a, D: ComputeDevice> {
  kernel: &'a D::Kernel,
  groups: ThreadGroups,
}

impl<'a, D: ComputeDevice> NchwPreprocessor<'a, D> {
  pub fn new(device: &D, kernel: &'a D::Kernel) -> Result<Self, ConfigurationError> {
    let groups = exact_groups(
      device,
      kernel,
      "preprocess",
      PREPROCESS_PASS_NCHW,
      PREPROCESS_EXTENT,
    )?;
    Ok(Self { kernel, groups })
  }
}

impl<D: ComputeDevice> ImagePreprocessor<D> for NchwPreprocessor<'_, D> {
  fn layout(&self) -> TensorLayout {
    TensorLayout::Nchw
  }

  fn groups(&self) -> ThreadGroups {
    self.groups
  }

  fn dispatch(
    &self,
    device: &D,
    source: &D::Texture,
    tensor: &InputTensor<D>,
  ) -> Result<(), DeviceError> {
    debug_assert_eq!(tensor.shape().layout, TensorLayout::Nchw);
    dispatch_preprocess(
      device,
      self.kernel,
      PREPROCESS_PASS_NCHW,
      self.groups,
      source,
      tensor,
    )
  }
}

/// 通道在后 (1, 192, 192, 3) 布局
pub struct NhwcPreprocessor<'a, D: ComputeDevice> {
  kernel: &'a D::Kernel,
  groups: ThreadGroups,
}

impl<'a, D: ComputeDevice> NhwcPreprocessor<'a, D> {
  pub fn new(device: &D, kernel: &'a D::Kernel) -> Result<Self, ConfigurationError> {
    let groups = exact_groups(
      device,
      kernel,
      "preprocess",
      PREPROCESS_PASS_NHWC,
      PREPROCESS_EXTENT,
    )?;
    Ok(Self { kernel, groups })
  }
}

impl<D: ComputeDevice> ImagePreprocessor<D> for NhwcPreprocessor<'_, D> {
  fn layout(&self) -> TensorLayout {
    TensorLayout::Nhwc
  }

  fn groups(&self) -> ThreadGroups {
    self.groups
  }

  fn dispatch(
    &self,
    device: &D,
    source: &D::Texture,
    tensor: &InputTensor<D>,
  ) -> Result<(), DeviceError> {
    debug_assert_eq!(tensor.shape().layout, TensorLayout::Nhwc);
    dispatch_preprocess(
      device,
      self.kernel,
      PREPROCESS_PASS_NHWC,
      self.groups,
      source,
      tensor,
    )
  }
}

/// 按模型声明的输入布局选择预处理器
pub fn select_preprocessor<'a, D: ComputeDevice + 'a>(
  device: &D,
  kernel: &'a D::Kernel,
  layout: TensorLayout,
) -> Result<Box<dyn ImagePreprocessor<D> + 'a>, ConfigurationError> {
  debug!("选择 {} 预处理器", layout);
  Ok(match layout {
    TensorLayout::Nchw => Box::new(NchwPreprocessor::new(device, kernel)?),
    TensorLayout::Nhwc => Box::new(NhwcPreprocessor::new(device, kernel)?),
  })
}

/// 把模型原始输出写入顶点缓冲区
pub struct Postprocessor<'a, D: ComputeDevice> {
  kernel: &'a D::Kernel,
  groups: ThreadGroups,
}

impl<'a, D: ComputeDevice> Postprocessor<'a, D> {
  pub fn new(device: &D, kernel: &'a D::Kernel) -> Result<Self, ConfigurationError> {
    let groups = exact_groups(
      device,
      kernel,
      "postprocess",
      POSTPROCESS_PASS,
      POSTPROCESS_EXTENT,
    )?;
    Ok(Self { kernel, groups })
  }

  pub fn groups(&self) -> ThreadGroups {
    self.groups
  }

  pub fn dispatch(
    &self,
    device: &D,
    output: &D::Buffer,
    vertices: &D::Buffer,
  ) -> Result<(), DeviceError> {
    device.dispatch(
      self.kernel,
      POSTPROCESS_PASS,
      Bindings {
        source: KernelSource::Buffer(output),
        target: vertices,
      },
      self.groups,
    )
  }
}
