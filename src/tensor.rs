// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/tensor.rs - 输入张量定义
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

use std::{fmt, str::FromStr};

use tracing::debug;

use crate::device::{ComputeDevice, DeviceError};

/// 模型输入图像边长
pub const IMAGE_SIZE: usize = 192;
pub const INPUT_CHANNELS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorLayout {
  Nchw,
  Nhwc,
}

impl TensorLayout {
  /// 元素 (c, h, w) 在 batch 0 中的线性下标
  pub fn index(
    self,
    c: usize,
    h: usize,
    w: usize,
    channels: usize,
    height: usize,
    width: usize,
  ) -> usize {
    match self {
      TensorLayout::Nchw => c * height * width + h * width + w,
      TensorLayout::Nhwc => (h * width + w) * channels + c,
    }
  }
}

impl fmt::Display for TensorLayout {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TensorLayout::Nchw => write!(f, "NCHW"),
      TensorLayout::Nhwc => write!(f, "NHWC"),
    }
  }
}

impl FromStr for TensorLayout {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "nchw" => Ok(TensorLayout::Nchw),
      "nhwc" => Ok(TensorLayout::Nhwc),
      other => Err(format!("未知的张量布局: {}", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
  pub batch: usize,
  pub height: usize,
  pub width: usize,
  pub channels: usize,
  pub layout: TensorLayout,
}

impl TensorShape {
  pub const fn new(
    batch: usize,
    height: usize,
    width: usize,
    channels: usize,
    layout: TensorLayout,
  ) -> Self {
    Self {
      batch,
      height,
      width,
      channels,
      layout,
    }
  }

  /// 关键点模型要求的输入形状
  pub const fn landmark_input(layout: TensorLayout) -> Self {
    Self::new(1, IMAGE_SIZE, IMAGE_SIZE, INPUT_CHANNELS, layout)
  }

  pub fn dims(&self) -> [usize; 4] {
    match self.layout {
      TensorLayout::Nchw => [self.batch, self.channels, self.height, self.width],
      TensorLayout::Nhwc => [self.batch, self.height, self.width, self.channels],
    }
  }

  pub fn len(&self) -> usize {
    self.batch * self.height * self.width * self.channels
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl fmt::Display for TensorShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let [a, b, c, d] = self.dims();
    write!(f, "{}x{}x{}x{} ({})", a, b, c, d, self.layout)
  }
}

/// 设备上的输入张量
///
/// 缓冲区和张量形状一起分配、一起释放，不单独暴露缓冲区的所有权。
pub struct InputTensor<D: ComputeDevice> {
  shape: TensorShape,
  buffer: D::Buffer,
}

impl<D: ComputeDevice> InputTensor<D> {
  pub fn allocate(device: &D, shape: TensorShape) -> Result<Self, DeviceError> {
    debug!("分配输入张量: {}", shape);
    let buffer = device.create_buffer("input-tensor", shape.len(), 1)?;
    Ok(Self { shape, buffer })
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  pub fn buffer(&self) -> &D::Buffer {
    &self.buffer
  }

  pub fn len(&self) -> usize {
    self.shape.len()
  }

  pub fn is_empty(&self) -> bool {
    self.shape.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::HostDevice;

  #[test]
  fn landmark_input_dims_follow_layout() {
    let nchw = TensorShape::landmark_input(TensorLayout::Nchw);
    let nhwc = TensorShape::landmark_input(TensorLayout::Nhwc);
    assert_eq!(nchw.dims(), [1, 3, 192, 192]);
    assert_eq!(nhwc.dims(), [1, 192, 192, 3]);
    assert_eq!(nchw.len(), 3 * 192 * 192);
    assert_eq!(nhwc.len(), nchw.len());
    assert_ne!(nchw, nhwc);
  }

  #[test]
  fn layout_index() {
    // 2 通道、2x3 的张量
    assert_eq!(TensorLayout::Nchw.index(1, 0, 2, 2, 2, 3), 6 + 2);
    assert_eq!(TensorLayout::Nhwc.index(1, 0, 2, 2, 2, 3), 2 * 2 + 1);
    assert_eq!(TensorLayout::Nhwc.index(0, 1, 0, 2, 2, 3), 6);
  }

  #[test]
  fn layout_from_str() {
    assert_eq!("NCHW".parse::<TensorLayout>(), Ok(TensorLayout::Nchw));
    assert_eq!("nhwc".parse::<TensorLayout>(), Ok(TensorLayout::Nhwc));
    assert!("chw".parse::<TensorLayout>().is_err());
  }

  #[test]
  fn shape_display() {
    let shape = TensorShape::landmark_input(TensorLayout::Nchw);
    assert_eq!(shape.to_string(), "1x3x192x192 (NCHW)");
  }

  #[test]
  fn input_tensor_owns_its_buffer() {
    let device = HostDevice::new();
    let tensor =
      InputTensor::allocate(&device, TensorShape::landmark_input(TensorLayout::Nhwc)).unwrap();
    assert_eq!(tensor.len(), 110_592);
    assert_eq!(device.buffer_len(tensor.buffer()), 110_592);
    assert_eq!(device.live_buffers(), 1);
    drop(tensor);
    assert_eq!(device.live_buffers(), 0);
  }
}
