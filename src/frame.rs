// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

pub const RGB_CHANNELS: usize = 3;

/// 任意分辨率的 RGB 帧，像素按 HWC 紧密排列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl RgbFrame {
  /// 全黑的帧，尺寸与 [`RgbFrame::from_raw`] 一样按 (宽, 高) 给出
  pub fn with_shape(width: u32, height: u32) -> Self {
    let data = vec![0u8; RGB_CHANNELS * width as usize * height as usize].into_boxed_slice();
    Self {
      width,
      height,
      data,
    }
  }

  /// 数据长度与尺寸不符时返回 None
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
    if data.len() != RGB_CHANNELS * width as usize * height as usize {
      return None;
    }

    Some(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
    let index = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
    [self.data[index], self.data[index + 1], self.data[index + 2]]
  }

  pub fn as_hwc(&self) -> &[u8] {
    &self.data
  }
}

impl AsMut<[u8]> for RgbFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

#[cfg(feature = "image")]
impl From<image::RgbImage> for RgbFrame {
  fn from(image: image::RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

#[cfg(feature = "image")]
impl RgbFrame {
  pub fn to_rgb_image(&self) -> image::RgbImage {
    // 长度在构造时已校验
    image::RgbImage::from_raw(self.width, self.height, self.data.to_vec())
      .unwrap_or_else(|| image::RgbImage::new(self.width, self.height))
  }
}
