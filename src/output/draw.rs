// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/output/draw.rs - 人脸关键点可视化
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

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;

use crate::{frame::RgbFrame, landmark::Vertex};

const MARKER_RADIUS: i32 = 1;
const MARKER_COLOR: [u8; 3] = [0, 255, 0]; // 绿色

pub struct Draw {
  radius: i32,
  color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      radius: MARKER_RADIUS,
      color: MARKER_COLOR,
    }
  }
}

impl Draw {
  pub fn with_radius(mut self, radius: i32) -> Self {
    self.radius = radius;
    self
  }

  pub fn with_color(mut self, color: [u8; 3]) -> Self {
    self.color = color;
    self
  }

  /// 关键点坐标相对整幅图像归一化，按图像尺寸还原为像素坐标
  pub fn draw_landmarks_on_image(&self, image: &mut RgbImage, vertices: &[Vertex]) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    for vertex in vertices {
      let x = (vertex.x * w).round() as i32;
      let y = (vertex.y * h).round() as i32;
      if x < 0 || y < 0 || x >= w as i32 || y >= h as i32 {
        continue;
      }
      draw_filled_circle_mut(image, (x, y), self.radius, Rgb(self.color));
    }
  }

  pub fn draw_landmarks(&self, frame: &RgbFrame, vertices: &[Vertex]) -> RgbImage {
    let mut image = frame.to_rgb_image();
    self.draw_landmarks_on_image(&mut image, vertices);
    image
  }
}
