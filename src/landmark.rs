// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/landmark.rs - 人脸关键点定义
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

use bytemuck::{Pod, Zeroable};

/// 人脸网格的关键点数量，后处理调度、顶点缓冲区与回读缓存共用
pub const VERTEX_COUNT: usize = 468;

/// 每个顶点的 f32 分量数
pub const VERTEX_STRIDE: usize = 4;

/// 模型每个顶点输出的分量数 (x, y, z)
pub const OUTPUT_COMPONENTS: usize = 3;

/// 单个关键点，坐标相对于模型输入图像归一化，w 固定为 1
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
  pub x: f32,
  pub y: f32,
  pub z: f32,
  pub w: f32,
}

impl Vertex {
  pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
    Self { x, y, z, w }
  }

  pub fn position(&self) -> [f32; 3] {
    [self.x, self.y, self.z]
  }

  pub fn to_array(self) -> [f32; 4] {
    [self.x, self.y, self.z, self.w]
  }
}

impl From<[f32; 4]> for Vertex {
  fn from([x, y, z, w]: [f32; 4]) -> Self {
    Self { x, y, z, w }
  }
}

const _: () = assert!(size_of::<Vertex>() == VERTEX_STRIDE * size_of::<f32>());
