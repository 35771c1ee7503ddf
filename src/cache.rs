// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/cache.rs - 顶点回读缓存
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

use tracing::debug;

use crate::{
  device::{ComputeDevice, DeviceError},
  landmark::Vertex,
};

/// 顶点缓冲区在主机内存中的镜像
///
/// 每次推理后失效，只有主机端真正读取时才从设备拷贝，
/// 只需要设备端结果的帧不会因此等待设备。
#[derive(Debug)]
pub struct ReadbackCache {
  data: Box<[Vertex]>,
  fresh: bool,
}

impl ReadbackCache {
  pub fn new(count: usize) -> Self {
    Self {
      data: vec![Vertex::default(); count].into_boxed_slice(),
      fresh: false,
    }
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn is_fresh(&self) -> bool {
    self.fresh
  }

  pub fn invalidate(&mut self) {
    self.fresh = false;
  }

  /// 缓存有效时直接返回；否则阻塞地从设备拷贝全部记录
  pub fn read<D: ComputeDevice>(
    &mut self,
    device: &D,
    buffer: &D::Buffer,
  ) -> Result<&[Vertex], DeviceError> {
    if !self.fresh {
      debug!("回读缓存失效，从设备拷贝 {} 个顶点", self.data.len());
      device.read_buffer(buffer, bytemuck::cast_slice_mut(&mut self.data[..]))?;
      self.fresh = true;
    }
    Ok(&self.data)
  }
}
