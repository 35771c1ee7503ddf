// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/worker.rs - 推理计算图与推理执行器
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

use crate::{
  device::{ComputeDevice, DeviceError},
  tensor::{InputTensor, TensorShape},
};

/// 绑定到设备上的推理执行器
///
/// 执行结果写入 [`InferenceWorker::output`] 返回的缓冲区，
/// 后续调度通过设备的提交顺序看到该结果。
pub trait InferenceWorker<D: ComputeDevice> {
  fn execute(&mut self, device: &D, input: &InputTensor<D>) -> Result<(), DeviceError>;

  /// 原始输出，至少 468 × 3 个 f32
  fn output(&self) -> &D::Buffer;
}

/// 可加载的推理计算图
pub trait Graph<D: ComputeDevice> {
  type Worker: InferenceWorker<D>;

  /// 计算图声明的输入形状，包含张量布局
  fn input_shape(&self) -> TensorShape;

  /// 输出的 f32 元素数
  fn output_len(&self) -> usize;

  fn create_worker(&self, device: &D) -> Result<Self::Worker, DeviceError>;
}

mod host;
pub use self::host::{HostGraph, HostWorker};

#[cfg(feature = "rknpu")]
mod rknn;
#[cfg(feature = "rknpu")]
pub use self::rknn::{RknnModel, RknnModelBuilder, RknnModelError, RknnWorker};
