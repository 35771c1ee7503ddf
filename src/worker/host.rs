// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/worker/host.rs - 主机设备上的推理执行器
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

use std::{fmt, sync::Arc};

use tracing::{debug, trace};

use crate::{
  device::{ComputeDevice, DeviceError, HostBuffer, HostDevice, LiveGuard},
  tensor::{InputTensor, TensorShape},
  worker::{Graph, InferenceWorker},
};

type Forward = dyn Fn(&[f32], &mut [f32]) -> Result<(), DeviceError> + Send + Sync;

/// 由闭包定义前向计算的计算图
///
/// 闭包接收输入张量的全部元素，写入 `output_len` 个输出元素。
#[derive(Clone)]
pub struct HostGraph {
  input_shape: TensorShape,
  output_len: usize,
  forward: Arc<Forward>,
}

impl HostGraph {
  pub fn new<F>(input_shape: TensorShape, output_len: usize, forward: F) -> Self
  where
    F: Fn(&[f32], &mut [f32]) -> Result<(), DeviceError> + Send + Sync + 'static,
  {
    Self {
      input_shape,
      output_len,
      forward: Arc::new(forward),
    }
  }
}

impl fmt::Debug for HostGraph {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HostGraph")
      .field("input_shape", &self.input_shape)
      .field("output_len", &self.output_len)
      .finish_non_exhaustive()
  }
}

impl Graph<HostDevice> for HostGraph {
  type Worker = HostWorker;

  fn input_shape(&self) -> TensorShape {
    self.input_shape
  }

  fn output_len(&self) -> usize {
    self.output_len
  }

  fn create_worker(&self, device: &HostDevice) -> Result<HostWorker, DeviceError> {
    debug!(
      "创建主机推理执行器: 输入 {}, 输出 {} 个元素",
      self.input_shape, self.output_len
    );
    let output = device.create_buffer("graph-output", self.output_len, 1)?;
    Ok(HostWorker {
      forward: Arc::clone(&self.forward),
      input: vec![0.0; self.input_shape.len()].into_boxed_slice(),
      scratch: vec![0.0; self.output_len].into_boxed_slice(),
      output,
      _live: device.worker_guard(),
    })
  }
}

pub struct HostWorker {
  forward: Arc<Forward>,
  input: Box<[f32]>,
  scratch: Box<[f32]>,
  output: HostBuffer,
  _live: LiveGuard,
}

impl InferenceWorker<HostDevice> for HostWorker {
  fn execute(
    &mut self,
    _device: &HostDevice,
    input: &InputTensor<HostDevice>,
  ) -> Result<(), DeviceError> {
    trace!("主机推理: {}", input.shape());
    input.buffer().read_into(&mut self.input)?;
    (self.forward)(&self.input[..], &mut self.scratch[..])?;
    self.output.write(&self.scratch)
  }

  fn output(&self) -> &HostBuffer {
    &self.output
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::TensorLayout;

  #[test]
  fn worker_runs_forward_on_tensor_contents() {
    let device = HostDevice::new();
    let shape = TensorShape::new(1, 1, 2, 1, TensorLayout::Nhwc);
    let graph = HostGraph::new(shape, 2, |input, output| {
      output[0] = input[0] + input[1];
      output[1] = input[0] * input[1];
      Ok(())
    });

    let tensor = InputTensor::allocate(&device, shape).unwrap();
    tensor.buffer().write(&[3.0, 4.0]).unwrap();

    let mut worker = graph.create_worker(&device).unwrap();
    assert_eq!(device.live_workers(), 1);
    worker.execute(&device, &tensor).unwrap();

    let mut host = vec![0.0; 2];
    device.read_buffer(worker.output(), &mut host).unwrap();
    assert_eq!(host, vec![7.0, 12.0]);

    drop(worker);
    assert_eq!(device.live_workers(), 0);
  }

  #[test]
  fn forward_errors_reach_the_caller() {
    let device = HostDevice::new();
    let shape = TensorShape::new(1, 1, 1, 1, TensorLayout::Nchw);
    let graph = HostGraph::new(shape, 1, |_, _| {
      Err(DeviceError::Execution("模拟失败".to_string()))
    });
    let tensor = InputTensor::allocate(&device, shape).unwrap();
    let mut worker = graph.create_worker(&device).unwrap();
    let err = worker.execute(&device, &tensor).unwrap_err();
    assert!(matches!(err, DeviceError::Execution(_)));
  }
}
