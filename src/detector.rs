// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/detector.rs - 人脸关键点检测器
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

use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  cache::ReadbackCache,
  device::{ComputeDevice, DeviceError},
  frame::RgbFrame,
  kernel::{ImagePreprocessor, Postprocessor, select_preprocessor},
  landmark::{OUTPUT_COMPONENTS, VERTEX_COUNT, VERTEX_STRIDE, Vertex},
  resource::{ConfigurationError, ResourceSet},
  tensor::{InputTensor, TensorLayout, TensorShape},
  worker::{Graph, InferenceWorker},
};

/// 调用方违反使用约定
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PreconditionViolation {
  #[error("检测器已释放")]
  Disposed,
  #[error("输入图像为空: {width}x{height}")]
  EmptyImage { width: u32, height: u32 },
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("配置错误: {0}")]
  Configuration(#[from] ConfigurationError),
  #[error("调用错误: {0}")]
  Precondition(#[from] PreconditionViolation),
  #[error("设备错误: {0}")]
  Device(#[from] DeviceError),
}

struct DetectorObjects<'a, D: ComputeDevice + 'a, W> {
  worker: W,
  preprocessor: Box<dyn ImagePreprocessor<D> + 'a>,
  postprocessor: Postprocessor<'a, D>,
  tensor: InputTensor<D>,
  vertices: D::Buffer,
  cache: ReadbackCache,
}

/// 468 点人脸关键点检测器
///
/// 每帧依次在设备上执行预处理、推理与后处理，结果写入常驻设备的顶点缓冲区。
/// 渲染端可以直接绑定 [`FaceLandmarkDetector::vertex_buffer`]，
/// 需要在主机上使用结果时调用 [`FaceLandmarkDetector::vertex_array`]，
/// 只有这一步会等待设备。
///
/// 检测器被丢弃时自动释放全部设备资源。
pub struct FaceLandmarkDetector<'a, D: ComputeDevice + 'a, W: InferenceWorker<D>> {
  device: D,
  layout: TensorLayout,
  objects: Option<DetectorObjects<'a, D, W>>,
}

impl<'a, D: ComputeDevice + 'a, W: InferenceWorker<D>> FaceLandmarkDetector<'a, D, W> {
  /// 校验资源集合并分配全部设备资源，任何一步失败都会释放之前分配的资源
  pub fn new<G>(device: D, resources: &ResourceSet<'a, D, G>) -> Result<Self, DetectorError>
  where
    G: Graph<D, Worker = W>,
  {
    info!("创建人脸关键点检测器");
    let resolved = resources.resolve()?;

    let input_shape = resolved.model.input_shape();
    let expected = TensorShape::landmark_input(input_shape.layout);
    if input_shape != expected {
      error!("模型输入形状 {} 与期望的 {} 不一致", input_shape, expected);
      return Err(
        ConfigurationError::InputShapeMismatch {
          expected,
          actual: input_shape,
        }
        .into(),
      );
    }

    let output_len = resolved.model.output_len();
    let required = VERTEX_COUNT * OUTPUT_COMPONENTS;
    if output_len < required {
      error!("模型输出只有 {} 个元素, 至少需要 {}", output_len, required);
      return Err(
        ConfigurationError::OutputTooSmall {
          expected: required,
          actual: output_len,
        }
        .into(),
      );
    }

    let preprocessor = select_preprocessor(&device, resolved.preprocess, input_shape.layout)?;
    let postprocessor = Postprocessor::new(&device, resolved.postprocess)?;

    debug!("创建推理执行器");
    let worker = resolved.model.create_worker(&device)?;
    let tensor = InputTensor::allocate(&device, input_shape)?;
    let vertices = device.create_buffer("vertices", VERTEX_COUNT, VERTEX_STRIDE)?;
    let cache = ReadbackCache::new(VERTEX_COUNT);

    info!(
      "检测器就绪: 输入张量 {}, {} 个关键点",
      input_shape, VERTEX_COUNT
    );

    Ok(Self {
      device,
      layout: input_shape.layout,
      objects: Some(DetectorObjects {
        worker,
        preprocessor,
        postprocessor,
        tensor,
        vertices,
        cache,
      }),
    })
  }

  fn objects(&self) -> Result<&DetectorObjects<'a, D, W>, PreconditionViolation> {
    self.objects.as_ref().ok_or(PreconditionViolation::Disposed)
  }

  pub fn device(&self) -> &D {
    &self.device
  }

  /// 模型输入张量的布局，决定使用的预处理入口
  pub fn layout(&self) -> TensorLayout {
    self.layout
  }

  pub fn is_disposed(&self) -> bool {
    self.objects.is_none()
  }

  /// 处理一帧图像，结果留在设备上
  ///
  /// 不等待设备完成，回读缓存在提交任何工作之前失效。
  pub fn process(&mut self, frame: &RgbFrame) -> Result<(), DetectorError> {
    let objects = self
      .objects
      .as_mut()
      .ok_or(PreconditionViolation::Disposed)?;

    if frame.is_empty() {
      return Err(
        PreconditionViolation::EmptyImage {
          width: frame.width(),
          height: frame.height(),
        }
        .into(),
      );
    }

    objects.cache.invalidate();

    debug!("处理图像: {}x{}", frame.width(), frame.height());
    let texture = self.device.upload_texture(frame)?;
    objects
      .preprocessor
      .dispatch(&self.device, &texture, &objects.tensor)?;
    objects.worker.execute(&self.device, &objects.tensor)?;
    objects
      .postprocessor
      .dispatch(&self.device, objects.worker.output(), &objects.vertices)?;
    Ok(())
  }

  /// 设备上的顶点缓冲区，468 条 (x, y, z, w) 记录，在检测器存活期间保持不变
  pub fn vertex_buffer(&self) -> Result<&D::Buffer, DetectorError> {
    Ok(&self.objects()?.vertices)
  }

  /// 主机端的关键点数组，首次调用会等待设备并拷贝结果
  pub fn vertex_array(&mut self) -> Result<&[Vertex], DetectorError> {
    let objects = self
      .objects
      .as_mut()
      .ok_or(PreconditionViolation::Disposed)?;
    Ok(objects.cache.read(&self.device, &objects.vertices)?)
  }

  pub fn input_tensor(&self) -> Result<&InputTensor<D>, DetectorError> {
    Ok(&self.objects()?.tensor)
  }

  /// 释放推理执行器、输入张量与顶点缓冲区，重复调用没有效果
  pub fn dispose(&mut self) {
    if let Some(objects) = self.objects.take() {
      let DetectorObjects {
        worker,
        tensor,
        vertices,
        ..
      } = objects;

      drop(worker);
      drop(tensor);
      drop(vertices);
      info!("检测器资源已释放");
    }
  }
}

impl<'a, D: ComputeDevice + 'a, W: InferenceWorker<D>> Drop for FaceLandmarkDetector<'a, D, W> {
  fn drop(&mut self) {
    self.dispose();
  }
}
