// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/worker/rknn.rs - RKNN NPU 推理执行器
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

use std::rc::Rc;

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info, trace};
use url::Url;

use crate::{
  FromUrl,
  device::{ComputeDevice, DeviceError, HostBuffer, HostDevice, LiveGuard},
  landmark::{OUTPUT_COMPONENTS, VERTEX_COUNT},
  tensor::{InputTensor, TensorLayout, TensorShape},
  worker::{Graph, InferenceWorker},
};

const RKNN_SCHEME: &str = "rknn";
const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_MIN_OUTPUTS: u32 = 1;
const RKNN_OUTPUT_LEN: usize = VERTEX_COUNT * OUTPUT_COMPONENTS;

#[derive(Error, Debug)]
pub enum RknnModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型参数错误: {0}")]
  ParameterError(String),
}

impl From<std::io::Error> for RknnModelError {
  fn from(err: std::io::Error) -> Self {
    RknnModelError::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for RknnModelError {
  fn from(err: rknpu::Error) -> Self {
    RknnModelError::RknnError(err)
  }
}

impl RknnModelError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnModelError::ModelInvalid(msg.to_string(), e)
  }
}

/// 从 `rknn:///path/model.rknn?layout=nhwc` 形式的 URL 构建模型
pub struct RknnModelBuilder {
  model_path: String,
  layout: TensorLayout,
  flags: InitFlags,
}

impl FromUrl for RknnModelBuilder {
  type Error = RknnModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != RKNN_SCHEME {
      return Err(RknnModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        RKNN_SCHEME
      )));
    }

    let mut layout = TensorLayout::Nhwc;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "layout" => {
          layout = value.parse().map_err(RknnModelError::ParameterError)?;
        }
        other => {
          return Err(RknnModelError::ParameterError(format!(
            "未知的模型参数: {}",
            other
          )));
        }
      }
    }

    Ok(RknnModelBuilder {
      model_path: url.path().to_string(),
      layout,
      flags: InitFlags::default(),
    })
  }
}

impl RknnModelBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn layout(mut self, layout: TensorLayout) -> Self {
    self.layout = layout;
    self
  }

  pub fn build(self) -> Result<RknnModel, RknnModelError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(RknnModelError::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnModelError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnModelError::invalid("无法获取输出数量", e))?;

    if num_inputs != RKNN_NUM_INPUTS {
      let msg = format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      );
      error!("{}", msg);
      return Err(RknnModelError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    if num_outputs < RKNN_MIN_OUTPUTS {
      let msg = format!(
        "预期模型输出数量至少为 {}, 实际为 {}",
        RKNN_MIN_OUTPUTS, num_outputs
      );
      error!("{}", msg);
      return Err(RknnModelError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);
    info!("模型加载完成, 输入布局 {}", self.layout);

    Ok(RknnModel {
      context: Rc::new(context),
      input_shape: TensorShape::landmark_input(self.layout),
    })
  }
}

/// 运行在 RKNN NPU 上的关键点模型
///
/// NPU 直接读写主机内存，因此配合 [`HostDevice`] 使用。
pub struct RknnModel {
  context: Rc<Context>,
  input_shape: TensorShape,
}

impl Graph<HostDevice> for RknnModel {
  type Worker = RknnWorker;

  fn input_shape(&self) -> TensorShape {
    self.input_shape
  }

  fn output_len(&self) -> usize {
    RKNN_OUTPUT_LEN
  }

  fn create_worker(&self, device: &HostDevice) -> Result<RknnWorker, DeviceError> {
    let output = device.create_buffer("rknn-output", RKNN_OUTPUT_LEN, 1)?;
    Ok(RknnWorker {
      context: Rc::clone(&self.context),
      layout: self.input_shape.layout,
      input: vec![0.0; self.input_shape.len()].into_boxed_slice(),
      staging: vec![0; self.input_shape.len()].into_boxed_slice(),
      output,
      _live: device.worker_guard(),
    })
  }
}

pub struct RknnWorker {
  context: Rc<Context>,
  layout: TensorLayout,
  input: Box<[f32]>,
  staging: Box<[u8]>,
  output: HostBuffer,
  _live: LiveGuard,
}

fn rknn_failure(stage: &str, e: impl std::fmt::Display) -> DeviceError {
  error!("RKNN {}失败: {}", stage, e);
  DeviceError::Execution(format!("RKNN {}失败: {}", stage, e))
}

impl InferenceWorker<HostDevice> for RknnWorker {
  fn execute(
    &mut self,
    _device: &HostDevice,
    input: &InputTensor<HostDevice>,
  ) -> Result<(), DeviceError> {
    input.buffer().read_into(&mut self.input)?;

    // 量化为 u8 输入，模型内部完成归一化
    for (dst, src) in self.staging.iter_mut().zip(self.input.iter()) {
      *dst = (src * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    let format = match self.layout {
      TensorLayout::Nchw => TensorFormat::NCHW,
      TensorLayout::Nhwc => TensorFormat::NHWC,
    };

    trace!("设置模型输入");
    self
      .context
      .set_input(0, &self.staging[..], format, TensorType::UInt8)
      .map_err(|e| rknn_failure("设置输入", e))?;

    trace!("执行模型推理");
    self.context.run().map_err(|e| rknn_failure("推理", e))?;

    let outputs = self
      .context
      .get_outputs()
      .map_err(|e| rknn_failure("获取输出", e))?;
    let raw = outputs
      .get_f32(0)
      .map_err(|e| rknn_failure("读取第 0 个输出", e))?;

    if raw.len() < RKNN_OUTPUT_LEN {
      return Err(DeviceError::SizeMismatch {
        expected: RKNN_OUTPUT_LEN,
        actual: raw.len(),
      });
    }
    self.output.write(&raw[..RKNN_OUTPUT_LEN])
  }

  fn output(&self) -> &HostBuffer {
    &self.output
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_parses_layout_query() {
    let url = Url::parse("rknn:///opt/models/face_landmark.rknn?layout=nchw").unwrap();
    let builder = RknnModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, "/opt/models/face_landmark.rknn");
    assert_eq!(builder.layout, TensorLayout::Nchw);
  }

  #[test]
  fn builder_defaults_to_nhwc() {
    let url = Url::parse("rknn:///model.rknn").unwrap();
    let builder = RknnModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.layout, TensorLayout::Nhwc);
  }

  #[test]
  fn builder_rejects_other_schemes_and_parameters() {
    let url = Url::parse("onnx:///model.onnx").unwrap();
    assert!(matches!(
      RknnModelBuilder::from_url(&url),
      Err(RknnModelError::ModelPathError(_))
    ));

    let url = Url::parse("rknn:///model.rknn?layout=chw").unwrap();
    assert!(matches!(
      RknnModelBuilder::from_url(&url),
      Err(RknnModelError::ParameterError(_))
    ));

    let url = Url::parse("rknn:///model.rknn?size=256").unwrap();
    assert!(matches!(
      RknnModelBuilder::from_url(&url),
      Err(RknnModelError::ParameterError(_))
    ));
  }
}
