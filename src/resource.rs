// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/resource.rs - 检测器资源集合
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
use tracing::error;

use crate::{
  device::{ComputeDevice, WorkgroupSize},
  tensor::TensorShape,
  worker::Graph,
};

/// 构造检测器时发现的配置错误，均为致命错误
#[derive(Error, Debug)]
pub enum ConfigurationError {
  #[error("资源集合中缺少关键点模型")]
  MissingModel,
  #[error("资源集合中缺少预处理内核")]
  MissingPreprocessKernel,
  #[error("资源集合中缺少后处理内核")]
  MissingPostprocessKernel,
  #[error("模型输入形状不匹配: 期望 {expected}, 实际 {actual}")]
  InputShapeMismatch {
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("模型输出过小: 至少需要 {expected} 个元素, 实际 {actual} 个元素")]
  OutputTooSmall { expected: usize, actual: usize },
  #[error("{kernel} 内核缺少第 {pass} 个入口")]
  MissingKernelPass { kernel: &'static str, pass: usize },
  #[error("{kernel} 内核的线程组大小 {workgroup} 无法铺满 {extent:?}")]
  WorkgroupMismatch {
    kernel: &'static str,
    workgroup: WorkgroupSize,
    extent: (u32, u32, u32),
  },
}

/// 构造检测器所需的外部资源：模型与两个计算内核
///
/// 资源由调用方持有，检测器只借用它们。
pub struct ResourceSet<'a, D: ComputeDevice, G> {
  model: Option<&'a G>,
  preprocess: Option<&'a D::Kernel>,
  postprocess: Option<&'a D::Kernel>,
}

pub(crate) struct ResolvedResources<'a, D: ComputeDevice, G> {
  pub model: &'a G,
  pub preprocess: &'a D::Kernel,
  pub postprocess: &'a D::Kernel,
}

impl<D: ComputeDevice, G> Default for ResourceSet<'_, D, G> {
  fn default() -> Self {
    Self {
      model: None,
      preprocess: None,
      postprocess: None,
    }
  }
}

impl<'a, D: ComputeDevice, G: Graph<D>> ResourceSet<'a, D, G> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_model(mut self, model: &'a G) -> Self {
    self.model = Some(model);
    self
  }

  pub fn with_preprocess(mut self, kernel: &'a D::Kernel) -> Self {
    self.preprocess = Some(kernel);
    self
  }

  pub fn with_postprocess(mut self, kernel: &'a D::Kernel) -> Self {
    self.postprocess = Some(kernel);
    self
  }

  pub(crate) fn resolve(&self) -> Result<ResolvedResources<'a, D, G>, ConfigurationError> {
    let model = self.model.ok_or_else(|| {
      error!("资源集合中缺少关键点模型");
      ConfigurationError::MissingModel
    })?;
    let preprocess = self.preprocess.ok_or_else(|| {
      error!("资源集合中缺少预处理内核");
      ConfigurationError::MissingPreprocessKernel
    })?;
    let postprocess = self.postprocess.ok_or_else(|| {
      error!("资源集合中缺少后处理内核");
      ConfigurationError::MissingPostprocessKernel
    })?;
    Ok(ResolvedResources {
      model,
      preprocess,
      postprocess,
    })
  }
}
