// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/bin/simple_continueshot.rs - 连续处理输入源中的每一帧
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use lianpu::{
  FaceLandmarkDetector, FromUrl, ResourceSet,
  device::HostDevice,
  input::InputWrapper,
  kernel::HostKernel,
  output::OutputWrapper,
  task::{ContinuousTask, Task},
  worker::RknnModelBuilder,
};
use tracing::info;

/// Lianpu 连续检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// RKNN 模型路径，例如 rknn:///path/model.rknn?layout=nhwc
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 最多处理的帧数
  #[arg(long, value_name = "FRAMES")]
  pub frames: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let model = RknnModelBuilder::from_url(&args.model)?.build()?;
  let output = OutputWrapper::from_url(&args.output)?;

  let preprocess = HostKernel::preprocess();
  let postprocess = HostKernel::postprocess();
  let resources = ResourceSet::<HostDevice, _>::new()
    .with_model(&model)
    .with_preprocess(&preprocess)
    .with_postprocess(&postprocess);
  let mut detector = FaceLandmarkDetector::new(HostDevice::new(), &resources)?;

  ContinuousTask::default()
    .with_frame_number(args.frames)
    .run_task(input, &mut detector, output)?;

  detector.dispose();
  Ok(())
}
