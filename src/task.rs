// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/task.rs - 检测任务
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

use std::{
  thread,
  time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::{
  detector::FaceLandmarkDetector, device::ComputeDevice, frame::RgbFrame, landmark::Vertex,
  output::Render, worker::InferenceWorker,
};

pub trait Task<I, O>: Sized {
  type Error;
  fn run_task<D: ComputeDevice, W: InferenceWorker<D>>(
    self,
    input: I,
    detector: &mut FaceLandmarkDetector<'_, D, W>,
    output: O,
  ) -> Result<(), Self::Error>;
}

/// 处理一帧并回读关键点，返回 (提交耗时, 总耗时)
fn detect_frame<D: ComputeDevice, W: InferenceWorker<D>, O: Render<RgbFrame, [Vertex]>>(
  frame: &RgbFrame,
  detector: &mut FaceLandmarkDetector<'_, D, W>,
  output: &O,
) -> anyhow::Result<(Duration, Duration)>
where
  O::Error: std::error::Error + Send + Sync + 'static,
{
  let now = Instant::now();
  detector.process(frame)?;
  let submitted = now.elapsed();
  let vertices = detector.vertex_array()?;
  let finished = now.elapsed();
  output.render_result(frame, vertices)?;
  Ok((submitted, finished))
}

pub struct OneShotTask;

impl<RE, I, O> Task<I, O> for OneShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = RgbFrame>,
  O: Render<RgbFrame, [Vertex], Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task<D: ComputeDevice, W: InferenceWorker<D>>(
    self,
    mut input: I,
    detector: &mut FaceLandmarkDetector<'_, D, W>,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!(
      "输入帧获取成功 ({}x{})，开始检测...",
      frame.width(),
      frame.height()
    );
    let (submitted, finished) = detect_frame(&frame, detector, &output)?;
    info!("检测完成，提交耗时: {:.2?}, 总耗时: {:.2?}", submitted, finished);
    Ok(())
  }
}

pub struct RepeatShotTask {
  repeat_times: usize,
}

const REPEAT_TIMES: usize = 1000;
// 前几次运行包含缓存预热，不计入平均值
const WARMUP_TIMES: usize = 2;

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      repeat_times: REPEAT_TIMES,
    }
  }
}

impl RepeatShotTask {
  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times;
    self
  }
}

/// 去掉预热部分后的平均耗时
pub fn average_after_warmup(times: &[Duration]) -> Option<Duration> {
  let measured = times.get(WARMUP_TIMES..)?;
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<RE, I, O> Task<I, O> for RepeatShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = RgbFrame>,
  O: Render<RgbFrame, [Vertex], Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task<D: ComputeDevice, W: InferenceWorker<D>>(
    self,
    mut input: I,
    detector: &mut FaceLandmarkDetector<'_, D, W>,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始检测...");
    let mut times = Vec::with_capacity(self.repeat_times);
    for i in 0..self.repeat_times {
      let (submitted, finished) = detect_frame(&frame, detector, &output)?;
      info!(
        "({})检测完成，提交耗时: {:.2?}, 总耗时: {:.2?}",
        i, submitted, finished
      );
      times.push(finished);
    }

    match average_after_warmup(&times) {
      Some(average) => warn!("平均检测时间: {:.2?}", average),
      None => warn!("运行次数不足 {} 次，无法统计平均时间", WARMUP_TIMES + 1),
    }

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<RE, I, O> Task<I, O> for ContinuousTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = RgbFrame>,
  O: Render<RgbFrame, [Vertex], Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task<D: ComputeDevice, W: InferenceWorker<D>>(
    self,
    input: I,
    detector: &mut FaceLandmarkDetector<'_, D, W>,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let mut frame_index = 0usize;
    for frame in input {
      frame_index = frame_index.wrapping_add(1);
      info!(
        "处理第 {} 帧图像 ({}x{})",
        frame_index,
        frame.width(),
        frame.height()
      );
      let (submitted, finished) = detect_frame(&frame, detector, &output)?;
      info!("检测完成，提交耗时: {:.2?} / 总耗时: {:.2?}", submitted, finished);
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 帧", frame_index);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn average_skips_warmup_runs() {
    let times = [
      Duration::from_millis(100),
      Duration::from_millis(50),
      Duration::from_millis(10),
      Duration::from_millis(20),
    ];
    assert_eq!(average_after_warmup(&times), Some(Duration::from_millis(15)));
  }

  #[test]
  fn average_needs_measured_runs() {
    assert_eq!(average_after_warmup(&[]), None);
    assert_eq!(
      average_after_warmup(&[Duration::from_millis(1), Duration::from_millis(2)]),
      None
    );
  }
}
