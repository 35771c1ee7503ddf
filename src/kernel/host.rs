// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/kernel/host.rs - 主机设备上的计算内核
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

use std::fmt;

use crate::{
  device::WorkgroupSize,
  frame::RgbFrame,
  kernel::{POSTPROCESS_PASS, PREPROCESS_PASS_NCHW, PREPROCESS_PASS_NHWC},
  landmark::{OUTPUT_COMPONENTS, VERTEX_COUNT},
  tensor::{IMAGE_SIZE, INPUT_CHANNELS, TensorLayout},
};

pub const PREPROCESS_WORKGROUP: WorkgroupSize = WorkgroupSize::new(8, 8, 1);
pub const POSTPROCESS_WORKGROUP: WorkgroupSize = WorkgroupSize::new(52, 1, 1);

/// 内核调用看到的输入
pub enum KernelInput<'a> {
  Texture(&'a RgbFrame),
  Buffer(&'a [f32]),
}

/// 单个线程的执行上下文
///
/// 越界的读取返回 0，越界的写入被丢弃。
pub struct Invocation<'a> {
  id: [u32; 3],
  source: &'a KernelInput<'a>,
  target: &'a mut [f32],
  stride: usize,
}

impl<'a> Invocation<'a> {
  pub(crate) fn new(
    id: [u32; 3],
    source: &'a KernelInput<'a>,
    target: &'a mut [f32],
    stride: usize,
  ) -> Self {
    Self {
      id,
      source,
      target,
      stride,
    }
  }

  /// 全局线程编号
  pub fn id(&self) -> [u32; 3] {
    self.id
  }

  /// 输出缓冲区每条记录的元素数
  pub fn stride(&self) -> usize {
    self.stride
  }

  pub fn texture(&self) -> Option<&RgbFrame> {
    match self.source {
      KernelInput::Texture(frame) => Some(frame),
      KernelInput::Buffer(_) => None,
    }
  }

  pub fn load(&self, index: usize) -> f32 {
    match self.source {
      KernelInput::Buffer(data) => data.get(index).copied().unwrap_or(0.0),
      KernelInput::Texture(_) => 0.0,
    }
  }

  pub fn store(&mut self, index: usize, value: f32) {
    if let Some(slot) = self.target.get_mut(index) {
      *slot = value;
    }
  }

  /// 写入第 `record` 条记录，多余的分量被忽略
  pub fn store_record(&mut self, record: usize, values: &[f32]) {
    let start = record * self.stride;
    for (offset, value) in values.iter().take(self.stride).enumerate() {
      self.store(start + offset, *value);
    }
  }

  /// 双线性采样，坐标超出范围时取边缘像素，返回 [0, 1] 范围的 RGB
  pub fn sample_bilinear(&self, u: f32, v: f32) -> [f32; 3] {
    let Some(frame) = self.texture() else {
      return [0.0; 3];
    };
    if frame.is_empty() {
      return [0.0; 3];
    }

    let (width, height) = (frame.width(), frame.height());
    let px = u * width as f32 - 0.5;
    let py = v * height as f32 - 0.5;
    let (fx0, fy0) = (px.floor(), py.floor());
    let (tx, ty) = (px - fx0, py - fy0);

    let clamp_x = |x: f32| (x.max(0.0) as u32).min(width - 1);
    let clamp_y = |y: f32| (y.max(0.0) as u32).min(height - 1);
    let (x0, x1) = (clamp_x(fx0), clamp_x(fx0 + 1.0));
    let (y0, y1) = (clamp_y(fy0), clamp_y(fy0 + 1.0));

    let p00 = frame.pixel(x0, y0);
    let p10 = frame.pixel(x1, y0);
    let p01 = frame.pixel(x0, y1);
    let p11 = frame.pixel(x1, y1);

    let mut rgb = [0.0; 3];
    for (c, value) in rgb.iter_mut().enumerate() {
      let top = lerp(p00[c] as f32, p10[c] as f32, tx);
      let bottom = lerp(p01[c] as f32, p11[c] as f32, tx);
      *value = lerp(top, bottom, ty) / 255.0;
    }
    rgb
  }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
  a + (b - a) * t
}

type PassBody = dyn Fn(&mut Invocation<'_>) + Send + Sync;

/// 内核的一个入口
pub struct HostPass {
  workgroup: WorkgroupSize,
  body: Box<PassBody>,
}

impl HostPass {
  pub fn workgroup(&self) -> WorkgroupSize {
    self.workgroup
  }

  pub(crate) fn run(&self, invocation: &mut Invocation<'_>) {
    (self.body)(invocation)
  }
}

/// 主机设备的计算内核，入口按添加顺序编号
pub struct HostKernel {
  name: String,
  passes: Vec<HostPass>,
}

impl HostKernel {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      passes: Vec::new(),
    }
  }

  pub fn with_pass<F>(mut self, workgroup: WorkgroupSize, body: F) -> Self
  where
    F: Fn(&mut Invocation<'_>) + Send + Sync + 'static,
  {
    self.passes.push(HostPass {
      workgroup,
      body: Box::new(body),
    });
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn pass(&self, index: usize) -> Option<&HostPass> {
    self.passes.get(index)
  }

  pub fn pass_count(&self) -> usize {
    self.passes.len()
  }

  /// 预处理内核：缩放到 192x192，RGB 归一化到 [0, 1]
  pub fn preprocess() -> Self {
    Self::new("preprocess")
      .with_pass(PREPROCESS_WORKGROUP, preprocess_nhwc)
      .with_pass(PREPROCESS_WORKGROUP, preprocess_nchw)
  }

  /// 后处理内核：把模型输出的像素坐标转换为归一化顶点
  pub fn postprocess() -> Self {
    Self::new("postprocess").with_pass(POSTPROCESS_WORKGROUP, postprocess_vertex)
  }
}

// 内置内核的入口顺序
const _: () = assert!(
  PREPROCESS_PASS_NHWC == 0 && PREPROCESS_PASS_NCHW == 1 && POSTPROCESS_PASS == 0
);

impl fmt::Debug for HostKernel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let workgroups: Vec<_> = self.passes.iter().map(HostPass::workgroup).collect();
    f.debug_struct("HostKernel")
      .field("name", &self.name)
      .field("passes", &workgroups)
      .finish()
  }
}

fn preprocess_texel(invocation: &mut Invocation<'_>, layout: TensorLayout) {
  let [x, y, _] = invocation.id();
  let (x, y) = (x as usize, y as usize);
  if x >= IMAGE_SIZE || y >= IMAGE_SIZE {
    return;
  }

  // 采样像素中心
  let u = (x as f32 + 0.5) / IMAGE_SIZE as f32;
  let v = (y as f32 + 0.5) / IMAGE_SIZE as f32;
  let rgb = invocation.sample_bilinear(u, v);

  for (c, value) in rgb.into_iter().enumerate() {
    let index = layout.index(c, y, x, INPUT_CHANNELS, IMAGE_SIZE, IMAGE_SIZE);
    invocation.store(index, value);
  }
}

fn preprocess_nhwc(invocation: &mut Invocation<'_>) {
  preprocess_texel(invocation, TensorLayout::Nhwc)
}

fn preprocess_nchw(invocation: &mut Invocation<'_>) {
  preprocess_texel(invocation, TensorLayout::Nchw)
}

fn postprocess_vertex(invocation: &mut Invocation<'_>) {
  let id = invocation.id()[0] as usize;
  if id >= VERTEX_COUNT {
    return;
  }

  let size = IMAGE_SIZE as f32;
  let base = id * OUTPUT_COMPONENTS;
  let x = invocation.load(base);
  let y = invocation.load(base + 1);
  let z = invocation.load(base + 2);
  invocation.store_record(id, &[x / size, y / size, z / size, 1.0]);
}
