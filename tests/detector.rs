// 该文件是 Lianpu （脸谱） 项目的一部分。
// tests/detector.rs - 检测器集成测试
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

use lianpu::{
  ConfigurationError, DetectorError, FaceLandmarkDetector, PreconditionViolation, ResourceSet,
  VERTEX_COUNT, Vertex,
  device::{ComputeDevice, DeviceError, HostDevice, HostLimits, WorkgroupSize},
  frame::RgbFrame,
  kernel::HostKernel,
  landmark::{OUTPUT_COMPONENTS, VERTEX_STRIDE},
  tensor::{TensorLayout, TensorShape},
  worker::{HostGraph, HostWorker},
};

const OUTPUT_LEN: usize = VERTEX_COUNT * OUTPUT_COMPONENTS;

type HostDetector<'a> = FaceLandmarkDetector<'a, HostDevice, HostWorker>;

fn solid_frame(width: u32, height: u32, value: u8) -> RgbFrame {
  RgbFrame::from_raw(
    width,
    height,
    vec![value; (width * height) as usize * 3],
  )
  .unwrap()
}

/// 输出的每个分量都等于输入张量第一个元素乘以 192
fn first_texel_graph(layout: TensorLayout) -> HostGraph {
  HostGraph::new(
    TensorShape::landmark_input(layout),
    OUTPUT_LEN,
    |input, output| {
      output.fill(input[0] * 192.0);
      Ok(())
    },
  )
}

struct Fixture {
  device: HostDevice,
  graph: HostGraph,
  preprocess: HostKernel,
  postprocess: HostKernel,
}

impl Fixture {
  fn new(graph: HostGraph) -> Self {
    Self::with_device(HostDevice::new(), graph)
  }

  fn with_device(device: HostDevice, graph: HostGraph) -> Self {
    Self {
      device,
      graph,
      preprocess: HostKernel::preprocess(),
      postprocess: HostKernel::postprocess(),
    }
  }

  fn resources(&self) -> ResourceSet<'_, HostDevice, HostGraph> {
    ResourceSet::new()
      .with_model(&self.graph)
      .with_preprocess(&self.preprocess)
      .with_postprocess(&self.postprocess)
  }

  fn detector(&self) -> HostDetector<'_> {
    FaceLandmarkDetector::new(self.device.clone(), &self.resources()).unwrap()
  }
}

#[test]
fn postprocess_pattern_reaches_the_host_array() {
  let device = HostDevice::new();
  let graph = first_texel_graph(TensorLayout::Nchw);
  let preprocess = HostKernel::preprocess();
  let pattern = HostKernel::new("pattern").with_pass(WorkgroupSize::new(52, 1, 1), |invocation| {
    let i = invocation.id()[0] as usize;
    if i < VERTEX_COUNT {
      let v = i as f32;
      invocation.store_record(i, &[v, v, v, 1.0]);
    }
  });
  let resources = ResourceSet::<HostDevice, _>::new()
    .with_model(&graph)
    .with_preprocess(&preprocess)
    .with_postprocess(&pattern);

  let mut detector = FaceLandmarkDetector::new(device, &resources).unwrap();
  detector.process(&solid_frame(32, 32, 128)).unwrap();

  let vertices = detector.vertex_array().unwrap();
  assert_eq!(vertices.len(), VERTEX_COUNT);
  for (i, vertex) in vertices.iter().enumerate() {
    let v = i as f32;
    assert_eq!(*vertex, Vertex::new(v, v, v, 1.0));
  }
}

#[test]
fn only_the_latest_frame_is_read_back() {
  let fixture = Fixture::new(first_texel_graph(TensorLayout::Nhwc));
  let mut detector = fixture.detector();

  detector.process(&solid_frame(64, 48, 51)).unwrap();
  detector.process(&solid_frame(64, 48, 255)).unwrap();

  let vertices = detector.vertex_array().unwrap();
  assert!(vertices.iter().all(|v| *v == Vertex::new(1.0, 1.0, 1.0, 1.0)));
  assert_eq!(fixture.device.readback_count(), 1);
}

#[test]
fn first_frame_values_survive_until_next_process() {
  let fixture = Fixture::new(first_texel_graph(TensorLayout::Nchw));
  let mut detector = fixture.detector();

  detector.process(&solid_frame(8, 8, 51)).unwrap();
  let first = detector.vertex_array().unwrap().to_vec();
  assert!(first.iter().all(|v| (v.x - 0.2).abs() < 1e-6 && v.w == 1.0));
}

#[test]
fn every_process_invalidates_the_cache() {
  let fixture = Fixture::new(first_texel_graph(TensorLayout::Nchw));
  let mut detector = fixture.detector();
  let frame = solid_frame(16, 16, 10);

  detector.process(&frame).unwrap();
  detector.vertex_array().unwrap();
  assert_eq!(fixture.device.readback_count(), 1);

  detector.process(&frame).unwrap();
  detector.vertex_array().unwrap();
  assert_eq!(fixture.device.readback_count(), 2);
}

#[test]
fn repeated_reads_do_not_touch_the_device() {
  let fixture = Fixture::new(first_texel_graph(TensorLayout::Nchw));
  let mut detector = fixture.detector();

  detector.process(&solid_frame(16, 16, 200)).unwrap();
  let first = detector.vertex_array().unwrap().to_vec();
  let second = detector.vertex_array().unwrap().to_vec();
  assert_eq!(first, second);
  assert_eq!(fixture.device.readback_count(), 1);
}

#[test]
fn shapes_do_not_depend_on_source_resolution() {
  let fixture = Fixture::new(first_texel_graph(TensorLayout::Nchw));
  let mut detector = fixture.detector();

  for (width, height) in [(1, 1), (640, 480), (191, 193)] {
    detector.process(&solid_frame(width, height, 7)).unwrap();
    assert_eq!(detector.input_tensor().unwrap().len(), 3 * 192 * 192);
    assert_eq!(detector.vertex_array().unwrap().len(), VERTEX_COUNT);
  }

  let buffer = detector.vertex_buffer().unwrap();
  assert_eq!(
    fixture.device.buffer_len(buffer),
    VERTEX_COUNT * VERTEX_STRIDE
  );
}

#[test]
fn vertex_buffer_handle_is_stable() {
  let fixture = Fixture::new(first_texel_graph(TensorLayout::Nhwc));
  let mut detector = fixture.detector();

  let before: *const _ = detector.vertex_buffer().unwrap();
  detector.process(&solid_frame(4, 4, 1)).unwrap();
  let after: *const _ = detector.vertex_buffer().unwrap();
  assert!(std::ptr::eq(before, after));
}

/// 读取第一行像素的 R 通道，x 分量还原为像素值
fn first_row_graph(layout: TensorLayout) -> HostGraph {
  HostGraph::new(
    TensorShape::landmark_input(layout),
    OUTPUT_LEN,
    move |input, output| {
      for i in 0..VERTEX_COUNT {
        let w = i % 192;
        let index = layout.index(0, 0, w, 3, 192, 192);
        output[i * 3] = input[index] * 255.0;
        output[i * 3 + 1] = 0.0;
        output[i * 3 + 2] = 0.0;
      }
      Ok(())
    },
  )
}

#[test]
fn both_layouts_produce_the_same_landmarks() {
  // R 通道为横坐标的水平渐变
  let mut data = Vec::with_capacity(192 * 4 * 3);
  for _ in 0..4 {
    for x in 0..192u32 {
      data.extend_from_slice(&[x as u8, 0, 0]);
    }
  }
  let frame = RgbFrame::from_raw(192, 4, data).unwrap();

  let mut results = Vec::new();
  for layout in [TensorLayout::Nchw, TensorLayout::Nhwc] {
    let fixture = Fixture::new(first_row_graph(layout));
    let mut detector = fixture.detector();
    assert_eq!(detector.layout(), layout);
    detector.process(&frame).unwrap();
    results.push(detector.vertex_array().unwrap().to_vec());
  }

  for (i, (a, b)) in results[0].iter().zip(&results[1]).enumerate() {
    let expected = (i % 192) as f32 / 192.0;
    assert!((a.x - expected).abs() < 1e-3, "vertex {}: {}", i, a.x);
    assert!((a.x - b.x).abs() < 1e-6);
    assert_eq!(a.w, 1.0);
  }
}

#[test]
fn dispose_releases_everything_once() {
  let fixture = Fixture::new(first_texel_graph(TensorLayout::Nchw));
  let mut detector = fixture.detector();
  detector.process(&solid_frame(8, 8, 9)).unwrap();
  assert_eq!(fixture.device.live_workers(), 1);
  // 输入张量、顶点缓冲区、推理输出
  assert_eq!(fixture.device.live_buffers(), 3);

  detector.dispose();
  assert_eq!(fixture.device.live_buffers(), 0);
  assert_eq!(fixture.device.live_workers(), 0);

  detector.dispose();
  assert_eq!(fixture.device.live_buffers(), 0);
  assert!(detector.is_disposed());
}

#[test]
fn drop_releases_device_resources() {
  let fixture = Fixture::new(first_texel_graph(TensorLayout::Nhwc));
  {
    let mut detector = fixture.detector();
    detector.process(&solid_frame(8, 8, 9)).unwrap();
  }
  assert_eq!(fixture.device.live_buffers(), 0);
  assert_eq!(fixture.device.live_workers(), 0);
}

#[test]
fn wrong_input_shape_is_a_configuration_error() {
  let graph = HostGraph::new(
    TensorShape::new(1, 224, 224, 3, TensorLayout::Nhwc),
    OUTPUT_LEN,
    |_, _| Ok(()),
  );
  let fixture = Fixture::new(graph);

  let err = FaceLandmarkDetector::new(fixture.device.clone(), &fixture.resources())
    .err()
    .unwrap();
  assert!(matches!(
    err,
    DetectorError::Configuration(ConfigurationError::InputShapeMismatch { .. })
  ));
  assert_eq!(fixture.device.live_buffers(), 0);
  assert_eq!(fixture.device.live_workers(), 0);
}

#[test]
fn small_output_is_a_configuration_error() {
  let graph = HostGraph::new(
    TensorShape::landmark_input(TensorLayout::Nchw),
    OUTPUT_LEN - 1,
    |_, _| Ok(()),
  );
  let fixture = Fixture::new(graph);

  let err = FaceLandmarkDetector::new(fixture.device.clone(), &fixture.resources())
    .err()
    .unwrap();
  assert!(matches!(
    err,
    DetectorError::Configuration(ConfigurationError::OutputTooSmall {
      expected: OUTPUT_LEN,
      ..
    })
  ));
  assert_eq!(fixture.device.live_buffers(), 0);
}

#[test]
fn preprocess_workgroup_must_tile_the_input() {
  let device = HostDevice::new();
  let graph = first_texel_graph(TensorLayout::Nhwc);
  let preprocess = HostKernel::new("preprocess-10")
    .with_pass(WorkgroupSize::new(10, 10, 1), |_| {})
    .with_pass(WorkgroupSize::new(10, 10, 1), |_| {});
  let postprocess = HostKernel::postprocess();
  let resources = ResourceSet::<HostDevice, _>::new()
    .with_model(&graph)
    .with_preprocess(&preprocess)
    .with_postprocess(&postprocess);

  let err = FaceLandmarkDetector::new(device.clone(), &resources)
    .err()
    .unwrap();
  assert!(matches!(
    err,
    DetectorError::Configuration(ConfigurationError::WorkgroupMismatch {
      kernel: "preprocess",
      ..
    })
  ));
  assert_eq!(device.live_buffers(), 0);
}

#[test]
fn allocation_failure_releases_earlier_allocations() {
  // 推理输出可以分配，输入张量超出上限
  let device = HostDevice::with_limits(HostLimits {
    max_storage_buffer_binding_size: 100_000,
  });
  let fixture = Fixture::with_device(device, first_texel_graph(TensorLayout::Nchw));

  let err = FaceLandmarkDetector::new(fixture.device.clone(), &fixture.resources())
    .err()
    .unwrap();
  assert!(matches!(
    err,
    DetectorError::Device(DeviceError::OutOfMemory { .. })
  ));
  assert_eq!(fixture.device.live_buffers(), 0);
  assert_eq!(fixture.device.live_workers(), 0);
}

#[test]
fn oversized_graph_output_is_an_error() {
  let graph = HostGraph::new(
    TensorShape::landmark_input(TensorLayout::Nchw),
    usize::MAX / 2,
    |_, _| Ok(()),
  );
  let fixture = Fixture::new(graph);

  let err = FaceLandmarkDetector::new(fixture.device.clone(), &fixture.resources())
    .err()
    .unwrap();
  assert!(matches!(
    err,
    DetectorError::Device(DeviceError::InvalidBufferSize { .. })
  ));
  assert_eq!(fixture.device.live_buffers(), 0);
  assert_eq!(fixture.device.live_workers(), 0);
}

#[test]
fn empty_image_is_rejected_before_any_dispatch() {
  let fixture = Fixture::new(first_texel_graph(TensorLayout::Nchw));
  let mut detector = fixture.detector();

  let err = detector.process(&RgbFrame::with_shape(16, 0)).unwrap_err();
  assert!(matches!(
    err,
    DetectorError::Precondition(PreconditionViolation::EmptyImage {
      width: 16,
      height: 0
    })
  ));
  assert_eq!(fixture.device.dispatch_count(), 0);
  assert_eq!(fixture.device.upload_count(), 0);
}

#[test]
fn worker_failure_surfaces_and_leaves_cache_stale() {
  let graph = HostGraph::new(
    TensorShape::landmark_input(TensorLayout::Nchw),
    OUTPUT_LEN,
    |input, _| {
      if input[0] > 0.5 {
        Err(DeviceError::Execution("NPU 超时".to_string()))
      } else {
        Ok(())
      }
    },
  );
  let fixture = Fixture::new(graph);
  let mut detector = fixture.detector();

  detector.process(&solid_frame(8, 8, 0)).unwrap();
  detector.vertex_array().unwrap();
  assert_eq!(fixture.device.readback_count(), 1);

  let err = detector.process(&solid_frame(8, 8, 255)).unwrap_err();
  assert!(matches!(
    err,
    DetectorError::Device(DeviceError::Execution(_))
  ));

  // 失败的帧同样使缓存失效
  detector.vertex_array().unwrap();
  assert_eq!(fixture.device.readback_count(), 2);
}
