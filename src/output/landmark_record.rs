// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/output/landmark_record.rs - 关键点记录输出
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
  fs::{File, OpenOptions},
  io::{BufWriter, Write},
  path::{Path, PathBuf},
  sync::{Mutex, PoisonError},
};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame, landmark::Vertex, output::Render};

#[derive(Error, Debug)]
pub enum LandmarkRecordError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("记录文件锁已失效")]
  Poisoned,
}

impl<T> From<PoisonError<T>> for LandmarkRecordError {
  fn from(_: PoisonError<T>) -> Self {
    LandmarkRecordError::Poisoned
  }
}

/// JSON Lines 文件中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRecord {
  pub frame: u64,
  pub timestamp: String,
  pub width: u32,
  pub height: u32,
  pub vertices: Vec<[f32; 4]>,
}

struct RecordWriter {
  writer: BufWriter<File>,
  frame: u64,
}

/// 把每帧的关键点追加写入 JSON Lines 文件
pub struct LandmarkRecordOutput {
  path: PathBuf,
  inner: Mutex<RecordWriter>,
}

impl FromUrlWithScheme for LandmarkRecordOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for LandmarkRecordOutput {
  type Error = LandmarkRecordError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(LandmarkRecordError::SchemeMismatch);
    }

    let append = uri.query_pairs().any(|(k, _)| k == "append");
    Self::create(Path::new(uri.path()), append)
  }
}

impl LandmarkRecordOutput {
  pub fn create(path: &Path, append: bool) -> Result<Self, LandmarkRecordError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
      .create(true)
      .write(true)
      .append(append)
      .truncate(!append)
      .open(path)?;
    info!("关键点记录文件: {}", path.display());

    Ok(LandmarkRecordOutput {
      path: path.to_path_buf(),
      inner: Mutex::new(RecordWriter {
        writer: BufWriter::new(file),
        frame: 0,
      }),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Render<RgbFrame, [Vertex]> for LandmarkRecordOutput {
  type Error = LandmarkRecordError;

  fn render_result(&self, frame: &RgbFrame, result: &[Vertex]) -> Result<(), Self::Error> {
    let mut inner = self.inner.lock()?;
    let record = LandmarkRecord {
      frame: inner.frame,
      timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
      width: frame.width(),
      height: frame.height(),
      vertices: result.iter().map(|v| v.to_array()).collect(),
    };

    serde_json::to_writer(&mut inner.writer, &record)?;
    inner.writer.write_all(b"\n")?;
    inner.writer.flush()?;

    debug!("记录第 {} 帧: {} 个关键点", record.frame, record.vertices.len());
    inner.frame += 1;
    Ok(())
  }
}
