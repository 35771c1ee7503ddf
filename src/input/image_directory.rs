// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/input/image_directory.rs - 图像目录输入
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

use std::{collections::VecDeque, path::PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame, input::read_image_file::load_frame};

#[derive(Error, Debug)]
pub enum ImageDirectoryInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("不是目录: {0}")]
  NotADirectory(String),
}

/// 按文件名顺序逐帧读取目录中的图像
///
/// 无法解码的文件会被跳过。
pub struct ImageDirectoryInput {
  files: VecDeque<PathBuf>,
}

impl FromUrl for ImageDirectoryInput {
  type Error = ImageDirectoryInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageDirectoryInputError::SchemaMismatch);
    }

    let dir = PathBuf::from(url.path());
    if !dir.is_dir() {
      error!("输入路径不是目录: {}", dir.display());
      return Err(ImageDirectoryInputError::NotADirectory(
        dir.display().to_string(),
      ));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
      let path = entry?.path();
      if path.is_file() {
        files.push(path);
      }
    }
    files.sort();

    info!("图像目录 {}: {} 个文件", dir.display(), files.len());
    Ok(ImageDirectoryInput {
      files: files.into(),
    })
  }
}

impl FromUrlWithScheme for ImageDirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl ImageDirectoryInput {
  /// 尚未读取的文件数
  pub fn remaining(&self) -> usize {
    self.files.len()
  }
}

impl Iterator for ImageDirectoryInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.files.pop_front() {
      match load_frame(&path) {
        Ok(frame) => return Some(frame),
        Err(e) => warn!("跳过无法读取的文件 {}: {}", path.display(), e),
      }
    }
    None
  }
}
