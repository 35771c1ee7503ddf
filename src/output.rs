// 该文件是 Lianpu （脸谱） 项目的一部分。
// src/output.rs - 输出定义
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

#[cfg(any(feature = "save_image_file", feature = "landmark_record"))]
use url::Url;

#[cfg(any(feature = "save_image_file", feature = "landmark_record"))]
use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame, landmark::Vertex};

pub trait Render<Frame, Output: ?Sized>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "landmark_record")]
mod landmark_record;
#[cfg(feature = "landmark_record")]
pub use self::landmark_record::{LandmarkRecord, LandmarkRecordError, LandmarkRecordOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "landmark_record")]
  #[error("关键点记录输出错误: {0}")]
  LandmarkRecordError(#[from] LandmarkRecordError),
  #[error("不支持的输出 URI 方案: {0}")]
  SchemeMismatch(String),
}

#[cfg(any(feature = "save_image_file", feature = "landmark_record"))]
pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "landmark_record")]
  LandmarkRecordOutput(LandmarkRecordOutput),
}

#[cfg(any(feature = "save_image_file", feature = "landmark_record"))]
impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "landmark_record")]
      LandmarkRecordOutput::SCHEME => {
        let output = LandmarkRecordOutput::from_url(url)?;
        Ok(OutputWrapper::LandmarkRecordOutput(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

#[cfg(any(feature = "save_image_file", feature = "landmark_record"))]
impl Render<RgbFrame, [Vertex]> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbFrame, result: &[Vertex]) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "landmark_record")]
      OutputWrapper::LandmarkRecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}
