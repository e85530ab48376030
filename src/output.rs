// 该文件是 Liusu （流速） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use url::Url;

use crate::frame::{StreamInfo, VideoFrame};

/// 视频写入器：按输入顺序逐帧写入，`finish` 完成容器封装
pub trait VideoWriter {
  type Error: std::error::Error + Send + Sync + 'static;

  fn write_frame(&mut self, frame: &VideoFrame) -> Result<(), Self::Error>;
  fn finish(&mut self) -> Result<(), Self::Error>;
}

pub mod draw;
pub use self::draw::{AnnotatorError, FrameAnnotator};

#[cfg(feature = "ffmpeg_output")]
mod ffmpeg_video_output;
#[cfg(feature = "ffmpeg_output")]
pub use self::ffmpeg_video_output::{FfmpegVideoOutput, FfmpegVideoOutputError};

#[cfg(feature = "image_sequence")]
mod image_sequence_output;
#[cfg(feature = "image_sequence")]
pub use self::image_sequence_output::{ImageSequenceOutput, ImageSequenceOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "ffmpeg_output")]
  #[error("FFmpeg 视频输出错误: {0}")]
  FfmpegVideoOutputError(#[from] FfmpegVideoOutputError),
  #[cfg(feature = "image_sequence")]
  #[error("图像序列输出错误: {0}")]
  ImageSequenceOutputError(#[from] ImageSequenceOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  #[cfg(feature = "ffmpeg_output")]
  FfmpegVideoOutput(FfmpegVideoOutput),
  #[cfg(feature = "image_sequence")]
  ImageSequenceOutput(ImageSequenceOutput),
}

impl OutputWrapper {
  /// 按 URL 方案创建输出，尺寸与帧率取自输入流
  pub fn open(url: &Url, info: StreamInfo) -> Result<Self, OutputError> {
    match url.scheme() {
      #[cfg(feature = "ffmpeg_output")]
      FfmpegVideoOutput::SCHEME => Ok(OutputWrapper::FfmpegVideoOutput(FfmpegVideoOutput::open(
        url, info,
      )?)),
      #[cfg(feature = "image_sequence")]
      ImageSequenceOutput::SCHEME => Ok(OutputWrapper::ImageSequenceOutput(
        ImageSequenceOutput::open(url, info)?,
      )),
      scheme => Err(OutputError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl VideoWriter for OutputWrapper {
  type Error = OutputError;

  fn write_frame(&mut self, frame: &VideoFrame) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "ffmpeg_output")]
      OutputWrapper::FfmpegVideoOutput(output) => {
        output.write_frame(frame).map_err(OutputError::from)
      }
      #[cfg(feature = "image_sequence")]
      OutputWrapper::ImageSequenceOutput(output) => {
        output.write_frame(frame).map_err(OutputError::from)
      }
    }
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "ffmpeg_output")]
      OutputWrapper::FfmpegVideoOutput(output) => output.finish().map_err(OutputError::from),
      #[cfg(feature = "image_sequence")]
      OutputWrapper::ImageSequenceOutput(output) => output.finish().map_err(OutputError::from),
    }
  }
}
