// 该文件是 Liusu （流速） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use crate::{
  FromUrl,
  frame::{StreamInfo, VideoFrame},
};

/// 帧来源：按播放顺序产生解码后的帧，迭代结束即视频结束
pub trait FrameSource: Iterator<Item = VideoFrame> {
  fn stream_info(&self) -> StreamInfo;
}

mod memory_input;
pub use self::memory_input::MemoryInput;

#[cfg(feature = "ffmpeg_input")]
mod ffmpeg_input;
#[cfg(feature = "ffmpeg_input")]
pub use self::ffmpeg_input::{FfmpegInput, FfmpegInputError};

#[cfg(feature = "image_sequence")]
mod image_sequence;
#[cfg(feature = "image_sequence")]
pub use self::image_sequence::{ImageSequenceInput, ImageSequenceInputError};

/// 输入打开失败（OpenError），对整个任务是致命错误
#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "ffmpeg_input")]
  #[error("FFmpeg input error: {0}")]
  FfmpegInputError(#[from] FfmpegInputError),
  #[cfg(feature = "image_sequence")]
  #[error("Image sequence input error: {0}")]
  ImageSequenceInputError(#[from] ImageSequenceInputError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "ffmpeg_input")]
  Ffmpeg(FfmpegInput),
  #[cfg(feature = "image_sequence")]
  ImageSequence(ImageSequenceInput),
  Memory(MemoryInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "ffmpeg_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == FfmpegInput::SCHEME {
        return Ok(InputWrapper::Ffmpeg(FfmpegInput::from_url(url)?));
      }
    }
    #[cfg(feature = "image_sequence")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageSequenceInput::SCHEME {
        return Ok(InputWrapper::ImageSequence(ImageSequenceInput::from_url(
          url,
        )?));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Iterator for InputWrapper {
  type Item = VideoFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "ffmpeg_input")]
      InputWrapper::Ffmpeg(input) => input.next(),
      #[cfg(feature = "image_sequence")]
      InputWrapper::ImageSequence(input) => input.next(),
      InputWrapper::Memory(input) => input.next(),
    }
  }
}

impl FrameSource for InputWrapper {
  fn stream_info(&self) -> StreamInfo {
    match self {
      #[cfg(feature = "ffmpeg_input")]
      InputWrapper::Ffmpeg(input) => input.stream_info(),
      #[cfg(feature = "image_sequence")]
      InputWrapper::ImageSequence(input) => input.stream_info(),
      InputWrapper::Memory(input) => input.stream_info(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = url::Url::parse("rtsp://camera.local/stream").unwrap();
    match InputWrapper::from_url(&url) {
      Err(InputError::SchemeMismatch(scheme)) => assert_eq!(scheme, "rtsp"),
      _ => panic!("expected scheme mismatch"),
    }
  }
}
