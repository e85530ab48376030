// 该文件是 Liusu （流速） 项目的一部分。
// src/output/image_sequence_output.rs - 图像序列输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  frame::{StreamInfo, VideoFrame},
  output::VideoWriter,
  url_to_path,
};

#[derive(Error, Debug)]
pub enum ImageSequenceOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("帧尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
}

/// 将每一帧保存为目录中的 PNG 文件（`frame_000000.png` 起）
pub struct ImageSequenceOutput {
  directory: PathBuf,
  info: StreamInfo,
  frames_written: u64,
}

impl ImageSequenceOutput {
  pub const SCHEME: &'static str = "frames";

  pub fn open(url: &Url, info: StreamInfo) -> Result<Self, ImageSequenceOutputError> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageSequenceOutputError::SchemeMismatch);
    }
    Self::create(&url_to_path(url), info)
  }

  pub fn create(directory: &Path, info: StreamInfo) -> Result<Self, ImageSequenceOutputError> {
    std::fs::create_dir_all(directory)?;
    Ok(ImageSequenceOutput {
      directory: directory.to_path_buf(),
      info,
      frames_written: 0,
    })
  }

  pub fn frame_path(&self, index: u64) -> PathBuf {
    self.directory.join(format!("frame_{:06}.png", index))
  }
}

impl VideoWriter for ImageSequenceOutput {
  type Error = ImageSequenceOutputError;

  fn write_frame(&mut self, frame: &VideoFrame) -> Result<(), Self::Error> {
    let actual = (frame.width(), frame.height());
    let expected = (self.info.width, self.info.height);
    if actual != expected {
      return Err(ImageSequenceOutputError::FrameSizeMismatch { expected, actual });
    }
    // 按写入顺序编号，与输入帧顺序一致
    frame.image.save(self.frame_path(self.frames_written))?;
    self.frames_written += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    info!(
      "图像序列已保存到目录: {} (共 {} 帧)",
      self.directory.display(),
      self.frames_written
    );
    Ok(())
  }
}
