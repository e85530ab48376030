// 该文件是 Liusu （流速） 项目的一部分。
// src/input/image_sequence.rs - 图像序列输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{StreamInfo, VideoFrame},
  input::FrameSource,
  query_param, url_to_path,
};

#[derive(Error, Debug)]
pub enum ImageSequenceInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

const DEFAULT_FPS: f64 = 30.0;
const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

fn load_rgb(path: &Path) -> Result<RgbImage, ImageSequenceInputError> {
  Ok(ImageReader::open(path)?.decode()?.to_rgb8())
}

/// 目录中按文件名排序的图像帧序列
pub struct ImageSequenceInput {
  files: Vec<PathBuf>,
  info: StreamInfo,
  first: Option<RgbImage>,
  next_index: u64,
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "frames";
}

impl FromUrl for ImageSequenceInput {
  type Error = ImageSequenceInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageSequenceInputError::SchemaMismatch);
    }

    let directory = url_to_path(url);
    let fps = query_param::<f64>(url, "fps")
      .filter(|f| *f > 0.0)
      .unwrap_or(DEFAULT_FPS);
    let mut input = Self::open(&directory, fps)?;
    // 空目录没有首帧可取尺寸，可由 URL 指定
    if input.files.is_empty() {
      input.info.width = query_param(url, "width").unwrap_or(0);
      input.info.height = query_param(url, "height").unwrap_or(0);
    }
    Ok(input)
  }
}

impl ImageSequenceInput {
  pub fn open(directory: &Path, fps: f64) -> Result<Self, ImageSequenceInputError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(directory)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| {
        path
          .extension()
          .and_then(|ext| ext.to_str())
          .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
          .unwrap_or(false)
      })
      .collect();
    files.sort();

    // 空目录可以打开，只是不产生任何帧
    let first = match files.first() {
      Some(path) => Some(load_rgb(path)?),
      None => {
        warn!("图像目录中没有图像帧: {}", directory.display());
        None
      }
    };
    let info = first
      .as_ref()
      .map(|image| StreamInfo::new(image.width(), image.height(), fps))
      .unwrap_or_else(|| StreamInfo::new(0, 0, fps));

    info!(
      "打开图像序列: {} ({} 帧, {}x{} @ {:.2} fps)",
      directory.display(),
      files.len(),
      info.width,
      info.height,
      fps
    );

    Ok(ImageSequenceInput {
      files,
      info,
      first,
      next_index: 0,
    })
  }
}

impl Iterator for ImageSequenceInput {
  type Item = VideoFrame;

  fn next(&mut self) -> Option<Self::Item> {
    let index = self.next_index as usize;
    if index >= self.files.len() {
      return None;
    }

    let image = match self.first.take() {
      Some(image) => image,
      None => match load_rgb(&self.files[index]) {
        Ok(image) => image,
        Err(e) => {
          error!("读取图像帧失败 {}: {}", self.files[index].display(), e);
          self.next_index = self.files.len() as u64;
          return None;
        }
      },
    };

    if image.width() != self.info.width || image.height() != self.info.height {
      error!(
        "图像帧尺寸不一致 {}: {}x{}",
        self.files[index].display(),
        image.width(),
        image.height()
      );
      self.next_index = self.files.len() as u64;
      return None;
    }

    let frame = VideoFrame::new(self.next_index, image);
    self.next_index += 1;
    Some(frame)
  }
}

impl FrameSource for ImageSequenceInput {
  fn stream_info(&self) -> StreamInfo {
    self.info
  }
}
