// 该文件是 Liusu （流速） 项目的一部分。
// src/input/ffmpeg_input.rs - FFmpeg 视频文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # FFmpeg 视频输入模块
//!
//! 通过 `ffmpeg-next` 解码视频文件中最佳的视频流，并经缩放上下文转换为 RGB24。
//! 帧尺寸取自解码器，解码出的帧不做旋转。
//!
//! ## URL 格式
//!
//! - `video:///path/to/input.mp4` - 读取视频文件，帧率取自文件
//! - `video:///path/to/input.mp4?fps=30` - 覆盖文件中的帧率

use std::path::PathBuf;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::{Pixel, input};
use ffmpeg_next::media::Type;
use ffmpeg_next::software::scaling::{context::Context as ScalingContext, flag::Flags};
use ffmpeg_next::util::frame::video::Video;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{RGB_CHANNELS, StreamInfo, VideoFrame},
  input::FrameSource,
  query_param, url_to_path,
};

#[derive(Error, Debug)]
pub enum FfmpegInputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("Video file not found: {0}")]
  NotFound(PathBuf),
  #[error("FFmpeg error: {0}")]
  FfmpegError(#[from] ffmpeg::Error),
  #[error("Invalid stream info: {0}")]
  InvalidStream(String),
}

/// 有理数帧率转换为浮点数，无效时返回 None
fn rational_fps(rate: ffmpeg::Rational) -> Option<f64> {
  if rate.denominator() == 0 {
    return None;
  }
  let fps = rate.numerator() as f64 / rate.denominator() as f64;
  (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// FFmpeg 视频输入
pub struct FfmpegInput {
  path: PathBuf,
  info: StreamInfo,
  input_context: ffmpeg::format::context::Input,
  video_stream_index: usize,
  decoder: ffmpeg::decoder::Video,
  scaler: ScalingContext,
  next_index: u64,
  eof_sent: bool,
  finished: bool,
}

impl FromUrlWithScheme for FfmpegInput {
  const SCHEME: &'static str = "video";
}

impl FromUrl for FfmpegInput {
  type Error = FfmpegInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(FfmpegInputError::SchemeMismatch);
    }

    let path = url_to_path(url);
    if !path.is_file() {
      return Err(FfmpegInputError::NotFound(path));
    }

    let mut source = Self::open(path)?;
    if let Some(fps) = query_param::<f64>(url, "fps").filter(|f| *f > 0.0) {
      source.info.fps = fps;
    }
    info!(
      "打开视频文件: {} ({}x{} @ {:.2} fps)",
      source.path.display(),
      source.info.width,
      source.info.height,
      source.info.fps
    );
    Ok(source)
  }
}

impl FfmpegInput {
  pub fn open(path: PathBuf) -> Result<Self, FfmpegInputError> {
    ffmpeg::init()?;

    let input_context = input(&path)?;
    let video_stream = input_context
      .streams()
      .best(Type::Video)
      .ok_or_else(|| FfmpegInputError::InvalidStream("没有视频流".to_string()))?;

    let video_stream_index = video_stream.index();
    let fps = rational_fps(video_stream.avg_frame_rate())
      .or_else(|| rational_fps(video_stream.rate()))
      .ok_or_else(|| FfmpegInputError::InvalidStream("无法确定帧率".to_string()))?;

    let context_decoder =
      ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())?;
    let decoder = context_decoder.decoder().video()?;

    let width = decoder.width();
    let height = decoder.height();
    if width == 0 || height == 0 {
      return Err(FfmpegInputError::InvalidStream(format!(
        "无效的帧尺寸 {}x{}",
        width, height
      )));
    }

    let scaler = ScalingContext::get(
      decoder.format(),
      width,
      height,
      Pixel::RGB24,
      width,
      height,
      Flags::BILINEAR,
    )?;

    Ok(Self {
      path,
      info: StreamInfo::new(width, height, fps),
      input_context,
      video_stream_index,
      decoder,
      scaler,
      next_index: 0,
      eof_sent: false,
      finished: false,
    })
  }

  /// 解码下一帧，数据包读完后冲刷解码器
  fn decode_next_frame(&mut self) -> Result<Option<Video>, ffmpeg::Error> {
    let mut decoded = Video::empty();
    loop {
      if self.decoder.receive_frame(&mut decoded).is_ok() {
        return Ok(Some(decoded));
      }
      if self.eof_sent {
        return Ok(None);
      }

      let mut sent = false;
      for (stream, packet) in self.input_context.packets() {
        if stream.index() == self.video_stream_index {
          self.decoder.send_packet(&packet)?;
          sent = true;
          break;
        }
      }
      if !sent {
        self.decoder.send_eof()?;
        self.eof_sent = true;
      }
    }
  }

  /// 转换为 RGB24，解码尺寸变化时缩放回流尺寸
  fn to_rgb(&mut self, decoded: &Video) -> Result<Vec<u8>, ffmpeg::Error> {
    if decoded.width() != self.scaler.input().width
      || decoded.height() != self.scaler.input().height
      || decoded.format() != self.scaler.input().format
    {
      debug!(
        "解码尺寸变化: {}x{}，重建缩放上下文",
        decoded.width(),
        decoded.height()
      );
      self.scaler = ScalingContext::get(
        decoded.format(),
        decoded.width(),
        decoded.height(),
        Pixel::RGB24,
        self.info.width,
        self.info.height,
        Flags::BILINEAR,
      )?;
    }

    let mut rgb_frame = Video::empty();
    self.scaler.run(decoded, &mut rgb_frame)?;

    let data = rgb_frame.data(0);
    let stride = rgb_frame.stride(0);
    let row = self.info.width as usize * RGB_CHANNELS;

    // 去除每行的步长对齐
    let mut image_data = Vec::with_capacity(self.info.frame_size());
    for y in 0..self.info.height as usize {
      let start = y * stride;
      image_data.extend_from_slice(&data[start..start + row]);
    }
    Ok(image_data)
  }
}

impl Iterator for FfmpegInput {
  type Item = VideoFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let decoded = match self.decode_next_frame() {
      Ok(Some(decoded)) => decoded,
      Ok(None) => {
        debug!("视频解码结束: {}", self.path.display());
        self.finished = true;
        return None;
      }
      Err(e) => {
        error!("解码视频帧失败: {}", e);
        self.finished = true;
        return None;
      }
    };

    let frame = match self.to_rgb(&decoded) {
      Ok(data) => VideoFrame::from_raw(self.next_index, &self.info, data),
      Err(e) => {
        error!("转换视频帧失败: {}", e);
        None
      }
    };
    match frame {
      Some(frame) => {
        self.next_index += 1;
        Some(frame)
      }
      None => {
        self.finished = true;
        None
      }
    }
  }
}

impl FrameSource for FfmpegInput {
  fn stream_info(&self) -> StreamInfo {
    self.info
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frame_rate_conversion() {
    assert_eq!(rational_fps(ffmpeg::Rational::new(30, 1)), Some(30.0));
    assert!((rational_fps(ffmpeg::Rational::new(30000, 1001)).unwrap() - 29.97).abs() < 0.01);
    assert_eq!(rational_fps(ffmpeg::Rational::new(0, 0)), None);
    assert_eq!(rational_fps(ffmpeg::Rational::new(0, 1)), None);
  }

  #[test]
  fn missing_file_is_open_error() {
    let url = Url::parse("video:///definitely/not/here/input.mp4").unwrap();
    assert!(matches!(
      FfmpegInput::from_url(&url),
      Err(FfmpegInputError::NotFound(_))
    ));
  }

  #[test]
  fn non_video_file_is_open_error() {
    let path = std::env::temp_dir().join(format!("liusu-not-video-{}.mp4", std::process::id()));
    std::fs::write(&path, b"this is not a video container").unwrap();
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "video", 1)).unwrap();
    assert!(FfmpegInput::from_url(&url).is_err());
    std::fs::remove_file(&path).unwrap();
  }
}
