// 该文件是 Liusu （流速） 项目的一部分。
// src/frame.rs - 视频帧定义
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

use image::RgbImage;

pub const RGB_CHANNELS: usize = 3;

/// 视频流基本信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
  pub width: u32,
  pub height: u32,
  pub fps: f64,
}

impl StreamInfo {
  pub fn new(width: u32, height: u32, fps: f64) -> Self {
    Self { width, height, fps }
  }

  /// 单帧 RGB 数据字节数
  pub fn frame_size(&self) -> usize {
    RGB_CHANNELS * self.width as usize * self.height as usize
  }
}

/// 解码后的一帧图像，按播放顺序编号（从 0 开始）
#[derive(Debug, Clone)]
pub struct VideoFrame {
  pub index: u64,
  pub image: RgbImage,
}

impl VideoFrame {
  pub fn new(index: u64, image: RgbImage) -> Self {
    Self { index, image }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  /// 该帧在视频中的时间位置（秒）
  pub fn position_secs(&self, fps: f64) -> f64 {
    if fps > 0.0 {
      self.index as f64 / fps
    } else {
      0.0
    }
  }

  /// 由 RGB24 原始数据构造帧，长度不匹配时返回 None
  pub fn from_raw(index: u64, info: &StreamInfo, data: Vec<u8>) -> Option<Self> {
    if data.len() != info.frame_size() {
      return None;
    }
    RgbImage::from_raw(info.width, info.height, data).map(|image| Self { index, image })
  }
}
