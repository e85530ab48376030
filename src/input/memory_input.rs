// 该文件是 Liusu （流速） 项目的一部分。
// src/input/memory_input.rs - 内存帧输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::VecDeque;

use image::RgbImage;

use crate::{
  frame::{StreamInfo, VideoFrame},
  input::FrameSource,
};

/// 由已解码图像构成的帧来源，用于嵌入其它解码器或测试
pub struct MemoryInput {
  info: StreamInfo,
  frames: VecDeque<RgbImage>,
  next_index: u64,
}

impl MemoryInput {
  pub fn new(fps: f64, width: u32, height: u32, frames: Vec<RgbImage>) -> Self {
    Self {
      info: StreamInfo::new(width, height, fps),
      frames: frames.into(),
      next_index: 0,
    }
  }

  /// 生成 `count` 帧纯色画面
  pub fn blank(fps: f64, width: u32, height: u32, count: usize) -> Self {
    let frames = (0..count)
      .map(|_| RgbImage::from_pixel(width, height, image::Rgb([32, 32, 32])))
      .collect();
    Self::new(fps, width, height, frames)
  }
}

impl Iterator for MemoryInput {
  type Item = VideoFrame;

  fn next(&mut self) -> Option<Self::Item> {
    let image = self.frames.pop_front()?;
    let frame = VideoFrame::new(self.next_index, image);
    self.next_index += 1;
    Some(frame)
  }
}

impl FrameSource for MemoryInput {
  fn stream_info(&self) -> StreamInfo {
    self.info
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frames_are_numbered_in_order() {
    let input = MemoryInput::blank(30.0, 8, 4, 3);
    assert_eq!(input.stream_info(), StreamInfo::new(8, 4, 30.0));
    let indexes: Vec<u64> = input.map(|f| f.index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
  }
}
