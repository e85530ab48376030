// 该文件是 Liusu （流速） 项目的一部分。
// src/output/draw.rs - 速度标注绘制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::detector::BoundingBox;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_OFFSET: i32 = 10; // 标签距边框上沿的距离
const BOX_THICKNESS: u32 = 2;
const NORMAL_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const VIOLATION_COLOR: [u8; 3] = [255, 0, 0]; // 红色

#[derive(Error, Debug)]
pub enum AnnotatorError {
  #[error("字体加载错误")]
  FontLoadError,
}

/// 帧标注器：绘制边界框与速度标签，多次调用在同一帧上叠加
pub struct FrameAnnotator {
  font: FontArc,
  font_scale: PxScale,
  normal_color: Rgb<u8>,
  violation_color: Rgb<u8>,
}

impl FrameAnnotator {
  pub fn new() -> Result<Self, AnnotatorError> {
    let font_data: &'static [u8] = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data).map_err(|_| AnnotatorError::FontLoadError)?;

    Ok(Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      normal_color: Rgb(NORMAL_COLOR),
      violation_color: Rgb(VIOLATION_COLOR),
    })
  }

  pub fn color(&self, is_violation: bool) -> Rgb<u8> {
    if is_violation {
      self.violation_color
    } else {
      self.normal_color
    }
  }

  /// 标签文本，速度保留一位小数
  pub fn label(speed_kmh: f64) -> String {
    format!("{:.1} km/h", speed_kmh)
  }

  pub fn annotate(&self, image: &mut RgbImage, bbox: &BoundingBox, speed_kmh: f64, is_violation: bool) {
    let Some((x, y, w, h)) = bbox.clamp_to(image.width(), image.height()) else {
      return;
    };
    let color = self.color(is_violation);

    // 绘制边框（加粗为2像素）
    for t in 0..BOX_THICKNESS {
      let (iw, ih) = (w.saturating_sub(2 * t), h.saturating_sub(2 * t));
      if iw == 0 || ih == 0 {
        break;
      }
      let rect = Rect::at((x + t) as i32, (y + t) as i32).of_size(iw, ih);
      draw_hollow_rect_mut(image, rect, color);
    }

    // 标签位于边框上方，超出画面时贴住上沿
    let label = Self::label(speed_kmh);
    let (_, text_height) = text_size(self.font_scale, &self.font, &label);
    let label_y = (y as i32 - LABEL_OFFSET - text_height as i32).max(0);
    draw_text_mut(
      image,
      color,
      x as i32,
      label_y,
      self.font_scale,
      &self.font,
      &label,
    );
  }
}
