// 该文件是 Liusu （流速） 项目的一部分。
// src/plate.rs - 车牌识别边界
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{DynamicImage, GrayImage, RgbImage, imageops};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{FromUrl, detector::BoundingBox};

#[cfg(feature = "tesseract_ocr")]
mod tesseract;
#[cfg(feature = "tesseract_ocr")]
pub use self::tesseract::TesseractOcr;

/// 无法识别车牌时的占位值
pub const UNKNOWN_PLATE: &str = "UNKNOWN";
const MIN_PLATE_LEN: usize = 6;

#[derive(Error, Debug)]
pub enum OcrError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("OCR 引擎错误: {0}")]
  Engine(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// OCR 引擎返回的候选文本
#[derive(Debug, Clone, PartialEq)]
pub struct OcrCandidate {
  pub text: String,
  pub confidence: f32,
}

impl OcrCandidate {
  pub fn new(text: impl Into<String>, confidence: f32) -> Self {
    Self {
      text: text.into(),
      confidence,
    }
  }
}

/// 外部 OCR 引擎接口，候选顺序由引擎决定
pub trait OcrEngine {
  fn recognize(&self, image: &GrayImage) -> Result<Vec<OcrCandidate>, OcrError>;
}

impl<E: OcrEngine + ?Sized> OcrEngine for Box<E> {
  fn recognize(&self, image: &GrayImage) -> Result<Vec<OcrCandidate>, OcrError> {
    (**self).recognize(image)
  }
}

/// 不做识别的引擎，所有车牌均为 UNKNOWN
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOcr;

impl OcrEngine for NoOcr {
  fn recognize(&self, _image: &GrayImage) -> Result<Vec<OcrCandidate>, OcrError> {
    Ok(Vec::new())
  }
}

/// 规范化候选文本：转大写并去掉所有空白
pub fn normalize_plate(text: &str) -> String {
  text
    .chars()
    .filter(|c| !c.is_whitespace())
    .flat_map(char::to_uppercase)
    .collect()
}

/// 候选文本是否像车牌：长度至少 6，且同时包含数字与字母
pub fn is_plate_like(text: &str) -> bool {
  text.chars().count() >= MIN_PLATE_LEN
    && text.chars().any(|c| c.is_ascii_digit())
    && text.chars().any(|c| c.is_alphabetic())
}

/// 车牌读取器：对裁剪区域做灰度化后交给 OCR 引擎，取第一个合格候选
pub struct PlateReader<E> {
  engine: E,
}

impl<E: OcrEngine> PlateReader<E> {
  pub fn new(engine: E) -> Self {
    Self { engine }
  }

  /// 读取车牌，失败或无合格候选时返回 UNKNOWN
  pub fn read(&self, crop: &RgbImage) -> String {
    if crop.width() == 0 || crop.height() == 0 {
      return UNKNOWN_PLATE.to_string();
    }
    let gray = DynamicImage::ImageRgb8(crop.clone()).to_luma8();

    let candidates = match self.engine.recognize(&gray) {
      Ok(candidates) => candidates,
      Err(e) => {
        warn!("车牌识别失败: {}", e);
        return UNKNOWN_PLATE.to_string();
      }
    };

    candidates
      .iter()
      .map(|candidate| normalize_plate(&candidate.text))
      .find(|text| is_plate_like(text))
      .inspect(|plate| debug!("识别到车牌: {}", plate))
      .unwrap_or_else(|| UNKNOWN_PLATE.to_string())
  }

  /// 从整帧中裁剪边界框区域后读取车牌
  pub fn read_region(&self, frame: &RgbImage, bbox: &BoundingBox) -> String {
    match bbox.clamp_to(frame.width(), frame.height()) {
      Some((x, y, w, h)) => self.read(&imageops::crop_imm(frame, x, y, w, h).to_image()),
      None => UNKNOWN_PLATE.to_string(),
    }
  }
}

pub enum OcrWrapper {
  None(NoOcr),
  #[cfg(feature = "tesseract_ocr")]
  Tesseract(TesseractOcr),
}

impl FromUrl for OcrWrapper {
  type Error = OcrError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "none" => Ok(OcrWrapper::None(NoOcr)),
      #[cfg(feature = "tesseract_ocr")]
      <TesseractOcr as crate::FromUrlWithScheme>::SCHEME => {
        Ok(OcrWrapper::Tesseract(TesseractOcr::from_url(url)?))
      }
      scheme => Err(OcrError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl OcrEngine for OcrWrapper {
  fn recognize(&self, image: &GrayImage) -> Result<Vec<OcrCandidate>, OcrError> {
    match self {
      OcrWrapper::None(engine) => engine.recognize(image),
      #[cfg(feature = "tesseract_ocr")]
      OcrWrapper::Tesseract(engine) => engine.recognize(image),
    }
  }
}
