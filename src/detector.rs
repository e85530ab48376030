// 该文件是 Liusu （流速） 项目的一部分。
// src/detector.rs - 目标检测与跟踪边界
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 检测器是外部协作者（例如带有跟踪功能的 YOLO 模型）。本模块只定义窄接口，
//! 并在边界处把松散的 JSON 结果校验为强类型的 [`Detection`]。

use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::VideoFrame, track::Point};

mod process;
mod track_file;
pub use self::process::ProcessDetector;
pub use self::track_file::TrackFileDetector;

/// 检测器为同一物体跨帧分配的稳定编号
pub type TrackId = u64;

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("检测结果格式错误: {0}")]
  Malformed(String),
  #[error("检测进程错误: {0}")]
  Process(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 外部检测器接口：给定一帧，返回该帧中带跟踪编号的检测结果
pub trait Detector {
  fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<Detection>, DetectorError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
  fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<Detection>, DetectorError> {
    (**self).detect(frame)
  }
}

/// 像素坐标边界框 [x1, y1, x2, y2]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl BoundingBox {
  /// 坐标必须有限且 x1 < x2, y1 < y2
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Option<Self> {
    let finite = [x1, y1, x2, y2].iter().all(|v| v.is_finite());
    (finite && x1 < x2 && y1 < y2).then_some(Self { x1, y1, x2, y2 })
  }

  pub fn centroid(&self) -> Point {
    Point::new(
      (self.x1 as f64 + self.x2 as f64) / 2.0,
      (self.y1 as f64 + self.y2 as f64) / 2.0,
    )
  }

  /// 裁剪到图像范围内的整数区域 (x, y, w, h)，面积为零时返回 None
  pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x1 = (self.x1.floor().max(0.0) as u32).min(width);
    let y1 = (self.y1.floor().max(0.0) as u32).min(height);
    let x2 = (self.x2.ceil().max(0.0) as u32).min(width);
    let y2 = (self.y2.ceil().max(0.0) as u32).min(height);
    (x2 > x1 && y2 > y1).then(|| (x1, y1, x2 - x1, y2 - y1))
  }
}

/// 允许处理的车辆类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleClass {
  Car,
  Motorcycle,
  Bus,
  Truck,
}

impl VehicleClass {
  pub const ALL: [VehicleClass; 4] = [
    VehicleClass::Car,
    VehicleClass::Motorcycle,
    VehicleClass::Bus,
    VehicleClass::Truck,
  ];

  pub fn from_label_str(label: &str) -> Option<Self> {
    match label.trim().to_ascii_lowercase().as_str() {
      "car" => Some(VehicleClass::Car),
      "motorcycle" | "motorbike" => Some(VehicleClass::Motorcycle),
      "bus" => Some(VehicleClass::Bus),
      "truck" => Some(VehicleClass::Truck),
      _ => None,
    }
  }

  /// COCO 类别编号：2 car, 3 motorcycle, 5 bus, 7 truck
  pub fn from_label_id(id: u64) -> Option<Self> {
    match id {
      2 => Some(VehicleClass::Car),
      3 => Some(VehicleClass::Motorcycle),
      5 => Some(VehicleClass::Bus),
      7 => Some(VehicleClass::Truck),
      _ => None,
    }
  }

  pub fn to_label_str(&self) -> &'static str {
    match self {
      VehicleClass::Car => "Car",
      VehicleClass::Motorcycle => "Motorcycle",
      VehicleClass::Bus => "Bus",
      VehicleClass::Truck => "Truck",
    }
  }
}

impl std::fmt::Display for VehicleClass {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.to_label_str())
  }
}

/// 一帧中对一个物体的观测
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub bbox: BoundingBox,
  pub class: VehicleClass,
  pub track_id: TrackId,
}

/// 单条原始检测的解析结果
#[derive(Debug, PartialEq)]
enum Parsed {
  Accepted(Detection),
  /// 类别不在允许列表中
  Ignored,
}

fn parse_entry(entry: &Value) -> Result<Parsed, String> {
  let bbox = entry
    .get("bbox")
    .and_then(|b| b.as_array())
    .ok_or("缺少 bbox")?;
  if bbox.len() != 4 {
    return Err(format!("bbox 需要 4 个坐标, 实际 {}", bbox.len()));
  }
  let mut coords = [0f32; 4];
  for (slot, v) in coords.iter_mut().zip(bbox) {
    *slot = v.as_f64().ok_or("bbox 坐标不是数字")? as f32;
  }
  let bbox = BoundingBox::new(coords[0], coords[1], coords[2], coords[3])
    .ok_or_else(|| format!("bbox 无效: {:?}", coords))?;

  let track_id = match entry.get("track_id").or_else(|| entry.get("id")) {
    Some(Value::Number(n)) => n
      .as_u64()
      .or_else(|| {
        n.as_f64()
          .filter(|f| f.fract() == 0.0 && *f >= 0.0)
          .map(|f| f as u64)
      })
      .ok_or("track_id 不是非负整数")?,
    Some(_) => return Err("track_id 不是数字".to_string()),
    // 没有跟踪编号的检测无法关联轨迹
    None => return Err("缺少 track_id".to_string()),
  };

  let class = match entry.get("class").or_else(|| entry.get("label")) {
    Some(Value::String(s)) => VehicleClass::from_label_str(s),
    Some(Value::Number(n)) => n.as_u64().and_then(VehicleClass::from_label_id),
    _ => return Err("缺少 class".to_string()),
  };

  Ok(match class {
    Some(class) => Parsed::Accepted(Detection {
      bbox,
      class,
      track_id,
    }),
    None => Parsed::Ignored,
  })
}

/// 将检测器返回的 JSON 数组校验为强类型检测结果。
///
/// 格式错误的条目会被丢弃并记录警告，允许列表以外的类别被静默忽略；
/// 只有整体结构错误（不是数组）才返回错误。
pub fn parse_detections(value: &Value) -> Result<Vec<Detection>, DetectorError> {
  let entries = value
    .as_array()
    .ok_or_else(|| DetectorError::Malformed("检测结果不是数组".to_string()))?;

  let mut detections = Vec::with_capacity(entries.len());
  for (i, entry) in entries.iter().enumerate() {
    match parse_entry(entry) {
      Ok(Parsed::Accepted(detection)) => detections.push(detection),
      Ok(Parsed::Ignored) => {}
      Err(reason) => warn!("丢弃第 {} 条检测结果: {}", i, reason),
    }
  }
  Ok(detections)
}

pub enum DetectorWrapper {
  TrackFile(TrackFileDetector),
  Process(ProcessDetector),
}

impl FromUrl for DetectorWrapper {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      TrackFileDetector::SCHEME => Ok(DetectorWrapper::TrackFile(TrackFileDetector::from_url(
        url,
      )?)),
      ProcessDetector::SCHEME => Ok(DetectorWrapper::Process(ProcessDetector::from_url(url)?)),
      scheme => Err(DetectorError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl Detector for DetectorWrapper {
  fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<Detection>, DetectorError> {
    match self {
      DetectorWrapper::TrackFile(detector) => detector.detect(frame),
      DetectorWrapper::Process(detector) => detector.detect(frame),
    }
  }
}
