// 该文件是 Liusu （流速） 项目的一部分。
// src/config.rs - 流水线参数
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::str::FromStr;

use crate::{
  detector::VehicleClass,
  frame::StreamInfo,
  speed::{DEFAULT_PIXELS_PER_METER, DEFAULT_SPEED_FPS, SpeedEstimator},
  track::{DEFAULT_TRAJECTORY_LEN, TrackStore},
  violation::{
    DEFAULT_OVERSPEED_THRESHOLD, DEFAULT_VIOLATION_THRESHOLD, EmissionPolicy, ViolationPolicy,
  },
};

/// 计算速度所需的最少轨迹点数
pub const DEFAULT_MIN_SAMPLES: usize = 5;
pub const DEFAULT_LOCATION: &str = "Highway A";
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 50;

/// 速度换算使用的帧率
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedFps {
  /// 固定帧率，与视频实际帧率无关
  Fixed(f64),
  /// 使用输入流的帧率
  Stream,
}

impl Default for SpeedFps {
  fn default() -> Self {
    SpeedFps::Fixed(DEFAULT_SPEED_FPS)
  }
}

impl SpeedFps {
  pub fn resolve(&self, info: &StreamInfo) -> f64 {
    match self {
      SpeedFps::Fixed(fps) => *fps,
      SpeedFps::Stream => info.fps,
    }
  }
}

impl FromStr for SpeedFps {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s == "stream" {
      return Ok(SpeedFps::Stream);
    }
    match s.parse::<f64>() {
      Ok(fps) if fps.is_finite() && fps > 0.0 => Ok(SpeedFps::Fixed(fps)),
      _ => Err(format!("无效的帧率 '{}' (正数或 'stream')", s)),
    }
  }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub trajectory_len: usize,
  pub min_samples: usize,
  pub pixels_per_meter: f64,
  pub speed_fps: SpeedFps,
  pub violation_threshold: f64,
  pub overspeed_threshold: f64,
  pub emission: EmissionPolicy,
  /// 超过该帧数未更新的轨迹被移除，`None` 表示永久保留
  pub stale_after: Option<u64>,
  pub location: String,
  pub allowed_classes: Vec<VehicleClass>,
  pub max_frames: Option<u64>,
  pub progress_interval: u64,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      trajectory_len: DEFAULT_TRAJECTORY_LEN,
      min_samples: DEFAULT_MIN_SAMPLES,
      pixels_per_meter: DEFAULT_PIXELS_PER_METER,
      speed_fps: SpeedFps::default(),
      violation_threshold: DEFAULT_VIOLATION_THRESHOLD,
      overspeed_threshold: DEFAULT_OVERSPEED_THRESHOLD,
      emission: EmissionPolicy::default(),
      stale_after: None,
      location: DEFAULT_LOCATION.to_string(),
      allowed_classes: VehicleClass::ALL.to_vec(),
      max_frames: None,
      progress_interval: DEFAULT_PROGRESS_INTERVAL,
    }
  }
}

impl PipelineConfig {
  pub fn track_store(&self) -> TrackStore {
    TrackStore::new(self.trajectory_len).with_stale_after(self.stale_after)
  }

  pub fn speed_estimator(&self) -> SpeedEstimator {
    SpeedEstimator::new(self.pixels_per_meter)
  }

  pub fn violation_policy(&self) -> ViolationPolicy {
    ViolationPolicy::new(self.violation_threshold, self.emission)
  }

  pub fn is_allowed(&self, class: VehicleClass) -> bool {
    self.allowed_classes.contains(&class)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults() {
    let config = PipelineConfig::default();
    assert_eq!(config.trajectory_len, 10);
    assert_eq!(config.min_samples, 5);
    assert_eq!(config.location, "Highway A");
    assert_eq!(config.speed_fps, SpeedFps::Fixed(30.0));
    assert_eq!(config.emission, EmissionPolicy::EveryFrame);
    assert!(config.stale_after.is_none());
    assert!(config.is_allowed(VehicleClass::Truck));
  }

  #[test]
  fn speed_fps_parsing() {
    let info = StreamInfo::new(640, 480, 25.0);
    assert_eq!("stream".parse::<SpeedFps>().unwrap().resolve(&info), 25.0);
    assert_eq!("60".parse::<SpeedFps>().unwrap().resolve(&info), 60.0);
    assert!("0".parse::<SpeedFps>().is_err());
    assert!("fast".parse::<SpeedFps>().is_err());
  }
}
