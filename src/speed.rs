// 该文件是 Liusu （流速） 项目的一部分。
// src/speed.rs - 速度估计
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use crate::track::Trajectory;

pub const DEFAULT_PIXELS_PER_METER: f64 = 20.0;
pub const DEFAULT_SPEED_FPS: f64 = 30.0;
const MPS_TO_KMH: f64 = 3.6;

/// 净位移速度估计器。
///
/// 使用轨迹首尾两点的直线距离，而非逐段路径长度之和；
/// 曲线或往返运动下会低估速度。经过时间取 `轨迹长度 / fps`。
#[derive(Debug, Clone, Copy)]
pub struct SpeedEstimator {
  pixels_per_meter: f64,
}

impl Default for SpeedEstimator {
  fn default() -> Self {
    Self::new(DEFAULT_PIXELS_PER_METER)
  }
}

impl SpeedEstimator {
  pub fn new(pixels_per_meter: f64) -> Self {
    Self { pixels_per_meter }
  }

  pub fn pixels_per_meter(&self) -> f64 {
    self.pixels_per_meter
  }

  /// 估计速度（km/h）。少于 2 个点或参数无效时返回 0
  pub fn estimate(&self, trajectory: &Trajectory, fps: f64) -> f64 {
    if trajectory.len() < 2 || !(fps.is_finite() && fps > 0.0) || self.pixels_per_meter <= 0.0 {
      return 0.0;
    }
    let (Some(first), Some(last)) = (trajectory.first(), trajectory.last()) else {
      return 0.0;
    };

    let meters = last.distance(first) / self.pixels_per_meter;
    let seconds = trajectory.len() as f64 / fps;
    meters / seconds * MPS_TO_KMH
  }
}
