// 该文件是 Liusu （流速） 项目的一部分。
// src/violation.rs - 超速判定
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;
use std::str::FromStr;

use crate::detector::TrackId;

/// 帧级违规阈值（km/h）：决定标红与车牌识别
pub const DEFAULT_VIOLATION_THRESHOLD: f64 = 10.0;
/// 汇总视图中的"超速"阈值（km/h）
pub const DEFAULT_OVERSPEED_THRESHOLD: f64 = 80.0;

/// 违规记录的产生方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmissionPolicy {
  /// 每个满足条件的帧都产生一条记录
  #[default]
  EveryFrame,
  /// 连续违规帧只在第一帧产生记录，恢复正常后再次违规会重新产生
  OncePerEpisode,
  /// 每个跟踪编号最多一条记录
  OncePerTrack,
}

impl FromStr for EmissionPolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "every-frame" => Ok(EmissionPolicy::EveryFrame),
      "once-per-episode" => Ok(EmissionPolicy::OncePerEpisode),
      "once-per-track" => Ok(EmissionPolicy::OncePerTrack),
      other => Err(format!(
        "未知的记录策略 '{}' (可选: every-frame, once-per-episode, once-per-track)",
        other
      )),
    }
  }
}

#[derive(Debug, Default, Clone, Copy)]
struct EmissionState {
  in_violation: bool,
  recorded: bool,
}

/// 超速判定策略，阈值比较为严格大于
#[derive(Debug)]
pub struct ViolationPolicy {
  threshold: f64,
  emission: EmissionPolicy,
  states: HashMap<TrackId, EmissionState>,
}

impl Default for ViolationPolicy {
  fn default() -> Self {
    Self::new(DEFAULT_VIOLATION_THRESHOLD, EmissionPolicy::default())
  }
}

impl ViolationPolicy {
  pub fn new(threshold: f64, emission: EmissionPolicy) -> Self {
    Self {
      threshold,
      emission,
      states: HashMap::new(),
    }
  }

  pub fn threshold(&self) -> f64 {
    self.threshold
  }

  /// 纯函数：速度是否严格超过阈值
  pub fn evaluate(&self, speed_kmh: f64) -> bool {
    speed_kmh > self.threshold
  }

  /// 根据记录策略决定本次判定是否产生违规记录，并更新该轨迹的状态
  pub fn should_record(&mut self, track_id: TrackId, is_violation: bool) -> bool {
    if self.emission == EmissionPolicy::EveryFrame {
      return is_violation;
    }

    let state = self.states.entry(track_id).or_default();
    let record = match self.emission {
      EmissionPolicy::EveryFrame => is_violation,
      EmissionPolicy::OncePerEpisode => is_violation && !state.in_violation,
      EmissionPolicy::OncePerTrack => is_violation && !state.recorded,
    };
    state.in_violation = is_violation;
    state.recorded |= record;
    record
  }

  /// 轨迹被移除时清理对应状态
  pub fn forget(&mut self, track_id: TrackId) {
    self.states.remove(&track_id);
  }
}
