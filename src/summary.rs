// 该文件是 Liusu （流速） 项目的一部分。
// src/summary.rs - 超速统计
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashSet;
use std::path::Path;

use serde_json::{Value, json};

use crate::{detector::TrackId, sink::ViolationRecord};

/// 摘要中列出的最近记录条数
pub const RECENT_LIMIT: usize = 50;

fn round2(value: f64) -> f64 {
  (value * 100.0).round() / 100.0
}

/// 按车辆（TrackID 去重）统计的超速摘要
#[derive(Debug, Clone, PartialEq)]
pub struct OverspeedSummary {
  pub overspeed_threshold: f64,
  pub total_vehicles: usize,
  pub overspeed_vehicles: usize,
  pub normal_vehicles: usize,
  pub average_speed: f64,
  pub top_speed: f64,
}

impl OverspeedSummary {
  /// 平均速度与最高速度按记录条数统计，车辆数按 TrackID 去重
  pub fn from_records(records: &[ViolationRecord], overspeed_threshold: f64) -> Self {
    let all: HashSet<TrackId> = records.iter().map(|r| r.track_id).collect();
    let overspeed: HashSet<TrackId> = records
      .iter()
      .filter(|r| r.speed > overspeed_threshold)
      .map(|r| r.track_id)
      .collect();

    let (average_speed, top_speed) = if records.is_empty() {
      (0.0, 0.0)
    } else {
      let sum: f64 = records.iter().map(|r| r.speed).sum();
      let top = records.iter().map(|r| r.speed).fold(f64::MIN, f64::max);
      (sum / records.len() as f64, top)
    };

    Self {
      overspeed_threshold,
      total_vehicles: all.len(),
      overspeed_vehicles: overspeed.len(),
      normal_vehicles: all.len().saturating_sub(overspeed.len()),
      average_speed: round2(average_speed),
      top_speed: round2(top_speed),
    }
  }

  pub fn to_json(&self) -> Value {
    json!({
      "overspeed_threshold": self.overspeed_threshold,
      "total_vehicles": self.total_vehicles,
      "overspeed_count": self.overspeed_vehicles,
      "normal_count": self.normal_vehicles,
      "avg_speed": self.average_speed,
      "top_speed": self.top_speed,
    })
  }
}

fn record_json(record: &ViolationRecord) -> Value {
  json!({
    "track_id": record.track_id,
    "timestamp": record.timestamp_str(),
    "vehicle": record.vehicle,
    "speed": round2(record.speed),
    "plate": record.plate,
    "location": record.location,
    "frame": record.frame_index,
    "position_secs": record.position_secs,
  })
}

/// 摘要加上最近的若干条记录（按时间倒序）
pub fn summary_report(records: &[ViolationRecord], overspeed_threshold: f64) -> Value {
  let mut recent: Vec<&ViolationRecord> = records.iter().collect();
  // 同一时间戳保持后记录者在前
  recent.reverse();
  recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

  let mut report = OverspeedSummary::from_records(records, overspeed_threshold).to_json();
  report["violations"] = Value::Array(
    recent
      .into_iter()
      .take(RECENT_LIMIT)
      .map(record_json)
      .collect(),
  );
  report
}

pub fn write_report(path: &Path, report: &Value) -> Result<(), std::io::Error> {
  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() {
      std::fs::create_dir_all(parent)?;
    }
  }
  let text = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
  std::fs::write(path, text)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::violation::DEFAULT_OVERSPEED_THRESHOLD;

  fn record(track_id: TrackId, speed: f64) -> ViolationRecord {
    ViolationRecord::now(track_id, "Car", speed, "UNKNOWN", "Highway A")
  }

  #[test]
  fn vehicles_are_counted_once() {
    let records = vec![
      record(1, 96.0),
      record(1, 100.0),
      record(2, 12.0),
      record(2, 81.0),
      record(3, 15.5),
    ];
    let summary = OverspeedSummary::from_records(&records, DEFAULT_OVERSPEED_THRESHOLD);
    assert_eq!(summary.total_vehicles, 3);
    assert_eq!(summary.overspeed_vehicles, 2);
    assert_eq!(summary.normal_vehicles, 1);
    assert_eq!(summary.average_speed, 60.9);
    assert_eq!(summary.top_speed, 100.0);
  }

  #[test]
  fn overspeed_is_strictly_greater() {
    let records = vec![record(1, 80.0)];
    let summary = OverspeedSummary::from_records(&records, 80.0);
    assert_eq!(summary.overspeed_vehicles, 0);
    assert_eq!(summary.normal_vehicles, 1);
  }

  #[test]
  fn empty_log_is_all_zero() {
    let summary = OverspeedSummary::from_records(&[], 80.0);
    assert_eq!(summary.total_vehicles, 0);
    assert_eq!(summary.average_speed, 0.0);
    assert_eq!(summary.top_speed, 0.0);
  }

  #[test]
  fn report_lists_recent_records() {
    let records: Vec<ViolationRecord> = (0..60).map(|i| record(i, 20.0 + i as f64 / 3.0)).collect();
    let report = summary_report(&records, 80.0);
    let listed = report["violations"].as_array().unwrap();
    assert_eq!(listed.len(), RECENT_LIMIT);
    assert_eq!(report["total_vehicles"], 60);
    assert_eq!(listed[0]["speed"], 39.67);
  }
}
