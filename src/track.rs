// 该文件是 Liusu （流速） 项目的一部分。
// src/track.rs - 轨迹存储
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::detector::TrackId;

/// 默认轨迹长度（最近 N 个中心点）
pub const DEFAULT_TRAJECTORY_LEN: usize = 10;

/// 像素坐标点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
  pub x: f64,
  pub y: f64,
}

impl Point {
  pub fn new(x: f64, y: f64) -> Self {
    Self { x, y }
  }

  pub fn distance(&self, other: &Point) -> f64 {
    (self.x - other.x).hypot(self.y - other.y)
  }
}

/// 一个跟踪编号的有界中心点历史，满后先进先出
#[derive(Debug, Clone)]
pub struct Trajectory {
  points: VecDeque<Point>,
  capacity: usize,
}

impl Trajectory {
  pub fn with_capacity(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      points: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  /// 追加一个点，超出容量时返回被淘汰的最旧点
  pub fn push(&mut self, point: Point) -> Option<Point> {
    let evicted = if self.points.len() == self.capacity {
      self.points.pop_front()
    } else {
      None
    };
    self.points.push_back(point);
    evicted
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.points.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  #[inline]
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn first(&self) -> Option<&Point> {
    self.points.front()
  }

  pub fn last(&self) -> Option<&Point> {
    self.points.back()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Point> {
    self.points.iter()
  }
}

impl FromIterator<Point> for Trajectory {
  fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
    let points: VecDeque<Point> = iter.into_iter().collect();
    let capacity = points.len().max(1);
    let mut trajectory = Trajectory::with_capacity(capacity);
    for point in points {
      trajectory.push(point);
    }
    trajectory
  }
}

#[derive(Debug)]
struct TrackEntry {
  trajectory: Trajectory,
  last_seen: u64,
}

/// 按跟踪编号保存轨迹。
///
/// 默认不会删除任何条目；设置 `stale_after` 后，超过该帧数未更新的条目会在
/// [`TrackStore::evict_stale`] 中被移除。
#[derive(Debug)]
pub struct TrackStore {
  tracks: HashMap<TrackId, TrackEntry>,
  trajectory_len: usize,
  stale_after: Option<u64>,
}

impl Default for TrackStore {
  fn default() -> Self {
    Self::new(DEFAULT_TRAJECTORY_LEN)
  }
}

impl TrackStore {
  pub fn new(trajectory_len: usize) -> Self {
    Self {
      tracks: HashMap::new(),
      trajectory_len,
      stale_after: None,
    }
  }

  pub fn with_stale_after(mut self, stale_after: Option<u64>) -> Self {
    self.stale_after = stale_after;
    self
  }

  /// 查找或创建轨迹，追加中心点并返回只读视图
  pub fn update(&mut self, track_id: TrackId, centroid: Point, frame_index: u64) -> &Trajectory {
    let trajectory_len = self.trajectory_len;
    let entry = self.tracks.entry(track_id).or_insert_with(|| {
      debug!("新轨迹: {}", track_id);
      TrackEntry {
        trajectory: Trajectory::with_capacity(trajectory_len),
        last_seen: frame_index,
      }
    });
    entry.trajectory.push(centroid);
    entry.last_seen = frame_index;
    &entry.trajectory
  }

  pub fn get(&self, track_id: TrackId) -> Option<&Trajectory> {
    self.tracks.get(&track_id).map(|e| &e.trajectory)
  }

  pub fn last_seen(&self, track_id: TrackId) -> Option<u64> {
    self.tracks.get(&track_id).map(|e| e.last_seen)
  }

  /// 移除超过 `stale_after` 帧未更新的轨迹，返回被移除的编号
  pub fn evict_stale(&mut self, current_frame: u64) -> Vec<TrackId> {
    let Some(stale_after) = self.stale_after else {
      return Vec::new();
    };

    let stale: Vec<TrackId> = self
      .tracks
      .iter()
      .filter(|(_, e)| current_frame.saturating_sub(e.last_seen) > stale_after)
      .map(|(id, _)| *id)
      .collect();
    for id in &stale {
      self.tracks.remove(id);
      debug!("移除过期轨迹: {}", id);
    }
    stale
  }

  pub fn len(&self) -> usize {
    self.tracks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tracks.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn trajectory_keeps_most_recent_points_in_order() {
    let mut store = TrackStore::default();
    for i in 0..25 {
      let trajectory = store.update(1, Point::new(i as f64, 0.0), i);
      assert!(trajectory.len() <= DEFAULT_TRAJECTORY_LEN);
    }
    let xs: Vec<f64> = store.get(1).unwrap().iter().map(|p| p.x).collect();
    let expected: Vec<f64> = (15..25).map(|i| i as f64).collect();
    assert_eq!(xs, expected);
  }

  #[test]
  fn push_reports_fifo_eviction() {
    let mut trajectory = Trajectory::with_capacity(2);
    assert_eq!(trajectory.push(Point::new(1.0, 1.0)), None);
    assert_eq!(trajectory.push(Point::new(2.0, 2.0)), None);
    assert_eq!(trajectory.push(Point::new(3.0, 3.0)), Some(Point::new(1.0, 1.0)));
    assert_eq!(trajectory.first(), Some(&Point::new(2.0, 2.0)));
    assert_eq!(trajectory.last(), Some(&Point::new(3.0, 3.0)));
  }

  #[test]
  fn tracks_are_independent() {
    let mut store = TrackStore::default();
    store.update(1, Point::new(0.0, 0.0), 0);
    store.update(2, Point::new(5.0, 5.0), 0);
    store.update(1, Point::new(1.0, 0.0), 1);
    assert_eq!(store.len(), 2);
    assert_eq!(store.get(1).unwrap().len(), 2);
    assert_eq!(store.get(2).unwrap().len(), 1);
    assert_eq!(store.last_seen(1), Some(1));
  }

  #[test]
  fn tracks_accumulate_without_eviction_policy() {
    let mut store = TrackStore::default();
    store.update(1, Point::new(0.0, 0.0), 0);
    assert!(store.evict_stale(10_000).is_empty());
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn stale_tracks_are_evicted() {
    let mut store = TrackStore::default().with_stale_after(Some(3));
    store.update(1, Point::new(0.0, 0.0), 0);
    store.update(2, Point::new(0.0, 0.0), 2);
    assert!(store.evict_stale(3).is_empty());
    assert_eq!(store.evict_stale(4), vec![1]);
    assert!(store.get(1).is_none());
    assert!(store.get(2).is_some());
  }
}
