// 该文件是 Liusu （流速） 项目的一部分。
// src/detector/track_file.rs - 预计算跟踪结果文件
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 读取外部跟踪器预先导出的 JSON Lines 文件，每行对应一帧：
//!
//! ```text
//! {"frame": 0, "detections": [{"bbox": [x1, y1, x2, y2], "class": "car", "track_id": 1}]}
//! ```
//!
//! URL 格式: `tracks:///path/to/tracks.jsonl`

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::{Detection, Detector, DetectorError, parse_detections},
  frame::VideoFrame,
  url_to_path,
};

pub struct TrackFileDetector {
  frames: BTreeMap<u64, Value>,
}

impl FromUrlWithScheme for TrackFileDetector {
  const SCHEME: &'static str = "tracks";
}

impl FromUrl for TrackFileDetector {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectorError::SchemeMismatch(url.scheme().to_string()));
    }
    Self::open(&url_to_path(url))
  }
}

impl TrackFileDetector {
  pub fn open(path: &Path) -> Result<Self, DetectorError> {
    let content = std::fs::read_to_string(path)?;
    let detector = Self::parse(&content);
    info!(
      "加载跟踪结果文件: {} ({} 帧)",
      path.display(),
      detector.frames.len()
    );
    Ok(detector)
  }

  /// 解析 JSON Lines 内容，无法解析的行记录警告后跳过
  pub fn parse(content: &str) -> Self {
    let mut frames = BTreeMap::new();
    for (line_no, line) in content.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
          warn!("跟踪结果第 {} 行无法解析: {}", line_no + 1, e);
          continue;
        }
      };
      let Some(frame) = value.get("frame").and_then(|f| f.as_u64()) else {
        warn!("跟踪结果第 {} 行缺少 frame 字段", line_no + 1);
        continue;
      };
      let detections = value.get("detections").cloned().unwrap_or(Value::Null);
      if frames.insert(frame, detections).is_some() {
        warn!("跟踪结果中第 {} 帧重复出现，使用后出现的记录", frame);
      }
    }
    TrackFileDetector { frames }
  }
}

impl Detector for TrackFileDetector {
  fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<Detection>, DetectorError> {
    match self.frames.get(&frame.index) {
      Some(value) => parse_detections(value),
      None => Ok(Vec::new()),
    }
  }
}
