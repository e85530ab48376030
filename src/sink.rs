// 该文件是 Liusu （流速） 项目的一部分。
// src/sink.rs - 违章记录
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, Timelike};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  detector::TrackId,
  notify::{Notification, NotificationQueue},
};

pub const CSV_HEADER: &str = "TrackID,Timestamp,Vehicle,Speed,LicensePlate,Location";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum SinkError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录格式错误 (第 {line} 行): {reason}")]
  Malformed { line: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViolationRecord {
  pub track_id: TrackId,
  pub timestamp: NaiveDateTime,
  pub vehicle: String,
  pub speed: f64,
  pub plate: String,
  pub location: String,
  /// 以下两项不写入 CSV，仅供摘要使用
  pub frame_index: u64,
  pub position_secs: f64,
}

impl ViolationRecord {
  /// 以当前本地时间作为时间戳
  pub fn now(
    track_id: TrackId,
    vehicle: impl Into<String>,
    speed: f64,
    plate: impl Into<String>,
    location: impl Into<String>,
  ) -> Self {
    // 日志只保留到秒
    let now = Local::now().naive_local();
    Self {
      track_id,
      timestamp: now.with_nanosecond(0).unwrap_or(now),
      vehicle: vehicle.into(),
      speed,
      plate: plate.into(),
      location: location.into(),
      frame_index: 0,
      position_secs: 0.0,
    }
  }

  pub fn at_frame(mut self, frame_index: u64, position_secs: f64) -> Self {
    self.frame_index = frame_index;
    self.position_secs = position_secs;
    self
  }

  pub fn timestamp_str(&self) -> String {
    self.timestamp.format(TIMESTAMP_FORMAT).to_string()
  }

  pub fn notification(&self) -> Notification {
    Notification::speed_violation(&self.timestamp_str(), &self.plate, self.speed, &self.location)
  }

  pub fn to_csv_row(&self) -> String {
    [
      self.track_id.to_string(),
      self.timestamp_str(),
      csv_field(&self.vehicle),
      format!("{:.2}", self.speed),
      csv_field(&self.plate),
      csv_field(&self.location),
    ]
    .join(",")
  }
}

/// 含分隔符、引号或换行的字段加引号，内部引号双写
fn csv_field(value: &str) -> String {
  if value.contains([',', '"', '\n', '\r']) {
    format!("\"{}\"", value.replace('"', "\"\""))
  } else {
    value.to_string()
  }
}

/// 拆分单行 CSV
pub(crate) fn split_csv_line(line: &str) -> Vec<String> {
  let mut fields = Vec::new();
  let mut field = String::new();
  let mut quoted = false;
  let mut chars = line.chars().peekable();

  while let Some(c) = chars.next() {
    match (c, quoted) {
      ('"', true) if chars.peek() == Some(&'"') => {
        field.push('"');
        chars.next();
      }
      ('"', true) => quoted = false,
      ('"', false) if field.is_empty() => quoted = true,
      (',', false) => fields.push(std::mem::take(&mut field)),
      (c, _) => field.push(c),
    }
  }
  fields.push(field);
  fields
}

/// 读取违章记录 CSV，帧信息不在文件中，置为 0
pub fn read_log(path: &Path) -> Result<Vec<ViolationRecord>, SinkError> {
  let content = std::fs::read_to_string(path)?;
  let mut records = Vec::new();

  for (number, line) in content.lines().enumerate().skip(1) {
    if line.trim().is_empty() {
      continue;
    }
    let malformed = |reason: String| SinkError::Malformed {
      line: number + 1,
      reason,
    };
    let fields = split_csv_line(line);
    if fields.len() != 6 {
      return Err(malformed(format!("期望 6 列, 实际 {} 列", fields.len())));
    }
    let track_id = fields[0]
      .trim()
      .parse::<TrackId>()
      .map_err(|e| malformed(format!("TrackID: {}", e)))?;
    let timestamp = NaiveDateTime::parse_from_str(fields[1].trim(), TIMESTAMP_FORMAT)
      .map_err(|e| malformed(format!("Timestamp: {}", e)))?;
    let speed = fields[3]
      .trim()
      .parse::<f64>()
      .map_err(|e| malformed(format!("Speed: {}", e)))?;

    records.push(ViolationRecord {
      track_id,
      timestamp,
      vehicle: fields[2].clone(),
      speed,
      plate: fields[4].clone(),
      location: fields[5].clone(),
      frame_index: 0,
      position_secs: 0.0,
    });
  }

  Ok(records)
}

/// 违章记录汇集
///
/// 记录在内存中累积，`flush` 时一次性写出 CSV（先写临时文件再重命名，
/// 覆盖同名文件）。若配置了通知队列，每条记录在 `record` 时即投递通知。
pub struct ViolationSink {
  path: PathBuf,
  records: Vec<ViolationRecord>,
  notifications: Option<NotificationQueue>,
}

impl ViolationSink {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      records: Vec::new(),
      notifications: None,
    }
  }

  pub fn with_notifications(mut self, queue: NotificationQueue) -> Self {
    self.notifications = Some(queue);
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn records(&self) -> &[ViolationRecord] {
    &self.records
  }

  pub fn record(&mut self, record: ViolationRecord) {
    if let Some(queue) = &self.notifications {
      queue.send(record.notification());
    }
    self.records.push(record);
  }

  /// 写出日志并关闭通知队列，返回写出的记录数
  pub fn flush(&mut self) -> Result<usize, SinkError> {
    let written = self.write_log();
    if let Some(mut queue) = self.notifications.take() {
      queue.close();
    }
    let written = written?;
    info!("违章记录已保存到文件: {} (共 {} 条)", self.path.display(), written);
    Ok(written)
  }

  fn write_log(&self) -> Result<usize, SinkError> {
    if let Some(parent) = self.path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let file_name = self
      .path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| "violations".to_string());
    let temp_path = self.path.with_file_name(format!(".{}.tmp", file_name));

    let result = (|| -> Result<(), std::io::Error> {
      let mut writer = BufWriter::new(File::create(&temp_path)?);
      writeln!(writer, "{}", CSV_HEADER)?;
      for record in &self.records {
        writeln!(writer, "{}", record.to_csv_row())?;
      }
      writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
      std::fs::rename(&temp_path, &self.path)
    })();

    if let Err(e) = result {
      if temp_path.exists() {
        if let Err(e) = std::fs::remove_file(&temp_path) {
          warn!("删除临时文件失败: {}", e);
        }
      }
      return Err(e.into());
    }
    Ok(self.records.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::notify::{Notifier, NotifyError};
  use chrono::NaiveDate;
  use std::sync::{Arc, Mutex};

  fn at(track_id: TrackId, speed: f64, plate: &str) -> ViolationRecord {
    let mut record = ViolationRecord::now(track_id, "Car", speed, plate, "Highway A");
    record.timestamp = NaiveDate::from_ymd_opt(2026, 3, 1)
      .and_then(|d| d.and_hms_opt(8, 30, 5))
      .unwrap();
    record
  }

  fn temp_log(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("liusu-sink-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir.join("speed_violations.csv")
  }

  #[test]
  fn csv_row_format() {
    assert_eq!(
      at(7, 108.004, "AB12345").to_csv_row(),
      "7,2026-03-01 08:30:05,Car,108.00,AB12345,Highway A"
    );
    let mut quoted = at(1, 12.346, "UNKNOWN");
    quoted.location = "Exit 4, \"north\"".to_string();
    assert_eq!(
      quoted.to_csv_row(),
      "1,2026-03-01 08:30:05,Car,12.35,UNKNOWN,\"Exit 4, \"\"north\"\"\""
    );
    assert_eq!(
      split_csv_line(&quoted.to_csv_row())[5],
      "Exit 4, \"north\""
    );
  }

  #[test]
  fn flush_writes_header_and_rows() {
    let path = temp_log("write");
    let mut sink = ViolationSink::new(&path);
    sink.record(at(3, 96.0, "AB12345"));
    sink.record(at(3, 100.0, "AB12345"));
    assert!(!path.exists());
    assert_eq!(sink.flush().unwrap(), 2);

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(lines.len(), 3);

    let back = read_log(&path).unwrap();
    assert_eq!(back.len(), 2);
    assert_eq!(back[1].speed, 100.0);
    assert_eq!(back[1].timestamp, sink.records()[1].timestamp);
    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
  }

  #[test]
  fn flush_overwrites_previous_log() {
    let path = temp_log("overwrite");
    let mut first = ViolationSink::new(&path);
    for i in 0..5 {
      first.record(at(i, 50.0, "UNKNOWN"));
    }
    first.flush().unwrap();

    let mut second = ViolationSink::new(&path);
    second.record(at(9, 20.0, "UNKNOWN"));
    second.flush().unwrap();

    let back = read_log(&path).unwrap();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].track_id, 9);
    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
  }

  #[test]
  fn empty_sink_writes_header_only() {
    let path = temp_log("empty");
    ViolationSink::new(&path).flush().unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{}\n", CSV_HEADER));
    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
  }

  #[derive(Clone, Default)]
  struct Collect(Arc<Mutex<Vec<Notification>>>);

  impl Notifier for Collect {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
      self.0.lock().unwrap().push(notification.clone());
      Ok(())
    }
  }

  #[test]
  fn each_record_is_notified() {
    let path = temp_log("notify");
    let collect = Collect::default();
    let mut sink =
      ViolationSink::new(&path).with_notifications(NotificationQueue::spawn(collect.clone()));
    sink.record(at(3, 96.0, "AB12345"));
    sink.record(at(4, 11.0, "UNKNOWN"));
    sink.flush().unwrap();

    let seen = collect.0.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(
      seen[0].body,
      "At 2026-03-01 08:30:05, Vehicle AB12345 detected speeding at 96.00 km/h on Highway A."
    );
    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
  }

  #[test]
  fn malformed_log_reports_line() {
    let path = temp_log("malformed");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
      &path,
      format!("{}\n1,2026-03-01 08:30:05,Car,fast,UNKNOWN,Highway A\n", CSV_HEADER),
    )
    .unwrap();
    assert!(matches!(
      read_log(&path),
      Err(SinkError::Malformed { line: 2, .. })
    ));
    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
  }
}
