// 该文件是 Liusu （流速） 项目的一部分。
// src/detector/process.rs - 外部检测进程
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 通过标准输入/输出与常驻的外部检测进程通信。
//!
//! 每帧发送一行 JSON 头 `{"frame": n, "width": w, "height": h}`，紧接着
//! `w * h * 3` 字节的 RGB24 数据；进程需回复一行 JSON 检测结果数组
//! （或带 `detections` 字段的对象）。
//!
//! URL 格式: `exec:///path/to/detector?arg=--model&arg=yolov8m.pt`

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::{Detection, Detector, DetectorError, parse_detections},
  frame::VideoFrame,
  url_to_path,
};

/// 关闭输入后等待检测进程自行退出的时间
const EXIT_GRACE: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct ProcessDetector {
  program: PathBuf,
  child: Child,
  stdin: Option<ChildStdin>,
  stdout: BufReader<ChildStdout>,
}

impl FromUrlWithScheme for ProcessDetector {
  const SCHEME: &'static str = "exec";
}

impl FromUrl for ProcessDetector {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectorError::SchemeMismatch(url.scheme().to_string()));
    }
    let args: Vec<String> = url
      .query_pairs()
      .filter(|(k, _)| k == "arg")
      .map(|(_, v)| v.into_owned())
      .collect();
    Self::spawn(url_to_path(url), &args)
  }
}

impl ProcessDetector {
  pub fn spawn(program: PathBuf, args: &[String]) -> Result<Self, DetectorError> {
    info!("启动检测进程: {} {:?}", program.display(), args);
    let mut child = Command::new(&program)
      .args(args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .spawn()?;

    let stdin = child.stdin.take();
    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| DetectorError::Process("无法获取检测进程标准输出".to_string()))?;

    Ok(ProcessDetector {
      program,
      child,
      stdin,
      stdout: BufReader::new(stdout),
    })
  }
}

impl Detector for ProcessDetector {
  fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<Detection>, DetectorError> {
    let stdin = self
      .stdin
      .as_mut()
      .ok_or_else(|| DetectorError::Process("检测进程输入已关闭".to_string()))?;

    let header = json!({
      "frame": frame.index,
      "width": frame.width(),
      "height": frame.height(),
    });
    writeln!(stdin, "{}", header)?;
    stdin.write_all(frame.image.as_raw())?;
    stdin.flush()?;

    let mut line = String::new();
    if self.stdout.read_line(&mut line)? == 0 {
      return Err(DetectorError::Process(format!(
        "检测进程 {} 已退出",
        self.program.display()
      )));
    }

    let value: Value = serde_json::from_str(line.trim())?;
    match value.get("detections") {
      Some(detections) => parse_detections(detections),
      None => parse_detections(&value),
    }
  }
}

impl Drop for ProcessDetector {
  fn drop(&mut self) {
    // 关闭输入，通知进程退出；超时未退出则强制结束
    drop(self.stdin.take());
    let start = Instant::now();
    loop {
      match self.child.try_wait() {
        Ok(Some(_)) => return,
        Ok(None) if start.elapsed() < EXIT_GRACE => std::thread::sleep(POLL_INTERVAL),
        Ok(None) => {
          warn!("检测进程 {} 未退出，强制结束", self.program.display());
          break;
        }
        Err(e) => {
          warn!("等待检测进程退出失败: {}", e);
          break;
        }
      }
    }
    if let Err(e) = self.child.kill() {
      warn!("停止检测进程失败: {}", e);
    }
    let _ = self.child.wait();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[cfg(unix)]
  fn script(name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let dir = std::env::temp_dir().join(format!("liusu-exec-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("detector.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
  }

  #[cfg(unix)]
  fn frame(index: u64) -> VideoFrame {
    VideoFrame::new(index, image::RgbImage::new(6, 4))
  }

  /// 读取头部，丢弃像素数据，按帧号回复一个检测框
  #[cfg(unix)]
  const ECHO_DETECTOR: &str = r#"
while IFS= read -r header; do
  w=$(echo "$header" | sed 's/.*"width":\([0-9]*\).*/\1/')
  h=$(echo "$header" | sed 's/.*"height":\([0-9]*\).*/\1/')
  f=$(echo "$header" | sed 's/.*"frame":\([0-9]*\).*/\1/')
  head -c $((w * h * 3)) > /dev/null
  echo "{\"detections\": [{\"bbox\": [$f, 0, $((f + 10)), 10], \"class\": \"car\", \"track_id\": 3}]}"
done
"#;

  #[cfg(unix)]
  #[test]
  fn line_protocol_stays_in_sync() {
    let program = script("sync", ECHO_DETECTOR);
    let mut detector = ProcessDetector::spawn(program.clone(), &[]).unwrap();

    for index in [0u64, 1, 7] {
      let detections = detector.detect(&frame(index)).unwrap();
      assert_eq!(detections.len(), 1);
      assert_eq!(detections[0].track_id, 3);
      assert_eq!(detections[0].class, crate::detector::VehicleClass::Car);
      assert_eq!(detections[0].bbox.centroid().x, index as f64 + 5.0);
    }

    drop(detector);
    std::fs::remove_dir_all(program.parent().unwrap()).unwrap();
  }

  #[cfg(unix)]
  #[test]
  fn exited_process_is_detector_error() {
    let program = script("exit", "head -n 1 > /dev/null\n");
    let mut detector = ProcessDetector::spawn(program.clone(), &[]).unwrap();
    assert!(detector.detect(&frame(0)).is_err());
    std::fs::remove_dir_all(program.parent().unwrap()).unwrap();
  }

  #[cfg(unix)]
  #[test]
  fn process_ignoring_eof_is_killed_on_drop() {
    let program = script("stubborn", "while true; do sleep 1; done\n");
    let detector = ProcessDetector::spawn(program.clone(), &[]).unwrap();
    let start = Instant::now();
    drop(detector);
    assert!(start.elapsed() < EXIT_GRACE + Duration::from_secs(3));
    std::fs::remove_dir_all(program.parent().unwrap()).unwrap();
  }

  #[test]
  fn missing_program_fails_to_spawn() {
    let url = Url::parse("exec:///no/such/detector/binary").unwrap();
    assert!(matches!(
      ProcessDetector::from_url(&url),
      Err(DetectorError::IoError(_))
    ));
  }
}
