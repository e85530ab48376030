// 该文件是 Liusu （流速） 项目的一部分。
// src/output/ffmpeg_video_output.rs - 保存视频文件
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 视频文件输出模块
//!
//! 将标注后的帧以 RGB24 原始数据写入 ffmpeg 子进程的标准输入，由 ffmpeg
//! 编码并封装为视频文件。输出尺寸与帧率和输入完全一致。
//!
//! # URL 格式
//!
//! - `video:///path/to/output.mp4` - 输出视频路径（mp4/mkv/avi 使用 H.264）
//! - `video:///path/to/output.webm` - WebM 使用 VP9
//! - `video:///path/to/output.mp4?budget=600` - 等待编码完成的时间上限（秒）
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 命令行工具来编码视频。

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  frame::{StreamInfo, VideoFrame},
  output::VideoWriter,
  query_param, url_to_path,
};

#[derive(Error, Debug)]
pub enum FfmpegVideoOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("视频编码错误: {0}")]
  EncodingError(String),
  #[error("帧尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("等待编码完成超时 ({0:?})")]
  Timeout(Duration),
  #[error("输出文件不存在: {0}")]
  OutputMissing(PathBuf),
  #[error("输出已关闭")]
  Closed,
}

const DEFAULT_BUDGET_SECS: u64 = 600;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 编码器进程
struct Encoder {
  child: Child,
  stdin: Option<ChildStdin>,
  stderr: Option<JoinHandle<String>>,
}

impl Encoder {
  fn spawn(path: &Path, info: &StreamInfo) -> Result<Self, FfmpegVideoOutputError> {
    let extension = path
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| e.to_ascii_lowercase())
      .unwrap_or_default();
    let codec = if extension == "webm" {
      "libvpx-vp9"
    } else {
      "libx264"
    };
    // 4:2:0 采样要求宽高为偶数，奇数尺寸改用 4:4:4 以保持原尺寸
    let pix_fmt = if info.width % 2 == 0 && info.height % 2 == 0 {
      "yuv420p"
    } else {
      "yuv444p"
    };

    let mut child = Command::new("ffmpeg")
      .arg("-y") // 覆盖已存在的文件
      .arg("-loglevel")
      .arg("error")
      .arg("-f")
      .arg("rawvideo")
      .arg("-pix_fmt")
      .arg("rgb24")
      .arg("-s")
      .arg(format!("{}x{}", info.width, info.height))
      .arg("-r")
      .arg(format!("{}", info.fps))
      .arg("-i")
      .arg("-")
      .arg("-c:v")
      .arg(codec)
      .arg("-pix_fmt")
      .arg(pix_fmt)
      .arg(path)
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| {
        FfmpegVideoOutputError::EncodingError(format!("无法执行 ffmpeg (请确保已安装): {}", e))
      })?;

    let stdin = child.stdin.take();
    // 持续读取错误输出，避免管道写满阻塞编码器
    let stderr = child.stderr.take().map(|mut stderr| {
      std::thread::spawn(move || {
        let mut buffer = String::new();
        let _ = stderr.read_to_string(&mut buffer);
        buffer
      })
    });

    Ok(Encoder {
      child,
      stdin,
      stderr,
    })
  }

  fn stderr_text(&mut self) -> String {
    self
      .stderr
      .take()
      .and_then(|handle| handle.join().ok())
      .unwrap_or_default()
  }

  /// 关闭输入并在时间预算内等待编码器退出
  fn wait(&mut self, budget: Duration) -> Result<(), FfmpegVideoOutputError> {
    drop(self.stdin.take());

    let start = Instant::now();
    let status = loop {
      if let Some(status) = self.child.try_wait()? {
        break status;
      }
      if start.elapsed() >= budget {
        if let Err(e) = self.child.kill() {
          warn!("停止 ffmpeg 编码进程失败: {}", e);
        }
        let _ = self.child.wait();
        return Err(FfmpegVideoOutputError::Timeout(budget));
      }
      std::thread::sleep(POLL_INTERVAL);
    };

    let stderr = self.stderr_text();
    if status.success() {
      Ok(())
    } else {
      error!("ffmpeg 错误: {}", stderr.trim());
      Err(FfmpegVideoOutputError::EncodingError(format!(
        "ffmpeg 失败 ({}): {}",
        status,
        stderr.trim()
      )))
    }
  }
}

/// FFmpeg 视频文件输出
pub struct FfmpegVideoOutput {
  path: PathBuf,
  info: StreamInfo,
  budget: Duration,
  encoder: Option<Encoder>,
  frames_written: u64,
}

impl FfmpegVideoOutput {
  pub const SCHEME: &'static str = "video";

  pub fn open(url: &Url, info: StreamInfo) -> Result<Self, FfmpegVideoOutputError> {
    if url.scheme() != Self::SCHEME {
      return Err(FfmpegVideoOutputError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let path = url_to_path(url);
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let budget = Duration::from_secs(query_param(url, "budget").unwrap_or(DEFAULT_BUDGET_SECS));
    let encoder = Encoder::spawn(&path, &info)?;
    info!(
      "视频输出已创建: {}x{} @ {:.2} fps -> {}",
      info.width,
      info.height,
      info.fps,
      path.display()
    );

    Ok(FfmpegVideoOutput {
      path,
      info,
      budget,
      encoder: Some(encoder),
      frames_written: 0,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl VideoWriter for FfmpegVideoOutput {
  type Error = FfmpegVideoOutputError;

  fn write_frame(&mut self, frame: &VideoFrame) -> Result<(), Self::Error> {
    let actual = (frame.width(), frame.height());
    let expected = (self.info.width, self.info.height);
    if actual != expected {
      return Err(FfmpegVideoOutputError::FrameSizeMismatch { expected, actual });
    }

    let encoder = self.encoder.as_mut().ok_or(FfmpegVideoOutputError::Closed)?;
    let stdin = encoder.stdin.as_mut().ok_or(FfmpegVideoOutputError::Closed)?;
    if let Err(e) = stdin.write_all(frame.image.as_raw()) {
      let stderr = encoder.stderr_text();
      return Err(FfmpegVideoOutputError::EncodingError(format!(
        "写入帧失败: {} {}",
        e,
        stderr.trim()
      )));
    }
    self.frames_written += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    let mut encoder = self.encoder.take().ok_or(FfmpegVideoOutputError::Closed)?;
    encoder.wait(self.budget)?;

    // 以输出文件是否存在作为成功的判据
    let exists = std::fs::metadata(&self.path)
      .map(|m| m.is_file() && m.len() > 0)
      .unwrap_or(false);
    if !exists {
      return Err(FfmpegVideoOutputError::OutputMissing(self.path.clone()));
    }

    info!(
      "视频已保存到文件: {} (共 {} 帧)",
      self.path.display(),
      self.frames_written
    );
    Ok(())
  }
}

impl Drop for FfmpegVideoOutput {
  fn drop(&mut self) {
    if self.encoder.is_some() {
      warn!("视频输出未显式完成，正在收尾");
      if let Err(e) = self.finish() {
        error!("编码视频时出错: {}", e);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scheme_is_checked_before_spawning() {
    let url = Url::parse("frames:///tmp/out").unwrap();
    let info = StreamInfo::new(4, 4, 30.0);
    assert!(matches!(
      FfmpegVideoOutput::open(&url, info),
      Err(FfmpegVideoOutputError::SchemeMismatch(_))
    ));
  }

  /// 编码测试需要带 libx264 的 ffmpeg，缺失时跳过
  fn encoder_available() -> bool {
    Command::new("ffmpeg")
      .arg("-hide_banner")
      .arg("-encoders")
      .output()
      .map(|o| o.status.success() && String::from_utf8_lossy(&o.stdout).contains("libx264"))
      .unwrap_or(false)
  }

  fn temp_video(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("liusu-video-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir.join("annotated.mp4")
  }

  fn video_url(path: &Path, query: &str) -> Url {
    Url::parse(&format!("video://{}{}", path.display(), query)).unwrap()
  }

  fn gray_frames(info: &StreamInfo, shades: &[u8]) -> Vec<VideoFrame> {
    shades
      .iter()
      .enumerate()
      .map(|(i, shade)| {
        let image = image::RgbImage::from_pixel(info.width, info.height, image::Rgb([*shade; 3]));
        VideoFrame::new(i as u64, image)
      })
      .collect()
  }

  fn encode(path: &Path, info: StreamInfo, shades: &[u8]) {
    let mut output = FfmpegVideoOutput::open(&video_url(path, ""), info).unwrap();
    for frame in gray_frames(&info, shades) {
      output.write_frame(&frame).unwrap();
    }
    output.finish().unwrap();
    assert!(std::fs::metadata(path).unwrap().len() > 0);
  }

  #[cfg(feature = "ffmpeg_input")]
  #[test]
  fn encoded_video_keeps_size_rate_and_order() {
    if !encoder_available() {
      eprintln!("ffmpeg with libx264 not found, skipping");
      return;
    }
    let path = temp_video("even");
    let info = StreamInfo::new(64, 48, 25.0);
    encode(&path, info, &[0, 60, 120, 180, 240]);

    let decoded = crate::input::FfmpegInput::open(path.clone()).unwrap();
    let decoded_info = crate::input::FrameSource::stream_info(&decoded);
    assert_eq!((decoded_info.width, decoded_info.height), (64, 48));
    assert!((decoded_info.fps - 25.0).abs() < 0.01);

    let centre: Vec<u8> = decoded.map(|f| f.image.get_pixel(32, 24)[0]).collect();
    assert_eq!(centre.len(), 5);
    assert!(centre.windows(2).all(|w| w[0] < w[1]), "{:?}", centre);
    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
  }

  #[cfg(feature = "ffmpeg_input")]
  #[test]
  fn odd_dimensions_are_preserved() {
    if !encoder_available() {
      eprintln!("ffmpeg with libx264 not found, skipping");
      return;
    }
    let path = temp_video("odd");
    let info = StreamInfo::new(33, 17, 30.0);
    encode(&path, info, &[50, 100, 150]);

    let decoded = crate::input::FfmpegInput::open(path.clone()).unwrap();
    let frames: Vec<VideoFrame> = decoded.collect();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| (f.width(), f.height()) == (33, 17)));
    assert_eq!(
      frames.iter().map(|f| f.index).collect::<Vec<_>>(),
      vec![0, 1, 2]
    );
    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
  }

  #[test]
  fn frame_size_is_checked() {
    if !encoder_available() {
      eprintln!("ffmpeg with libx264 not found, skipping");
      return;
    }
    let path = temp_video("size");
    let info = StreamInfo::new(16, 16, 30.0);
    let mut output = FfmpegVideoOutput::open(&video_url(&path, ""), info).unwrap();
    let wrong = VideoFrame::new(0, image::RgbImage::new(8, 8));
    assert!(matches!(
      output.write_frame(&wrong),
      Err(FfmpegVideoOutputError::FrameSizeMismatch { .. })
    ));
    let _ = output.finish();
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
  }

  #[test]
  fn finish_wait_is_bounded() {
    if !encoder_available() {
      eprintln!("ffmpeg with libx264 not found, skipping");
      return;
    }
    let path = temp_video("budget");
    let info = StreamInfo::new(320, 240, 30.0);
    let mut output = FfmpegVideoOutput::open(&video_url(&path, "?budget=0"), info).unwrap();
    for frame in gray_frames(&info, &[10; 30]) {
      output.write_frame(&frame).unwrap();
    }
    assert!(matches!(
      output.finish(),
      Err(FfmpegVideoOutputError::Timeout(_))
    ));
    // 已收尾，再次完成报告关闭
    assert!(matches!(output.finish(), Err(FfmpegVideoOutputError::Closed)));
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
  }
}
