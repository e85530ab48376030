// 该文件是 Liusu （流速） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use liusu::{
  config::{DEFAULT_LOCATION, PipelineConfig, SpeedFps},
  violation::EmissionPolicy,
};

/// Liusu 车辆测速与违章记录
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源
  /// 支持格式:
  /// - 视频: video:///path/to/input.mp4
  /// - 图像序列: frames:///path/to/dir?fps=30
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 标注视频输出
  /// 支持格式:
  /// - 视频: video:///path/to/output.mp4
  /// - 图像序列: frames:///path/to/dir
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 检测与跟踪结果来源
  /// - 预计算轨迹: tracks:///path/to/tracks.jsonl
  /// - 外部进程: exec:///path/to/detector?arg=...
  #[arg(long, value_name = "DETECTOR")]
  pub detector: Url,

  /// 车牌识别引擎: tesseract://?lang=eng&psm=7 或 none://
  #[arg(long, default_value = "tesseract://", value_name = "OCR")]
  pub ocr: Url,

  /// 违章通知: log://, exec:///path/to/program 或 none://
  #[arg(long, default_value = "log://", value_name = "NOTIFIER")]
  pub notifier: Url,

  /// 违章记录 CSV 文件
  #[arg(long, default_value = "speed_violations.csv", value_name = "FILE")]
  pub log: PathBuf,

  /// 统计摘要 JSON 文件（可选）
  #[arg(long, value_name = "FILE")]
  pub summary: Option<PathBuf>,

  /// 违规阈值 (km/h)，严格大于时判定违规
  #[arg(long, default_value = "10", value_name = "KMH")]
  pub violation_threshold: f64,

  /// 统计摘要中的超速阈值 (km/h)
  #[arg(long, default_value = "80", value_name = "KMH")]
  pub overspeed_threshold: f64,

  /// 像素与米的换算比例
  #[arg(long, default_value = "20", value_name = "PX")]
  pub pixels_per_meter: f64,

  /// 测速帧率：固定数值或 stream（使用视频帧率）
  #[arg(long, default_value = "30", value_name = "FPS")]
  pub speed_fps: SpeedFps,

  /// 轨迹长度
  #[arg(long, default_value = "10", value_name = "COUNT")]
  pub trajectory_len: usize,

  /// 测速所需最少轨迹点数
  #[arg(long, default_value = "5", value_name = "COUNT")]
  pub min_samples: usize,

  /// 违章记录策略: every-frame, once-per-episode, once-per-track
  #[arg(long, default_value = "every-frame", value_name = "POLICY")]
  pub emission: EmissionPolicy,

  /// 超过该帧数未出现的轨迹被移除
  #[arg(long, value_name = "FRAMES")]
  pub stale_after: Option<u64>,

  /// 记录中的地点
  #[arg(long, default_value = DEFAULT_LOCATION, value_name = "LOCATION")]
  pub location: String,

  /// 最大处理帧数
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,
}

impl Args {
  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      trajectory_len: self.trajectory_len,
      min_samples: self.min_samples,
      pixels_per_meter: self.pixels_per_meter,
      speed_fps: self.speed_fps,
      violation_threshold: self.violation_threshold,
      overspeed_threshold: self.overspeed_threshold,
      emission: self.emission,
      stale_after: self.stale_after,
      location: self.location.clone(),
      max_frames: self.max_frames,
      ..PipelineConfig::default()
    }
  }
}
