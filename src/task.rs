// 该文件是 Liusu （流速） 项目的一部分。
// src/task.rs - 测速任务
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 测速任务驱动
//!
//! 按帧顺序串行执行：读帧 → 检测 → 更新轨迹 → 测速 → 判定 → 车牌识别与记录 →
//! 标注 → 写出。车牌在标注之前从原始画面中裁剪。输入结束、达到帧数上限或
//! 收到取消信号后进入 DONE 状态，依次完成视频封装与违章记录写出。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use std::thread;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl,
  config::PipelineConfig,
  detector::{BoundingBox, Detector},
  input::{FrameSource, InputError, InputWrapper},
  output::{AnnotatorError, FrameAnnotator, OutputWrapper, VideoWriter},
  plate::{OcrEngine, PlateReader},
  sink::{SinkError, ViolationRecord, ViolationSink},
  summary::{self, OverspeedSummary},
};

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("无法打开输入: {0}")]
  Open(#[from] InputError),
  #[error("视频输出错误: {0}")]
  Output(BoxedError),
  #[error("违章记录写入失败: {0}")]
  Sink(#[from] SinkError),
  #[error("标注器初始化失败: {0}")]
  Annotator(#[from] AnnotatorError),
}

/// 协作式取消标记，在帧边界检查
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  /// Ctrl-C 触发取消；若 30 秒内仍未退出则强制结束进程
  pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
    let token = self.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      token.cancel();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
  Running,
  Done,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
  pub frames: u64,
  pub detections: u64,
  /// 检测器出错而跳过检测的帧数
  pub skipped_frames: u64,
  pub violations: u64,
  pub cancelled: bool,
}

/// 单个检测在本帧的标注内容
struct Mark {
  bbox: BoundingBox,
  speed: f64,
  is_violation: bool,
}

pub struct SpeedCheckTask {
  config: PipelineConfig,
  annotator: FrameAnnotator,
  cancel: CancelToken,
  state: TaskState,
}

impl SpeedCheckTask {
  pub fn new(config: PipelineConfig) -> Result<Self, TaskError> {
    Ok(Self {
      config,
      annotator: FrameAnnotator::new()?,
      cancel: CancelToken::new(),
      state: TaskState::Done,
    })
  }

  pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn state(&self) -> TaskState {
    self.state
  }

  /// 按配置的超速阈值生成统计摘要
  pub fn summary_report(&self, records: &[ViolationRecord]) -> Value {
    summary::summary_report(records, self.config.overspeed_threshold)
  }

  /// 按 URL 打开输入与输出后运行；先打开输入，失败时不产生任何输出文件
  pub fn run_urls<D, E>(
    &mut self,
    input: &Url,
    output: &Url,
    detector: &mut D,
    plate_reader: &PlateReader<E>,
    sink: &mut ViolationSink,
  ) -> Result<RunReport, TaskError>
  where
    D: Detector,
    E: OcrEngine,
  {
    let source = InputWrapper::from_url(input).inspect_err(|e| error!("无法打开输入 {}: {}", input, e))?;
    let info = source.stream_info();
    info!(
      "输入已打开: {}x{} @ {:.2} fps",
      info.width, info.height, info.fps
    );
    let mut writer = OutputWrapper::open(output, info).map_err(|e| TaskError::Output(Box::new(e)))?;
    self.run(source, detector, plate_reader, &mut writer, sink)
  }

  pub fn run<S, D, E, W>(
    &mut self,
    mut source: S,
    detector: &mut D,
    plate_reader: &PlateReader<E>,
    writer: &mut W,
    sink: &mut ViolationSink,
  ) -> Result<RunReport, TaskError>
  where
    S: FrameSource,
    D: Detector,
    E: OcrEngine,
    W: VideoWriter,
  {
    let info = source.stream_info();
    let speed_fps = self.config.speed_fps.resolve(&info);
    let mut tracks = self.config.track_store();
    let estimator = self.config.speed_estimator();
    let mut policy = self.config.violation_policy();
    let mut report = RunReport::default();
    let mut failure: Option<TaskError> = None;

    self.state = TaskState::Running;
    info!("开始任务... (测速帧率 {:.2} fps)", speed_fps);
    let started = Instant::now();

    // 先检查停止条件再取下一帧，避免多解码一帧
    loop {
      if self.cancel.is_cancelled() {
        warn!("中断信号接收，退出任务循环");
        report.cancelled = true;
        break;
      }
      if self.config.max_frames.is_some_and(|n| report.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", report.frames);
        break;
      }
      let Some(mut frame) = source.next() else {
        break;
      };

      let detections = match detector.detect(&frame) {
        Ok(detections) => detections,
        Err(e) => {
          warn!("第 {} 帧检测失败，跳过: {}", frame.index, e);
          report.skipped_frames += 1;
          Vec::new()
        }
      };
      report.detections += detections.len() as u64;

      // 先在原始画面上完成测速、判定与车牌识别，再统一标注
      let mut marks = Vec::with_capacity(detections.len());
      for detection in detections {
        if !self.config.is_allowed(detection.class) {
          continue;
        }
        let trajectory = tracks.update(
          detection.track_id,
          detection.bbox.centroid(),
          frame.index,
        );
        if trajectory.len() < self.config.min_samples {
          continue;
        }

        let speed = estimator.estimate(trajectory, speed_fps);
        let is_violation = policy.evaluate(speed);
        debug!(
          "轨迹 {} ({}): {:.2} km/h{}",
          detection.track_id,
          detection.class,
          speed,
          if is_violation { " [违规]" } else { "" }
        );

        if policy.should_record(detection.track_id, is_violation) {
          let plate = plate_reader.read_region(&frame.image, &detection.bbox);
          let record = ViolationRecord::now(
            detection.track_id,
            detection.class.to_label_str(),
            speed,
            plate,
            self.config.location.as_str(),
          )
          .at_frame(frame.index, frame.position_secs(info.fps));
          info!(
            "违章: 轨迹 {} 车牌 {} 速度 {:.2} km/h",
            record.track_id, record.plate, record.speed
          );
          sink.record(record);
          report.violations += 1;
        }

        marks.push(Mark {
          bbox: detection.bbox,
          speed,
          is_violation,
        });
      }

      for mark in &marks {
        self
          .annotator
          .annotate(&mut frame.image, &mark.bbox, mark.speed, mark.is_violation);
      }

      if let Err(e) = writer.write_frame(&frame) {
        error!("写入第 {} 帧失败: {}", frame.index, e);
        failure = Some(TaskError::Output(Box::new(e)));
        break;
      }
      report.frames += 1;

      for track_id in tracks.evict_stale(frame.index) {
        policy.forget(track_id);
      }

      if self.config.progress_interval > 0 && report.frames % self.config.progress_interval == 0 {
        info!(
          "已处理 {} 帧，当前轨迹 {} 条，违章 {} 条，耗时 {:.2?}",
          report.frames,
          tracks.len(),
          report.violations,
          started.elapsed()
        );
      }
    }

    self.state = TaskState::Done;
    info!("任务循环结束，共处理 {} 帧", report.frames);

    // 视频封装失败时仍然写出违章记录
    let finished = writer.finish();
    let flushed = sink.flush();

    if let Some(e) = failure {
      return Err(e);
    }
    finished.map_err(|e| {
      error!("完成视频输出失败: {}", e);
      TaskError::Output(Box::new(e))
    })?;
    flushed?;

    let overspeed = OverspeedSummary::from_records(sink.records(), self.config.overspeed_threshold);
    info!(
      "任务完成: {} 帧, {} 个检测, {} 条违章 (超过 {:.0} km/h 的车辆 {} 辆), 耗时 {:.2?}",
      report.frames,
      report.detections,
      report.violations,
      overspeed.overspeed_threshold,
      overspeed.overspeed_vehicles,
      started.elapsed()
    );
    Ok(report)
  }
}
