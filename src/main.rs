// 该文件是 Liusu （流速） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use liusu::{
  FromUrl,
  detector::DetectorWrapper,
  notify::{NotificationQueue, NotifierWrapper},
  plate::{OcrWrapper, PlateReader},
  sink::ViolationSink,
  summary::write_report,
  task::SpeedCheckTask,
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("检测来源: {}", args.detector);
  info!("违章记录: {}", args.log.display());

  let config = args.pipeline_config();
  let mut detector = DetectorWrapper::from_url(&args.detector)?;
  let plate_reader = PlateReader::new(OcrWrapper::from_url(&args.ocr)?);
  let notifier = NotifierWrapper::from_url(&args.notifier)?;
  let mut sink = ViolationSink::new(&args.log).with_notifications(NotificationQueue::spawn(notifier));

  let mut task = SpeedCheckTask::new(config)?;
  task.cancel_token().install_ctrlc_handler()?;

  let report = task.run_urls(
    &args.input,
    &args.output,
    &mut detector,
    &plate_reader,
    &mut sink,
  )?;

  if let Some(path) = &args.summary {
    write_report(path, &task.summary_report(sink.records()))?;
    info!("统计摘要已保存到文件: {}", path.display());
  }

  info!(
    "处理完成! 总帧数: {}, 总检测数: {}, 违章记录: {}{}",
    report.frames,
    report.detections,
    report.violations,
    if report.cancelled { " (已中断)" } else { "" }
  );

  Ok(())
}
