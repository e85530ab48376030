// 该文件是 Liusu （流速） 项目的一部分。
// src/bin/violation_summary.rs - 违章记录统计
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use liusu::{
  sink::read_log,
  summary::{summary_report, write_report},
  violation::DEFAULT_OVERSPEED_THRESHOLD,
};

/// 从违章记录 CSV 生成统计摘要
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 违章记录 CSV 文件
  #[arg(long, default_value = "speed_violations.csv", value_name = "FILE")]
  pub log: PathBuf,

  /// 超速阈值 (km/h)
  #[arg(long, default_value_t = DEFAULT_OVERSPEED_THRESHOLD, value_name = "KMH")]
  pub overspeed_threshold: f64,

  /// 输出 JSON 文件，缺省时打印到标准输出
  #[arg(long, value_name = "FILE")]
  pub output: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let records = read_log(&args.log)?;
  info!("读取 {} 条违章记录: {}", records.len(), args.log.display());

  let report = summary_report(&records, args.overspeed_threshold);
  match &args.output {
    Some(path) => {
      write_report(path, &report)?;
      info!("统计摘要已保存到文件: {}", path.display());
    }
    None => println!("{}", serde_json::to_string_pretty(&report)?),
  }

  Ok(())
}
