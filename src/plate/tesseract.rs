// 该文件是 Liusu （流速） 项目的一部分。
// src/plate/tesseract.rs - Tesseract 命令行 OCR
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 调用系统中的 `tesseract` 命令识别文本，图像以 PNG 格式经标准输入传入，
//! 输出中每个非空行作为一个候选。
//!
//! URL 格式: `tesseract://?lang=eng&psm=7`

use std::io::{Cursor, Write};
use std::process::{Command, Stdio};

use image::{GrayImage, ImageFormat};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  plate::{OcrCandidate, OcrEngine, OcrError},
  query_param,
};

const DEFAULT_LANG: &str = "eng";
const DEFAULT_PSM: u32 = 7; // 单行文本

pub struct TesseractOcr {
  lang: String,
  psm: u32,
}

impl Default for TesseractOcr {
  fn default() -> Self {
    Self {
      lang: DEFAULT_LANG.to_string(),
      psm: DEFAULT_PSM,
    }
  }
}

impl FromUrlWithScheme for TesseractOcr {
  const SCHEME: &'static str = "tesseract";
}

impl FromUrl for TesseractOcr {
  type Error = OcrError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OcrError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(TesseractOcr {
      lang: query_param(url, "lang").unwrap_or_else(|| DEFAULT_LANG.to_string()),
      psm: query_param(url, "psm").unwrap_or(DEFAULT_PSM),
    })
  }
}

fn parse_candidates(stdout: &str) -> Vec<OcrCandidate> {
  stdout
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    // tesseract 纯文本输出不带置信度
    .map(|line| OcrCandidate::new(line, 0.0))
    .collect()
}

impl OcrEngine for TesseractOcr {
  fn recognize(&self, image: &GrayImage) -> Result<Vec<OcrCandidate>, OcrError> {
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    let mut child = Command::new("tesseract")
      .arg("stdin")
      .arg("stdout")
      .arg("-l")
      .arg(&self.lang)
      .arg("--psm")
      .arg(self.psm.to_string())
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| OcrError::Engine(format!("无法执行 tesseract (请确保已安装): {}", e)))?;

    if let Some(mut stdin) = child.stdin.take() {
      stdin.write_all(&png)?;
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(OcrError::Engine(format!("tesseract 失败: {}", stderr.trim())));
    }

    Ok(parse_candidates(&String::from_utf8_lossy(&output.stdout)))
  }
}
