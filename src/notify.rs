// 该文件是 Liusu （流速） 项目的一部分。
// src/notify.rs - 违章通知
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 违章通知模块
//!
//! 通知是尽力而为的：发送失败只记录日志，不影响视频与违章记录的输出。
//! [`NotificationQueue`] 在后台线程中逐条发送，帧处理循环只负责投递。
//!
//! # URL 格式
//!
//! - `log://` - 通过 tracing 输出通知内容
//! - `exec:///path/to/program?arg=--to&arg=ops` - 执行外部程序，通知内容写入其标准输入
//! - `none://` - 丢弃所有通知

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, url_to_path};

pub const VIOLATION_SUBJECT: &str = "Speed Violation Detected";
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum NotifyError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("通知程序失败: {0}")]
  CommandFailed(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
  pub subject: String,
  pub body: String,
}

impl Notification {
  pub fn speed_violation(timestamp: &str, plate: &str, speed_kmh: f64, location: &str) -> Self {
    Self {
      subject: VIOLATION_SUBJECT.to_string(),
      body: format!(
        "At {}, Vehicle {} detected speeding at {:.2} km/h on {}.",
        timestamp, plate, speed_kmh, location
      ),
    }
  }
}

/// 通知发送接口，在后台线程中调用
pub trait Notifier: Send {
  fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
  fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
    (**self).notify(notification)
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl FromUrlWithScheme for LogNotifier {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogNotifier {
  type Error = NotifyError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(NotifyError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(LogNotifier)
  }
}

impl Notifier for LogNotifier {
  fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
    info!("[{}] {}", notification.subject, notification.body);
    Ok(())
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
  fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
    Ok(())
  }
}

/// 外部程序通知：主题作为第一行，空一行后为正文
#[derive(Debug, Clone)]
pub struct CommandNotifier {
  program: PathBuf,
  args: Vec<String>,
}

impl CommandNotifier {
  pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
    Self {
      program: program.into(),
      args,
    }
  }
}

impl FromUrlWithScheme for CommandNotifier {
  const SCHEME: &'static str = "exec";
}

impl FromUrl for CommandNotifier {
  type Error = NotifyError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(NotifyError::SchemeMismatch(url.scheme().to_string()));
    }
    let args = url
      .query_pairs()
      .filter(|(k, _)| k == "arg")
      .map(|(_, v)| v.into_owned())
      .collect();
    Ok(CommandNotifier::new(url_to_path(url), args))
  }
}

impl Notifier for CommandNotifier {
  fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
    let mut child = Command::new(&self.program)
      .args(&self.args)
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()?;

    // 写入失败时仍需回收子进程
    let written = match child.stdin.take() {
      Some(mut stdin) => writeln!(stdin, "{}\n\n{}", notification.subject, notification.body),
      None => Ok(()),
    };
    let output = child.wait_with_output()?;
    if !output.status.success() {
      return Err(NotifyError::CommandFailed(format!(
        "{} ({}): {}",
        self.program.display(),
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
      )));
    }
    written?;
    Ok(())
  }
}

pub enum NotifierWrapper {
  Log(LogNotifier),
  Command(CommandNotifier),
  Null(NullNotifier),
}

impl FromUrl for NotifierWrapper {
  type Error = NotifyError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LogNotifier::SCHEME => Ok(NotifierWrapper::Log(LogNotifier::from_url(url)?)),
      CommandNotifier::SCHEME => Ok(NotifierWrapper::Command(CommandNotifier::from_url(url)?)),
      "none" => Ok(NotifierWrapper::Null(NullNotifier)),
      scheme => Err(NotifyError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl Notifier for NotifierWrapper {
  fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
    match self {
      NotifierWrapper::Log(notifier) => notifier.notify(notification),
      NotifierWrapper::Command(notifier) => notifier.notify(notification),
      NotifierWrapper::Null(notifier) => notifier.notify(notification),
    }
  }
}

/// 后台通知队列
///
/// `send` 只把通知放入通道后立即返回；`close` 关闭通道，并在限定时间内
/// 等待后台线程发完剩余通知。超时后不再等待，剩余通知随线程一起丢弃。
pub struct NotificationQueue {
  sender: Option<Sender<Notification>>,
  done: Receiver<()>,
  worker: Option<JoinHandle<()>>,
  drain_timeout: Duration,
}

impl NotificationQueue {
  pub fn spawn<N: Notifier + 'static>(notifier: N) -> Self {
    Self::with_drain_timeout(notifier, DEFAULT_DRAIN_TIMEOUT)
  }

  pub fn with_drain_timeout<N: Notifier + 'static>(notifier: N, drain_timeout: Duration) -> Self {
    let (sender, receiver) = mpsc::channel::<Notification>();
    let (done_tx, done) = mpsc::channel();

    let worker = thread::spawn(move || {
      for notification in receiver {
        match notifier.notify(&notification) {
          Ok(()) => debug!("通知已发送: {}", notification.subject),
          Err(e) => warn!("发送通知失败: {}", e),
        }
      }
      let _ = done_tx.send(());
    });

    Self {
      sender: Some(sender),
      done,
      worker: Some(worker),
      drain_timeout,
    }
  }

  pub fn send(&self, notification: Notification) {
    match &self.sender {
      Some(sender) => {
        if sender.send(notification).is_err() {
          warn!("通知线程已退出，通知被丢弃");
        }
      }
      None => warn!("通知队列已关闭，通知被丢弃"),
    }
  }

  /// 关闭队列并等待后台线程，返回是否在时限内发送完毕
  pub fn close(&mut self) -> bool {
    let Some(sender) = self.sender.take() else {
      return true;
    };
    drop(sender);

    match self.done.recv_timeout(self.drain_timeout) {
      Ok(()) => {
        if let Some(worker) = self.worker.take() {
          let _ = worker.join();
        }
        true
      }
      Err(_) => {
        warn!("等待通知发送超时 ({:?})，剩余通知被放弃", self.drain_timeout);
        self.worker.take();
        false
      }
    }
  }
}

impl Drop for NotificationQueue {
  fn drop(&mut self) {
    self.close();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{Arc, Mutex};

  #[derive(Clone, Default)]
  struct Collect(Arc<Mutex<Vec<Notification>>>);

  impl Notifier for Collect {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
      self.0.lock().unwrap().push(notification.clone());
      Ok(())
    }
  }

  struct Failing;

  impl Notifier for Failing {
    fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
      Err(NotifyError::CommandFailed("smtp down".to_string()))
    }
  }

  struct Slow;

  impl Notifier for Slow {
    fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
      thread::sleep(Duration::from_secs(2));
      Ok(())
    }
  }

  #[test]
  fn message_format() {
    let n = Notification::speed_violation("2026-01-02 03:04:05", "AB12345", 96.0, "Highway A");
    assert_eq!(n.subject, "Speed Violation Detected");
    assert_eq!(
      n.body,
      "At 2026-01-02 03:04:05, Vehicle AB12345 detected speeding at 96.00 km/h on Highway A."
    );
  }

  #[test]
  fn queue_delivers_in_order_before_close_returns() {
    let collect = Collect::default();
    let mut queue = NotificationQueue::spawn(collect.clone());
    for i in 0..3 {
      queue.send(Notification::speed_violation("t", &format!("P{}", i), 20.0, "x"));
    }
    assert!(queue.close());
    let seen = collect.0.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen[2].body.contains("P2"));
  }

  #[test]
  fn failures_are_swallowed() {
    let mut queue = NotificationQueue::spawn(Failing);
    queue.send(Notification::speed_violation("t", "UNKNOWN", 20.0, "x"));
    assert!(queue.close());
    // 关闭后再投递只会被丢弃
    queue.send(Notification::speed_violation("t", "UNKNOWN", 20.0, "x"));
  }

  #[test]
  fn close_is_bounded() {
    let mut queue = NotificationQueue::with_drain_timeout(Slow, Duration::from_millis(100));
    queue.send(Notification::speed_violation("t", "UNKNOWN", 20.0, "x"));
    let start = std::time::Instant::now();
    assert!(!queue.close());
    assert!(start.elapsed() < Duration::from_secs(2));
  }

  #[test]
  fn wrapper_dispatches_on_scheme() {
    assert!(matches!(
      NotifierWrapper::from_url(&Url::parse("log://").unwrap()),
      Ok(NotifierWrapper::Log(_))
    ));
    assert!(matches!(
      NotifierWrapper::from_url(&Url::parse("none://").unwrap()),
      Ok(NotifierWrapper::Null(_))
    ));
    assert!(matches!(
      NotifierWrapper::from_url(&Url::parse("smtp://mail").unwrap()),
      Err(NotifyError::SchemeMismatch(_))
    ));
    match NotifierWrapper::from_url(&Url::parse("exec:///usr/bin/mail?arg=-s&arg=ops").unwrap()) {
      Ok(NotifierWrapper::Command(cmd)) => {
        assert_eq!(cmd.program, PathBuf::from("/usr/bin/mail"));
        assert_eq!(cmd.args, vec!["-s", "ops"]);
      }
      _ => panic!("expected exec notifier"),
    }
  }

  #[cfg(unix)]
  fn script(name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let dir = std::env::temp_dir().join(format!("liusu-notify-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("notify.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
  }

  #[cfg(unix)]
  #[test]
  fn command_receives_message_on_stdin() {
    let program = script("stdin", r#"cat > "$1""#);
    let received = program.with_file_name("message.txt");
    let notifier = CommandNotifier::new(&program, vec![received.display().to_string()]);

    let notification =
      Notification::speed_violation("2026-03-01 08:30:05", "AB12345", 96.0, "Highway A");
    notifier.notify(&notification).unwrap();

    let message = std::fs::read_to_string(&received).unwrap();
    assert_eq!(
      message,
      "Speed Violation Detected\n\nAt 2026-03-01 08:30:05, Vehicle AB12345 detected speeding at 96.00 km/h on Highway A.\n"
    );
    std::fs::remove_dir_all(program.parent().unwrap()).unwrap();
  }

  #[cfg(unix)]
  #[test]
  fn failing_command_is_reported_and_reaped() {
    let program = script("fail", "echo 'relay refused' >&2\nexit 3");
    let notifier = CommandNotifier::new(&program, Vec::new());
    match notifier.notify(&Notification::speed_violation("t", "UNKNOWN", 20.0, "x")) {
      Err(NotifyError::CommandFailed(reason)) => assert!(reason.contains("relay refused")),
      other => panic!("expected command failure, got {:?}", other.map(|_| ())),
    }
    std::fs::remove_dir_all(program.parent().unwrap()).unwrap();
  }
}
