// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/lib.rs - 库主文件
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Civic Triage Contributors

pub mod config;
pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod routing;
pub mod service;
pub mod task;

pub use crate::config::TriageConfig;
pub use crate::frame::BgrFrame;
pub use crate::model::{BoundingBox, DetectError, DetectResult, Detection, LoadError};
pub use crate::routing::{AuthorityRouter, Department, RoutedIssue};
pub use crate::service::{ServiceCell, TriageService, shared, shared_with};

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 取出 URL 中的文件路径，处理百分号编码（例如路径中的空格）
pub fn url_file_path(url: &url::Url) -> std::path::PathBuf {
  let raw = url.path();
  match urlencoding::decode(raw) {
    Ok(decoded) => std::path::PathBuf::from(decoded.into_owned()),
    Err(_) => std::path::PathBuf::from(raw),
  }
}
