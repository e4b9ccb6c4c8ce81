// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/output/json_report.rs - 路由结果 JSON 输出
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

use std::io::Write;
use std::path::PathBuf;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::DetectResult,
  output::Render,
  routing::{RoutedIssue, route_all},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum JsonReportError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 把检测结果连同责任部门写成 JSON，`json:-` 写到标准输出
#[derive(Debug, Clone)]
pub struct JsonReportOutput {
  path: Option<PathBuf>,
}

impl FromUrlWithScheme for JsonReportOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonReportOutput {
  type Error = JsonReportError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonReportError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    match uri.path() {
      "" | "-" => Ok(Self::stdout()),
      _ => Ok(Self::file(url_file_path(uri))),
    }
  }
}

impl JsonReportOutput {
  pub fn stdout() -> Self {
    Self { path: None }
  }

  pub fn file(path: impl Into<PathBuf>) -> Self {
    Self {
      path: Some(path.into()),
    }
  }

  pub fn write_issues(&self, issues: &[RoutedIssue]) -> Result<(), JsonReportError> {
    let json = serde_json::to_string_pretty(issues)?;
    match &self.path {
      Some(path) => {
        if let Some(parent) = path.parent()
          && !parent.as_os_str().is_empty()
        {
          std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        info!("保存检测报告到文件: {}", path.display());
      }
      None => {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", json)?;
      }
    }
    Ok(())
  }
}

impl<F> Render<F, DetectResult> for JsonReportOutput {
  type Error = JsonReportError;

  fn render_result(&self, _frame: &F, result: &DetectResult) -> Result<(), Self::Error> {
    self.write_issues(&route_all(result))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::BgrFrame;
  use crate::model::{BoundingBox, Detection};

  #[test]
  fn writes_routed_report() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    let output = JsonReportOutput::file(&path);

    let frame = BgrFrame::filled(4, 4, [0, 0, 0]).unwrap();
    let result = DetectResult::from(vec![Detection {
      class_name: "openmanhole".to_string(),
      confidence: 0.75,
      bbox: BoundingBox {
        x1: 0,
        y1: 0,
        x2: 2,
        y2: 2,
      },
    }]);
    output.render_result(&frame, &result).unwrap();

    let json: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json[0]["class_name"], "openmanhole");
    assert_eq!(json[0]["department"], "Roads");
  }

  #[test]
  fn dash_means_stdout() {
    let url = Url::parse("json:-").unwrap();
    assert!(JsonReportOutput::from_url(&url).unwrap().path.is_none());
  }
}
