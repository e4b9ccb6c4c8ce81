// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/config.rs - 运行配置
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

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::LoadError;

/// 单次调用返回的检测数上限
pub const MAX_DETECTIONS: usize = 1000;
/// 网络输入尺寸上限
pub const MAX_IMG_SIZE: u32 = 8192;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("解析配置文件失败: {0}")]
  Json(#[from] serde_json::Error),
}

/// 检测管线配置，构造时固定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
  /// 显式权重路径，给出时不再搜索权重目录
  pub weights: Option<PathBuf>,
  /// 约定的权重目录
  pub weights_dir: PathBuf,
  /// 设备选择，空字符串为自动
  pub device: String,
  /// 网络输入尺寸，加载时向上取整到步长的整数倍
  pub img_size: u32,
  pub conf_threshold: f32,
  pub iou_threshold: f32,
  /// 每次调用最多返回的检测数，不超过 [`MAX_DETECTIONS`]
  pub max_det: usize,
  /// 只填充到步长整数倍（矩形输入）
  pub minimal_padding: bool,
  /// 每行一个类别名称的文件，优先于模型元数据
  pub class_names: Option<PathBuf>,
  /// 标签字体 (TTF/OTF)
  pub font: Option<PathBuf>,
  /// 未显式指定时是否生成标注图像
  pub annotate: bool,
}

impl Default for TriageConfig {
  fn default() -> Self {
    Self {
      weights: None,
      weights_dir: PathBuf::from("weights"),
      device: String::new(),
      img_size: 640,
      conf_threshold: 0.40,
      iou_threshold: 0.45,
      max_det: 1000,
      minimal_padding: false,
      class_names: None,
      font: None,
      annotate: true,
    }
  }
}

impl TriageConfig {
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    debug!("读取配置文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
  }

  pub fn validate(&self) -> Result<(), LoadError> {
    if !(0.0..=1.0).contains(&self.conf_threshold) {
      return Err(LoadError::InvalidConfig(format!(
        "置信度阈值必须在 [0, 1] 内: {}",
        self.conf_threshold
      )));
    }
    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return Err(LoadError::InvalidConfig(format!(
        "IoU 阈值必须在 [0, 1] 内: {}",
        self.iou_threshold
      )));
    }
    if self.img_size == 0 || self.img_size > MAX_IMG_SIZE {
      return Err(LoadError::InvalidConfig(format!(
        "输入尺寸必须在 1..={} 内: {}",
        MAX_IMG_SIZE, self.img_size
      )));
    }
    if self.max_det == 0 || self.max_det > MAX_DETECTIONS {
      return Err(LoadError::InvalidConfig(format!(
        "max_det 必须在 1..={} 内: {}",
        MAX_DETECTIONS, self.max_det
      )));
    }
    Ok(())
  }
}
