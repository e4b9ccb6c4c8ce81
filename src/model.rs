// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;
use thiserror::Error;

use crate::frame::FrameError;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

impl<M: Model + ?Sized> Model for &M {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

/// 原图坐标系下的整数边界框，满足 0 ≤ x1 ≤ x2 ≤ 宽, 0 ≤ y1 ≤ y2 ≤ 高
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BoundingBox {
  pub x1: u32,
  pub y1: u32,
  pub x2: u32,
  pub y2: u32,
}

impl BoundingBox {
  pub fn width(&self) -> u32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> u32 {
    self.y2 - self.y1
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub class_name: String,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

/// 单次推理的检测结果，顺序即 NMS 输出顺序
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }

  pub fn into_vec(self) -> Vec<Detection> {
    self.items.into_vec()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl<'a> IntoIterator for &'a DetectResult {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

/// 单次调用失败：输入无效或推理失败，调用方可修正输入后重试
#[derive(Error, Debug)]
pub enum DetectError {
  /// 图像为空、无法解码或尺寸不合法
  #[error("输入图像无效: {0}")]
  InvalidInput(String),
  #[error("推理失败: {0}")]
  InferenceFailure(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("模型输出形状不符: 期望 {expected}, 实际 {actual:?}")]
  OutputShape { expected: String, actual: Vec<usize> },
  #[error("类别索引 {id} 超出类别表范围 (共 {len} 类)")]
  UnknownClass { id: usize, len: usize },
}

impl From<FrameError> for DetectError {
  fn from(err: FrameError) -> Self {
    DetectError::InvalidInput(err.to_string())
  }
}

impl From<ort::Error> for DetectError {
  fn from(err: ort::Error) -> Self {
    DetectError::InferenceFailure(Box::new(err))
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClassTableError {
  #[error("类别表为空")]
  Empty,
  #[error("类别 {0} 名称为空")]
  BlankName(usize),
  #[error("类别索引不连续: 期望 {expected}, 实际 {actual}")]
  NonContiguous { expected: usize, actual: usize },
  #[error("无法解析类别表: {0}")]
  Malformed(String),
}

/// 加载时构建并校验的类别表，索引越界返回 [`DetectError::UnknownClass`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTable {
  names: Box<[String]>,
}

impl ClassTable {
  pub fn new<I, S>(names: I) -> Result<Self, ClassTableError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let names: Vec<String> = names.into_iter().map(Into::into).collect();
    if names.is_empty() {
      return Err(ClassTableError::Empty);
    }
    if let Some(idx) = names.iter().position(|n| n.trim().is_empty()) {
      return Err(ClassTableError::BlankName(idx));
    }
    Ok(Self {
      names: names.into_boxed_slice(),
    })
  }

  /// 解析 YOLOv5 导出器写入的 `names` 元数据，
  /// 支持 `{0: 'garbage', 1: 'pothole'}` 字典字面量或 JSON 数组
  pub fn from_metadata(raw: &str) -> Result<Self, ClassTableError> {
    let raw = raw.trim();

    if raw.starts_with('[') {
      let names: Vec<String> =
        serde_json::from_str(raw).map_err(|e| ClassTableError::Malformed(e.to_string()))?;
      return Self::new(names);
    }

    let body = raw
      .strip_prefix('{')
      .and_then(|s| s.strip_suffix('}'))
      .ok_or_else(|| ClassTableError::Malformed(raw.to_string()))?;

    let mut names = Vec::new();
    for entry in split_entries(body)?
      .into_iter()
      .map(str::trim)
      .filter(|e| !e.is_empty())
    {
      let (key, value) = entry
        .split_once(':')
        .ok_or_else(|| ClassTableError::Malformed(entry.to_string()))?;
      let id: usize = unquote(key)
        .parse()
        .map_err(|_| ClassTableError::Malformed(entry.to_string()))?;
      if id != names.len() {
        return Err(ClassTableError::NonContiguous {
          expected: names.len(),
          actual: id,
        });
      }
      names.push(unquote(value).to_string());
    }
    Self::new(names)
  }

  /// 每行一个类别名称，忽略空行
  pub fn from_lines(text: &str) -> Result<Self, ClassTableError> {
    Self::new(
      text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string),
    )
  }

  pub fn get(&self, id: usize) -> Result<&str, DetectError> {
    self
      .names
      .get(id)
      .map(String::as_str)
      .ok_or(DetectError::UnknownClass {
        id,
        len: self.names.len(),
      })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn names(&self) -> &[String] {
    &self.names
  }
}

/// 按引号外的逗号切分字典项，名称中可以含有逗号
fn split_entries(body: &str) -> Result<Vec<&str>, ClassTableError> {
  let mut entries = Vec::new();
  let mut quote = None;
  let mut escaped = false;
  let mut start = 0;

  for (idx, ch) in body.char_indices() {
    match quote {
      Some(q) => {
        if escaped {
          escaped = false;
        } else if ch == '\\' {
          escaped = true;
        } else if ch == q {
          quote = None;
        }
      }
      None => match ch {
        '\'' | '"' => quote = Some(ch),
        ',' => {
          entries.push(&body[start..idx]);
          start = idx + ch.len_utf8();
        }
        _ => {}
      },
    }
  }

  if quote.is_some() {
    return Err(ClassTableError::Malformed(body.to_string()));
  }
  entries.push(&body[start..]);
  Ok(entries)
}

fn unquote(s: &str) -> &str {
  let s = s.trim();
  s.strip_prefix('\'')
    .and_then(|s| s.strip_suffix('\''))
    .or_else(|| s.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
    .unwrap_or(s)
}

mod device;
mod engine;
mod letterbox;
mod loader;
mod nms;
mod yolov5;

pub use self::device::{Device, DeviceHint, Precision};
pub use self::engine::{Engine, OrtEngine};
pub use self::letterbox::{Letterbox, Preprocessor};
pub use self::loader::{
  FALLBACK_WEIGHTS, LoadError, ModelHandle, ModelLoader, PRIMARY_WEIGHTS, resolve_weights,
  round_to_stride,
};
pub use self::nms::{Candidate, NmsConfig, decode_predictions, iou, non_max_suppression};
pub use self::yolov5::Yolov5Detector;
