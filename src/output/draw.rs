// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/output/draw.rs - 检测结果标注
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

use ab_glyph::{FontArc, PxScale};
use image::{ImageBuffer, Rgb};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, warn};

use crate::frame::BgrFrame;
use crate::model::{DetectResult, Detection};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_OFFSET: i32 = 10;
const BOX_THICKNESS: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色，BGR 与 RGB 相同

/// 未配置字体时依次尝试的系统字体
const SYSTEM_FONTS: [&str; 5] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体文件 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("字体文件 {0} 无效")]
  InvalidFont(PathBuf),
}

/// 在图像副本上绘制检测框与 "类别 置信度" 标签
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  color: [u8; 3],
}

impl std::fmt::Debug for Draw {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Draw")
      .field("font", &self.font.is_some())
      .field("font_size", &self.font_size)
      .field("color", &self.color)
      .finish()
  }
}

impl Default for Draw {
  /// 不带字体，只绘制检测框
  fn default() -> Self {
    Self::new(None)
  }
}

impl Draw {
  pub fn new(font: Option<FontArc>) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      color: BOX_COLOR,
    }
  }

  /// 显式给出的字体必须可用；未给出时搜索系统字体，找不到则只绘制检测框
  pub fn from_font_path(path: Option<&Path>) -> Result<Self, DrawError> {
    if let Some(path) = path {
      return Ok(Self::new(Some(load_font(path)?)));
    }

    for candidate in SYSTEM_FONTS.iter().map(Path::new) {
      if !candidate.is_file() {
        continue;
      }
      match load_font(candidate) {
        Ok(font) => {
          debug!("使用系统字体: {}", candidate.display());
          return Ok(Self::new(Some(font)));
        }
        Err(e) => debug!("跳过字体: {}", e),
      }
    }

    warn!("未找到可用字体，标注图像将不包含文字标签");
    Ok(Self::new(None))
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 返回标注后的副本，`frame` 本身不被修改
  pub fn annotate(&self, frame: &BgrFrame, result: &DetectResult) -> BgrFrame {
    let mut canvas: ImageBuffer<Rgb<u8>, Vec<u8>> =
      match ImageBuffer::from_raw(frame.width(), frame.height(), frame.as_bytes().to_vec()) {
        Some(canvas) => canvas,
        None => return frame.clone(),
      };

    for detection in result {
      self.draw_detection(&mut canvas, detection);
    }

    BgrFrame::from_bgr_buffer(canvas).unwrap_or_else(|_| frame.clone())
  }

  fn draw_detection(&self, canvas: &mut ImageBuffer<Rgb<u8>, Vec<u8>>, detection: &Detection) {
    let color = Rgb(self.color);
    let bbox = detection.bbox;

    for t in 0..BOX_THICKNESS {
      let x = bbox.x1 as i32 + t;
      let y = bbox.y1 as i32 + t;
      let w = bbox.width() as i32 + 1 - 2 * t;
      let h = bbox.height() as i32 + 1 - 2 * t;
      if w <= 0 || h <= 0 {
        break;
      }
      draw_hollow_rect_mut(canvas, Rect::at(x, y).of_size(w as u32, h as u32), color);
    }

    let Some(font) = &self.font else {
      return;
    };
    let label = format!("{} {:.2}", detection.class_name, detection.confidence);
    let scale = PxScale::from(self.font_size);
    let (_, text_height) = text_size(scale, font, &label);

    // 文字基线位于框上方 LABEL_OFFSET 像素处
    let x = bbox.x1 as i32;
    let y = (bbox.y1 as i32 - LABEL_OFFSET - text_height as i32).max(0);
    draw_text_mut(canvas, color, x, y, scale, font, &label);
  }
}

fn load_font(path: &Path) -> Result<FontArc, DrawError> {
  let data = std::fs::read(path).map_err(|source| DrawError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  FontArc::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.to_path_buf()))
}
