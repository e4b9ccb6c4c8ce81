// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/model/letterbox.rs - 图像预处理
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

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};
use ndarray::Array4;

use super::{BoundingBox, DetectError};
use crate::frame::BgrFrame;

/// 填充颜色（三通道相同，与通道顺序无关）
const PAD_VALUE: u8 = 114;

/// 一次 letterbox 变换的参数，用于把检测框还原到原图坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  /// 缩放比例（输入 / 原图）
  pub gain: f32,
  /// 水平方向单侧填充
  pub pad_x: f32,
  /// 垂直方向单侧填充
  pub pad_y: f32,
  pub input_width: u32,
  pub input_height: u32,
  pub source_width: u32,
  pub source_height: u32,
}

impl Letterbox {
  /// 按原图与网络输入尺寸计算缩放与填充
  fn new(source: (u32, u32), input: (u32, u32)) -> Self {
    let (source_width, source_height) = source;
    let (input_width, input_height) = input;
    let gain = (input_height as f32 / source_height as f32)
      .min(input_width as f32 / source_width as f32);
    let pad_x = (input_width as f32 - source_width as f32 * gain) / 2.0;
    let pad_y = (input_height as f32 - source_height as f32 * gain) / 2.0;
    Self {
      gain,
      pad_x,
      pad_y,
      input_width,
      input_height,
      source_width,
      source_height,
    }
  }

  /// 把网络输入坐标系下的 [x1, y1, x2, y2] 还原到原图，取整并裁剪到图像范围
  pub fn restore(&self, bbox: [f32; 4]) -> BoundingBox {
    let w = self.source_width as f32;
    let h = self.source_height as f32;
    let x = |v: f32| ((v - self.pad_x) / self.gain).clamp(0.0, w).round_ties_even() as u32;
    let y = |v: f32| ((v - self.pad_y) / self.gain).clamp(0.0, h).round_ties_even() as u32;

    let (x1, x2) = (x(bbox[0]), x(bbox[2]));
    let (y1, y2) = (y(bbox[1]), y(bbox[3]));
    BoundingBox {
      x1: x1.min(x2),
      y1: y1.min(y2),
      x2: x1.max(x2),
      y2: y1.max(y2),
    }
  }
}

/// 把 BGR 图像转为模型输入：letterbox → RGB → CHW → [0,1] → 批维度
#[derive(Debug, Clone)]
pub struct Preprocessor {
  target: u32,
  stride: u32,
  minimal_padding: bool,
}

impl Preprocessor {
  /// `minimal_padding` 为真时只填充到步长的整数倍（矩形输入），否则填充为 target×target
  pub fn new(target: u32, stride: u32, minimal_padding: bool) -> Self {
    Self {
      target,
      stride: stride.max(1),
      minimal_padding,
    }
  }

  pub fn target(&self) -> u32 {
    self.target
  }

  /// 等比缩放并对称填充，返回填充后的 BGR 图像
  pub fn letterbox(&self, frame: &BgrFrame) -> Result<(BgrFrame, Letterbox), DetectError> {
    let (width, height) = (frame.width(), frame.height());
    let source = frame
      .as_bgr_buffer()
      .ok_or_else(|| DetectError::InvalidInput(format!("帧数据不完整: {}x{}", width, height)))?;

    let target = self.target as f32;
    let ratio = (target / height as f32).min(target / width as f32);
    let new_width = ((width as f32 * ratio).round_ties_even() as u32).max(1);
    let new_height = ((height as f32 * ratio).round_ties_even() as u32).max(1);

    let mut dw = self.target.saturating_sub(new_width) as f32;
    let mut dh = self.target.saturating_sub(new_height) as f32;
    if self.minimal_padding {
      dw %= self.stride as f32;
      dh %= self.stride as f32;
    }
    dw /= 2.0;
    dh /= 2.0;

    let top = (dh - 0.1).round_ties_even() as u32;
    let bottom = (dh + 0.1).round_ties_even() as u32;
    let left = (dw - 0.1).round_ties_even() as u32;
    let right = (dw + 0.1).round_ties_even() as u32;

    let resized = if (new_width, new_height) != (width, height) {
      imageops::resize(&source, new_width, new_height, FilterType::Triangle)
    } else {
      ImageBuffer::from_raw(width, height, frame.as_bytes().to_vec())
        .ok_or_else(|| DetectError::InvalidInput("帧数据不完整".to_string()))?
    };

    let mut padded = ImageBuffer::from_pixel(
      new_width + left + right,
      new_height + top + bottom,
      Rgb([PAD_VALUE; 3]),
    );
    imageops::replace(&mut padded, &resized, left as i64, top as i64);

    let letterbox = Letterbox::new((width, height), padded.dimensions());
    Ok((BgrFrame::from_bgr_buffer(padded)?, letterbox))
  }

  /// 生成 (1, 3, H, W) 的 f32 张量，通道顺序 R,G,B，数值范围 [0,1]
  pub fn preprocess(&self, frame: &BgrFrame) -> Result<(Array4<f32>, Letterbox), DetectError> {
    let (padded, letterbox) = self.letterbox(frame)?;
    let (w, h) = (padded.width() as usize, padded.height() as usize);
    let plane = w * h;

    let mut data = vec![0f32; 3 * plane];
    for (i, bgr) in padded.as_bytes().chunks_exact(3).enumerate() {
      data[i] = bgr[2] as f32 / 255.0;
      data[plane + i] = bgr[1] as f32 / 255.0;
      data[2 * plane + i] = bgr[0] as f32 / 255.0;
    }

    let tensor = Array4::from_shape_vec((1, 3, h, w), data)
      .map_err(|e| DetectError::InvalidInput(e.to_string()))?;
    Ok((tensor, letterbox))
  }
}
