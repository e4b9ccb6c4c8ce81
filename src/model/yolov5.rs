// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/model/yolov5.rs - YOLOv5 检测器
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

use std::time::Instant;

use ndarray::Axis;
use tracing::{debug, info};

use super::{
  DetectError, DetectResult, Detection, Model, ModelHandle, NmsConfig, Preprocessor,
  decode_predictions, non_max_suppression,
};
use crate::config::{MAX_DETECTIONS, TriageConfig};
use crate::frame::BgrFrame;

/// 预处理 → 前向推理 → NMS → 坐标还原 → 类别解析
#[derive(Debug)]
pub struct Yolov5Detector {
  handle: ModelHandle,
  preprocessor: Preprocessor,
  nms: NmsConfig,
}

impl Yolov5Detector {
  pub fn new(handle: ModelHandle, config: &TriageConfig) -> Self {
    let preprocessor =
      Preprocessor::new(handle.input_size(), handle.stride(), config.minimal_padding);
    let nms = NmsConfig {
      conf_threshold: config.conf_threshold,
      iou_threshold: config.iou_threshold,
      max_det: config.max_det.min(MAX_DETECTIONS),
    };
    Self {
      handle,
      preprocessor,
      nms,
    }
  }

  pub fn handle(&self) -> &ModelHandle {
    &self.handle
  }

  pub fn nms_config(&self) -> NmsConfig {
    self.nms
  }

  fn detect(&self, frame: &BgrFrame) -> Result<DetectResult, DetectError> {
    let now = Instant::now();
    let (tensor, letterbox) = self.preprocessor.preprocess(frame)?;
    let preprocess_time = now.elapsed();

    let now = Instant::now();
    let output = self.handle.forward(tensor.view())?;
    let inference_time = now.elapsed();

    let (batch, _, features) = output.dim();
    let classes = self.handle.classes();
    if batch != 1 || features != 5 + classes.len() {
      return Err(DetectError::OutputShape {
        expected: format!("(1, N, {})", 5 + classes.len()),
        actual: output.shape().to_vec(),
      });
    }

    let now = Instant::now();
    let candidates = decode_predictions(output.index_axis(Axis(0), 0), self.nms.conf_threshold)?;
    let kept = non_max_suppression(candidates, self.nms.iou_threshold, self.nms.max_det);

    let mut items = Vec::with_capacity(kept.len());
    for candidate in kept {
      items.push(Detection {
        class_name: classes.get(candidate.class_id)?.to_string(),
        confidence: candidate.confidence.min(1.0),
        bbox: letterbox.restore(candidate.bbox),
      });
    }
    let postprocess_time = now.elapsed();

    debug!(
      "预处理: {:.2?}, 推理: {:.2?}, 后处理: {:.2?}",
      preprocess_time, inference_time, postprocess_time
    );
    info!("检测到 {} 个目标", items.len());

    Ok(items.into())
  }
}

impl Model for Yolov5Detector {
  type Input = BgrFrame;
  type Output = DetectResult;
  type Error = DetectError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect(input)
  }
}
