// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use ndarray::ArrayView2;
use tracing::debug;

use super::DetectError;

/// 进入 NMS 的最大候选数
const MAX_NMS: usize = 30000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmsConfig {
  pub conf_threshold: f32,
  pub iou_threshold: f32,
  pub max_det: usize,
}

impl Default for NmsConfig {
  fn default() -> Self {
    Self {
      conf_threshold: 0.40,
      iou_threshold: 0.45,
      max_det: 1000,
    }
  }
}

/// 网络输入坐标系下的候选框 [x1, y1, x2, y2]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub bbox: [f32; 4],
  pub confidence: f32,
  pub class_id: usize,
}

/// 解码单张图的预测 (锚点数, 5 + 类别数)，每行为 [cx, cy, w, h, obj, cls...]
///
/// 置信度 = obj × cls，每个锚点只保留得分最高的类别，
/// 仅保留严格大于阈值的候选
pub fn decode_predictions(
  predictions: ArrayView2<'_, f32>,
  conf_threshold: f32,
) -> Result<Vec<Candidate>, DetectError> {
  let (_, features) = predictions.dim();
  if features < 6 {
    return Err(DetectError::OutputShape {
      expected: "(N, 5 + 类别数)".to_string(),
      actual: predictions.shape().to_vec(),
    });
  }

  let mut candidates = Vec::new();
  for row in predictions.rows() {
    let objectness = row[4];
    if !(objectness > conf_threshold) {
      continue;
    }

    let mut class_id = 0;
    let mut best = f32::NEG_INFINITY;
    for (idx, &score) in row.iter().skip(5).enumerate() {
      if score > best {
        best = score;
        class_id = idx;
      }
    }

    let confidence = objectness * best;
    if !(confidence > conf_threshold) {
      continue;
    }

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    candidates.push(Candidate {
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
      confidence,
      class_id,
    });
  }

  Ok(candidates)
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = inter_w * inter_h;

  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 按置信度降序的贪心 NMS，只抑制同类别的重叠框，输出即保留顺序
pub fn non_max_suppression(
  mut candidates: Vec<Candidate>,
  iou_threshold: f32,
  max_det: usize,
) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
  if candidates.len() > MAX_NMS {
    debug!("候选框过多 ({}), 截断至 {}", candidates.len(), MAX_NMS);
    candidates.truncate(MAX_NMS);
  }

  let mut suppressed = vec![false; candidates.len()];
  let mut kept = Vec::new();
  for i in 0..candidates.len() {
    if suppressed[i] {
      continue;
    }
    kept.push(candidates[i]);
    if kept.len() >= max_det {
      break;
    }
    for j in (i + 1)..candidates.len() {
      if !suppressed[j]
        && candidates[j].class_id == candidates[i].class_id
        && iou(&candidates[i].bbox, &candidates[j].bbox) > iou_threshold
      {
        suppressed[j] = true;
      }
    }
  }

  kept
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  fn candidate(bbox: [f32; 4], confidence: f32, class_id: usize) -> Candidate {
    Candidate {
      bbox,
      confidence,
      class_id,
    }
  }

  #[test]
  fn decodes_center_boxes_and_best_class() {
    let preds = array![
      [150.0, 230.0, 100.0, 100.0, 0.9, 0.2, 1.0],
      [10.0, 10.0, 4.0, 4.0, 0.3, 1.0, 0.0],
      [50.0, 50.0, 20.0, 20.0, 0.9, 0.4, 0.1],
    ];
    let out = decode_predictions(preds.view(), 0.40).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].bbox, [100.0, 180.0, 200.0, 280.0]);
    assert_eq!(out[0].class_id, 1);
    assert!((out[0].confidence - 0.9).abs() < 1e-6);
  }

  #[test]
  fn threshold_is_strict() {
    let preds = array![[5.0, 5.0, 2.0, 2.0, 0.5, 0.8]];
    assert!(decode_predictions(preds.view(), 0.40).unwrap().is_empty());
  }

  #[test]
  fn rejects_narrow_output() {
    let preds = array![[1.0, 2.0, 3.0, 4.0, 0.5]];
    assert!(matches!(
      decode_predictions(preds.view(), 0.4),
      Err(DetectError::OutputShape { .. })
    ));
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert_eq!(iou(&a, &a), 1.0);
    assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
    assert!((iou(&a, &[5.0, 0.0, 15.0, 10.0]) - 1.0 / 3.0).abs() < 1e-6);
  }

  #[test]
  fn suppresses_same_class_only() {
    let out = non_max_suppression(
      vec![
        candidate([0.0, 0.0, 10.0, 10.0], 0.6, 0),
        candidate([1.0, 1.0, 11.0, 11.0], 0.9, 0),
        candidate([1.0, 1.0, 11.0, 11.0], 0.7, 1),
        candidate([50.0, 50.0, 60.0, 60.0], 0.5, 0),
      ],
      0.45,
      1000,
    );
    let confs: Vec<f32> = out.iter().map(|c| c.confidence).collect();
    assert_eq!(confs, vec![0.9, 0.7, 0.5]);
  }

  #[test]
  fn caps_at_max_det() {
    let many: Vec<Candidate> = (0..50)
      .map(|i| {
        let x = i as f32 * 20.0;
        candidate([x, 0.0, x + 10.0, 10.0], 0.5, 0)
      })
      .collect();
    assert_eq!(non_max_suppression(many, 0.45, 7).len(), 7);
  }

  #[test]
  fn only_top_candidates_enter_suppression() {
    // 高分候选彼此完全重叠，只留下一个；被截断的低分候选位于别处
    let mut many: Vec<Candidate> = (0..MAX_NMS)
      .map(|_| candidate([0.0, 0.0, 10.0, 10.0], 0.9, 0))
      .collect();
    many.extend((0..5).map(|_| candidate([100.0, 100.0, 110.0, 110.0], 0.5, 1)));

    let out = non_max_suppression(many, 0.45, usize::MAX);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].class_id, 0);
  }
}
