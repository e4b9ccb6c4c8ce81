// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// tests/pipeline.rs - 检测管线集成测试
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

mod common;

use civic_triage::input::decode_image_bytes;
use civic_triage::model::{Model, Yolov5Detector};
use civic_triage::{
  AuthorityRouter, BgrFrame, BoundingBox, DetectError, Department, LoadError, TriageConfig,
  TriageService,
};
use ndarray::Array2;

use common::{AfterWarmup, ScriptedEngine, handle, png_bytes, pothole_rows, service};

#[test]
fn pothole_report_is_detected_and_routed_to_roads() {
  let service = service(pothole_rows());
  let (result, annotated) = service.detect_from_bytes(&png_bytes(640, 480), false).unwrap();

  assert!(annotated.is_none());
  assert_eq!(result.len(), 1);
  let detection = &result.items[0];
  assert_eq!(detection.class_name, "pothole");
  assert!((detection.confidence - 0.9).abs() < 1e-6);
  assert_eq!(
    detection.bbox,
    BoundingBox {
      x1: 100,
      y1: 100,
      x2: 200,
      y2: 200
    }
  );
  assert_eq!(AuthorityRouter::route(&detection.class_name), Department::Roads);
}

#[test]
fn repeated_calls_are_deterministic() {
  let service = service(pothole_rows());
  let bytes = png_bytes(640, 480);
  let first = service.detect_from_bytes(&bytes, false).unwrap().0;
  let second = service.detect_from_bytes(&bytes, false).unwrap().0;
  assert_eq!(first, second);
}

/// 1500 个互不重叠的候选，外加越界框与超过 1 的得分
fn crowded_rows() -> Array2<f32> {
  let mut data = Vec::new();
  for i in 0..1500 {
    let cx = (i % 40) as f32 * 16.0 + 8.0;
    let cy = (i / 40) as f32 * 16.0 + 8.0;
    let obj = 0.45 + (i % 50) as f32 / 100.0;
    data.extend_from_slice(&[cx, cy, 10.0, 10.0, obj, 1.0, 0.0]);
  }
  data.extend_from_slice(&[320.0, 320.0, 2000.0, 2000.0, 0.95, 0.0, 1.0]);
  data.extend_from_slice(&[-30.0, 700.0, 40.0, 40.0, 1.2, 0.0, 1.0]);
  Array2::from_shape_vec((1502, 7), data).unwrap()
}

#[test]
fn detections_respect_bounds_threshold_and_cap() {
  let service = service(crowded_rows());
  let frame = BgrFrame::filled(640, 480, [90, 90, 90]).unwrap();
  let result = service.infer(&frame).unwrap();
  let threshold = service.config().conf_threshold;

  assert_eq!(result.len(), 1000);
  for detection in &result {
    let b = detection.bbox;
    assert!(b.x1 <= b.x2 && b.x2 <= frame.width(), "{b:?}");
    assert!(b.y1 <= b.y2 && b.y2 <= frame.height(), "{b:?}");
    assert!(detection.confidence >= threshold);
    assert!(detection.confidence <= 1.0);
  }

  let clipped = result
    .iter()
    .find(|d| d.class_name == "pothole" && d.bbox.x1 == 0 && d.bbox.x2 == 640)
    .expect("oversized box is clipped to the image");
  assert_eq!((clipped.bbox.y1, clipped.bbox.y2), (0, 480));
  assert!(result.iter().any(|d| d.confidence == 1.0));
}

#[test]
fn detection_cap_cannot_be_raised_by_configuration() {
  let loose = TriageConfig {
    max_det: 5000,
    ..Default::default()
  };
  assert!(matches!(
    TriageService::with_handle(handle(ScriptedEngine::new(crowded_rows())), &loose),
    Err(LoadError::InvalidConfig(_))
  ));

  let detector = Yolov5Detector::new(handle(ScriptedEngine::new(crowded_rows())), &loose);
  assert_eq!(detector.nms_config().max_det, 1000);
  let frame = BgrFrame::filled(640, 640, [0, 0, 0]).unwrap();
  assert_eq!(detector.infer(&frame).unwrap().len(), 1000);
}

#[test]
fn annotation_never_touches_callers_frame() {
  let service = service(pothole_rows());
  let frame = decode_image_bytes(&png_bytes(640, 480)).unwrap();
  let before = frame.clone();

  let (_, annotated) = service.detect_image(&frame, false).unwrap();
  assert!(annotated.is_none());
  assert_eq!(frame, before);

  let (result, annotated) = service.detect_image(&frame, true).unwrap();
  let annotated = annotated.expect("annotation requested");
  assert_eq!(result.len(), 1);
  assert_eq!(frame, before);
  assert_ne!(annotated, frame);
  assert_eq!(annotated.pixel(100, 150), Some([0, 255, 0]));
}

#[test]
fn configured_annotation_is_the_default() {
  let frame = decode_image_bytes(&png_bytes(640, 480)).unwrap();
  let (_, annotated) = service(pothole_rows()).detect(&frame).unwrap();
  assert!(annotated.is_some());

  let plain = TriageConfig {
    annotate: false,
    ..Default::default()
  };
  let service =
    TriageService::with_handle(handle(ScriptedEngine::new(pothole_rows())), &plain).unwrap();
  let (result, annotated) = service.detect(&frame).unwrap();
  assert_eq!(result.len(), 1);
  assert!(annotated.is_none());
}

#[test]
fn empty_or_undecodable_bytes_are_rejected_per_call() {
  let service = service(pothole_rows());
  assert!(matches!(
    service.detect_from_bytes(&[], false),
    Err(DetectError::InvalidInput(_))
  ));
  assert!(matches!(
    service.detect_from_bytes(b"not an image", false),
    Err(DetectError::InvalidInput(_))
  ));
  // 同一实例在错误后仍可继续使用
  assert!(service.detect_from_bytes(&png_bytes(64, 48), false).is_ok());
}

#[test]
fn inference_failure_is_propagated() {
  let engine = ScriptedEngine::new(pothole_rows()).after_warmup(AfterWarmup::Fail);
  let service = TriageService::with_handle(handle(engine), &TriageConfig::default()).unwrap();
  let frame = BgrFrame::filled(32, 32, [0, 0, 0]).unwrap();
  assert!(matches!(
    service.infer(&frame),
    Err(DetectError::InferenceFailure(_))
  ));
}

#[test]
fn output_width_change_is_a_shape_error() {
  let engine = ScriptedEngine::new(pothole_rows()).after_warmup(AfterWarmup::DropColumn);
  let service = TriageService::with_handle(handle(engine), &TriageConfig::default()).unwrap();
  let frame = BgrFrame::filled(32, 32, [0, 0, 0]).unwrap();
  assert!(matches!(
    service.infer(&frame),
    Err(DetectError::OutputShape { .. })
  ));
}

#[test]
fn thresholds_come_from_configuration() {
  let strict = TriageConfig {
    conf_threshold: 0.95,
    ..Default::default()
  };
  let service =
    TriageService::with_handle(handle(ScriptedEngine::new(pothole_rows())), &strict).unwrap();
  let frame = BgrFrame::filled(640, 480, [0, 0, 0]).unwrap();
  assert!(service.infer(&frame).unwrap().is_empty());
}
