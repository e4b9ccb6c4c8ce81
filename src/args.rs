// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use civic_triage::{FromUrl, TriageConfig, model::ModelLoader};

/// Civic Triage 市民巡检：识别投诉照片中的问题并路由到责任部门
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型位置，例如 yolov5:///srv/weights/best.onnx?device=cpu
  /// 未给出时在权重目录中查找 best.onnx / best.ort
  #[arg(long, value_name = "MODEL")]
  pub model: Option<Url>,

  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 计算设备: cpu, cuda, cuda:1，留空自动选择
  #[arg(long, value_name = "DEVICE")]
  pub device: Option<String>,

  /// 网络输入尺寸
  #[arg(long, value_name = "PIXELS")]
  pub img_size: Option<u32>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub conf: Option<f32>,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub iou: Option<f32>,

  /// 输入图像，例如 image:///srv/reports/42.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 附加输出，例如 image:///tmp/annotated.jpg 或 json:///tmp/report.json
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,

  /// 图像输出不绘制检测框
  #[arg(long)]
  pub no_annotate: bool,
}

impl Args {
  /// 配置文件 → 模型 URL → 单项参数，后者覆盖前者
  pub fn to_config(&self) -> Result<TriageConfig> {
    let mut config = match &self.config {
      Some(path) => TriageConfig::from_json_file(path)
        .with_context(|| format!("无法加载配置文件 {}", path.display()))?,
      None => TriageConfig::default(),
    };

    if let Some(url) = &self.model {
      ModelLoader::from_url(url)
        .with_context(|| format!("无法解析模型位置 {}", url))?
        .merge_into(&mut config);
    }
    if let Some(device) = &self.device {
      config.device = device.clone();
    }
    if let Some(size) = self.img_size {
      config.img_size = size;
    }
    if let Some(conf) = self.conf {
      config.conf_threshold = conf;
    }
    if let Some(iou) = self.iou {
      config.iou_threshold = iou;
    }
    if self.no_annotate {
      config.annotate = false;
    }

    Ok(config)
  }
}
