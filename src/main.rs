// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/main.rs - 单张图像检测与路由
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use civic_triage::{
  FromUrl, TriageService,
  input::ImageFileInput,
  output::{JsonReportOutput, OutputWrapper},
  task::{OneShotTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = args::Args::parse();
  let config = args.to_config()?;

  info!("输入来源: {}", args.input);
  if let Some(output) = &args.output {
    info!("输出路径: {}", output);
  }

  let service = TriageService::new(&config).context("检测服务初始化失败")?;
  let input = ImageFileInput::from_url(&args.input)
    .with_context(|| format!("无法读取输入 {}", args.input))?;

  let mut outputs = vec![OutputWrapper::JsonReportOutput(JsonReportOutput::stdout())];
  if let Some(url) = &args.output {
    let output = OutputWrapper::from_url(url)
      .with_context(|| format!("无法创建输出 {}", url))?
      .with_draw(service.draw().clone())
      .with_annotation(service.config().annotate);
    outputs.push(output);
  }

  OneShotTask.run_task(input, &service, outputs)?;

  Ok(())
}
