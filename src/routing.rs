// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/routing.rs - 问题类别到责任部门的路由
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

use std::fmt;

use serde::Serialize;

use crate::model::{BoundingBox, DetectResult, Detection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Department {
  Garbage,
  Roads,
  /// 路由表中没有对应条目的类别
  Unrouted,
}

impl Department {
  pub const ALL: [Department; 3] = [Department::Garbage, Department::Roads, Department::Unrouted];

  pub fn label(&self) -> &'static str {
    match self {
      Department::Garbage => "Garbage",
      Department::Roads => "Roads",
      Department::Unrouted => "Unrouted",
    }
  }
}

impl fmt::Display for Department {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

/// 类别名称（区分大小写）到部门的静态映射，表内不含默认条目
const AUTHORITY_TABLE: [(&str, Department); 12] = [
  ("garbage", Department::Garbage),
  ("garbageoverflow", Department::Garbage),
  ("animalcarcas", Department::Garbage),
  ("animalcarcass", Department::Garbage),
  ("street_debris", Department::Garbage),
  ("streetdebris", Department::Garbage),
  ("pothole", Department::Roads),
  ("roadcracks", Department::Roads),
  ("waterpuddles", Department::Roads),
  ("openmanhole", Department::Roads),
  ("sandonroad", Department::Roads),
  ("streethawker", Department::Roads),
];

pub struct AuthorityRouter;

impl AuthorityRouter {
  /// 表中查找，未登记的类别返回 `None`
  pub fn lookup(class_name: &str) -> Option<Department> {
    AUTHORITY_TABLE
      .iter()
      .find(|(key, _)| *key == class_name)
      .map(|(_, department)| *department)
  }

  /// 未登记的类别路由到 [`Department::Unrouted`]
  pub fn route(class_name: &str) -> Department {
    Self::lookup(class_name).unwrap_or(Department::Unrouted)
  }

  pub fn entries() -> impl Iterator<Item = (&'static str, Department)> {
    AUTHORITY_TABLE.iter().copied()
  }
}

/// 附带责任部门的检测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedIssue {
  pub class_name: String,
  pub confidence: f32,
  pub bbox: BoundingBox,
  pub department: Department,
}

impl From<&Detection> for RoutedIssue {
  fn from(detection: &Detection) -> Self {
    Self {
      class_name: detection.class_name.clone(),
      confidence: detection.confidence,
      bbox: detection.bbox,
      department: AuthorityRouter::route(&detection.class_name),
    }
  }
}

pub fn route_all(result: &DetectResult) -> Vec<RoutedIssue> {
  result.iter().map(RoutedIssue::from).collect()
}
