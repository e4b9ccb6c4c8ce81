// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// tests/service_cell.rs - 服务构造与共享实例测试
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

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use civic_triage::model::{FALLBACK_WEIGHTS, PRIMARY_WEIGHTS};
use civic_triage::{LoadError, ServiceCell, TriageConfig, TriageService};

use common::{pothole_rows, service};

#[test]
fn missing_weights_fails_construction() {
  let dir = tempfile::tempdir().unwrap();
  let config = TriageConfig {
    weights_dir: dir.path().to_path_buf(),
    ..Default::default()
  };

  match TriageService::new(&config) {
    Err(LoadError::MissingWeights { searched, .. }) => {
      assert_eq!(
        searched,
        vec![
          dir.path().join(PRIMARY_WEIGHTS),
          dir.path().join(FALLBACK_WEIGHTS)
        ]
      );
    }
    other => panic!("unexpected: {other:?}"),
  }
}

#[test]
fn failed_initialisation_leaves_cell_empty() {
  let dir = tempfile::tempdir().unwrap();
  let config = TriageConfig {
    weights_dir: dir.path().to_path_buf(),
    ..Default::default()
  };

  let cell = ServiceCell::new();
  assert!(matches!(
    cell.get_or_try_init(|| TriageService::new(&config)),
    Err(LoadError::MissingWeights { .. })
  ));
  assert!(cell.get().is_none());

  let service = cell.get_or_try_init(|| Ok(service(pothole_rows()))).unwrap();
  assert!(Arc::ptr_eq(&service, &cell.get().unwrap()));
}

#[test]
fn concurrent_first_access_constructs_once() {
  let cell = ServiceCell::new();
  let constructed = AtomicUsize::new(0);

  let services: Vec<_> = std::thread::scope(|scope| {
    let workers: Vec<_> = (0..8)
      .map(|_| {
        scope.spawn(|| {
          cell
            .get_or_try_init(|| {
              constructed.fetch_add(1, Ordering::SeqCst);
              std::thread::sleep(Duration::from_millis(20));
              Ok(service(pothole_rows()))
            })
            .unwrap()
        })
      })
      .collect();
    workers.into_iter().map(|w| w.join().unwrap()).collect()
  });

  assert_eq!(constructed.load(Ordering::SeqCst), 1);
  assert!(services.iter().all(|s| Arc::ptr_eq(s, &services[0])));
}

#[test]
fn invalid_configuration_is_rejected_before_loading() {
  let config = TriageConfig {
    iou_threshold: 2.0,
    ..Default::default()
  };
  assert!(matches!(
    TriageService::new(&config),
    Err(LoadError::InvalidConfig(_))
  ));
}
