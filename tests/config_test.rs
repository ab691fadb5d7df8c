//! 配置与模块目录集成测试
//!
//! 测试配置文件加载、命令行覆盖合并，以及按配置扫描模块目录的完整流程

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chips_lifecycle::{
    CoreError, LifecycleConfig, ModuleActivator, ModuleManager, ModuleManagerConfig,
    NoopActivator,
};
use tempfile::TempDir;

async fn write_manifest(root: &Path, dir: &str, content: &str) {
    let module_dir = root.join(dir);
    tokio::fs::create_dir_all(&module_dir).await.unwrap();
    tokio::fs::write(module_dir.join("module.yaml"), content)
        .await
        .unwrap();
}

fn noop(_: &chips_lifecycle::ModuleDescriptor) -> Arc<dyn ModuleActivator> {
    Arc::new(NoopActivator)
}

/// 测试 YAML 配置加载
#[tokio::test]
async fn test_load_yaml_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.yaml");
    tokio::fs::write(
        &path,
        r#"
logging:
  level: debug
  json_format: true
modules:
  module_dirs:
    - ./modules
    - /opt/chips/modules
  hook_timeout_ms: 1500
dev_mode: true
"#,
    )
    .await
    .unwrap();

    let config = LifecycleConfig::from_file(&path).await.unwrap();

    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json_format);
    assert_eq!(config.logging.rotation, "daily");
    assert_eq!(config.modules.module_dirs.len(), 2);
    assert_eq!(config.modules.manifest_file, "module.yaml");
    assert_eq!(config.modules.hook_timeout_ms, Some(1500));
    assert!(config.dev_mode);
    assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
}

/// 测试 JSON 配置加载
#[tokio::test]
async fn test_load_json_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    tokio::fs::write(
        &path,
        r#"{ "logging": { "level": "warn" }, "modules": { "manifest_file": "chips.yaml" } }"#,
    )
    .await
    .unwrap();

    let config = LifecycleConfig::from_file(&path).await.unwrap();

    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.modules.manifest_file, "chips.yaml");
    assert!(config.modules.hook_timeout_ms.is_none());
    assert!(!config.dev_mode);
}

/// 测试缺失文件和无效值
#[tokio::test]
async fn test_invalid_config_files() {
    let temp_dir = TempDir::new().unwrap();

    let missing = LifecycleConfig::from_file(temp_dir.path().join("missing.yaml")).await;
    assert!(matches!(missing, Err(CoreError::ConfigLoadFailed(_))));

    let bad_level = temp_dir.path().join("bad_level.yaml");
    tokio::fs::write(&bad_level, "logging:\n  level: loud\n")
        .await
        .unwrap();
    match LifecycleConfig::from_file(&bad_level).await {
        Err(CoreError::InvalidConfigValue { key, .. }) => assert_eq!(key, "logging.level"),
        other => panic!("期望无效配置值错误，实际为 {:?}", other),
    }

    let zero_timeout = temp_dir.path().join("zero_timeout.yaml");
    tokio::fs::write(&zero_timeout, "modules:\n  hook_timeout_ms: 0\n")
        .await
        .unwrap();
    match LifecycleConfig::from_file(&zero_timeout).await {
        Err(CoreError::InvalidConfigValue { key, .. }) => {
            assert_eq!(key, "modules.hook_timeout_ms")
        }
        other => panic!("期望无效配置值错误，实际为 {:?}", other),
    }

    let broken = temp_dir.path().join("broken.yaml");
    tokio::fs::write(&broken, "logging: [unclosed\n").await.unwrap();
    assert!(matches!(
        LifecycleConfig::from_file(&broken).await,
        Err(CoreError::Yaml(_))
    ));
}

/// 测试命令行覆盖合并
#[tokio::test]
async fn test_overrides_merge_into_file_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.yaml");
    tokio::fs::write(
        &path,
        "logging:\n  level: warn\nmodules:\n  module_dirs: [./base]\n",
    )
    .await
    .unwrap();

    let mut config = LifecycleConfig::from_file(&path).await.unwrap();
    let overrides = LifecycleConfig::builder()
        .log_level("trace")
        .module_dir("./extra")
        .hook_timeout_ms(200)
        .build();
    config.merge(overrides);
    config.validate().unwrap();

    assert_eq!(config.logging.level, "trace");
    assert_eq!(config.modules.module_dirs.len(), 2);
    assert!(config.modules.module_dirs[1].ends_with("extra"));

    let manager_config = ModuleManagerConfig::from_config(&config);
    assert_eq!(manager_config.hook_timeout, Some(Duration::from_millis(200)));
    assert_eq!(manager_config.module_dirs, config.modules.module_dirs);
}

/// 测试按配置扫描模块目录并按依赖顺序启动
#[tokio::test]
async fn test_load_modules_from_configured_dirs() {
    let temp_dir = TempDir::new().unwrap();
    let modules_root = temp_dir.path().join("modules");
    write_manifest(
        &modules_root,
        "logic",
        "id: logic\nversion: 1.0.0\n",
    )
    .await;
    write_manifest(
        &modules_root,
        "reporting",
        "id: reporting\nname: 报表\nversion: 1.2.0\nrequires: [logic, webservices]\n",
    )
    .await;
    write_manifest(
        &modules_root,
        "webservices",
        "id: webservices\nversion: 0.9.0\ndependencies: [logic]\n",
    )
    .await;
    // 无效描述与无描述的目录都会被跳过
    write_manifest(&modules_root, "broken", "id: [not-a-string\n").await;
    tokio::fs::create_dir_all(modules_root.join("empty"))
        .await
        .unwrap();

    let config = LifecycleConfig::builder()
        .module_dir(&modules_root)
        .module_dir(temp_dir.path().join("does-not-exist"))
        .build();
    let manager = ModuleManager::from_config(&config);

    let mut loaded = manager.load_from_dirs(noop).await.unwrap();
    loaded.sort();
    assert_eq!(loaded, vec!["logic", "reporting", "webservices"]);

    let info = manager.module_info("logic").await.unwrap();
    assert_eq!(info.descriptor.name, "logic");

    assert_eq!(
        manager.start_order().await.unwrap(),
        vec!["logic", "webservices", "reporting"]
    );

    // 再次扫描不会重复加载
    assert!(manager.load_from_dirs(noop).await.unwrap().is_empty());
    assert_eq!(manager.module_count().await, 3);

    let report = manager.start_all().await.unwrap();
    assert_eq!(report.started, vec!["logic", "webservices", "reporting"]);
}

/// 测试自定义描述文件名和单个描述文件加载
#[tokio::test]
async fn test_custom_manifest_file_name() {
    let temp_dir = TempDir::new().unwrap();
    let module_dir = temp_dir.path().join("audit");
    tokio::fs::create_dir_all(&module_dir).await.unwrap();
    tokio::fs::write(module_dir.join("chips.yaml"), "id: audit\nversion: 2.0.0\n")
        .await
        .unwrap();
    // 默认文件名不会被读取
    tokio::fs::write(module_dir.join("module.yaml"), "id: ignored\nversion: 1.0.0\n")
        .await
        .unwrap();

    let config = LifecycleConfig::builder()
        .module_dir(temp_dir.path())
        .manifest_file("chips.yaml")
        .build();
    let manager = ModuleManager::from_config(&config);

    assert_eq!(manager.load_from_dirs(noop).await.unwrap(), vec!["audit"]);

    let other = ModuleManager::with_defaults();
    let id = other
        .load_manifest(&module_dir.join("module.yaml"), Arc::new(NoopActivator))
        .await
        .unwrap();
    assert_eq!(id, "ignored");

    let missing = other
        .load_manifest(&module_dir.join("nope.yaml"), Arc::new(NoopActivator))
        .await;
    assert!(matches!(missing, Err(CoreError::Io(_))));
}
