//! 脚本的输入路径与参数. 先读环境变量, 再用默认值.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;

/// 划分文件默认路径 (相对于工作目录).
pub const DEFAULT_SPLITS_YAML: &str = "data/KU-PET-CT/data_splits.yaml";

/// 冒烟测试输入 CT 的默认路径 (相对于工作目录).
pub const DEFAULT_INPUT_CT: &str = "data/KU-PET-CT/00293921/CT.nii.gz";

/// 读取路径.
///
/// 1. 若环境变量 `var` 非空, 则返回其值;
/// 2. 否则, 若 `default` 存在, 返回 `default`;
/// 3. 否则, 若 `$HOME/dataset/{default 去掉开头的 data/}` 存在, 返回该路径;
/// 4. 否则返回 `default`, 由调用方报告文件不存在.
pub fn path_from_env_or_default(var: &str, default: &str) -> PathBuf {
    if let Some(d) = env::var_os(var).filter(|v| !v.is_empty()) {
        return PathBuf::from(d);
    }
    let local = PathBuf::from(default);
    if local.exists() {
        return local;
    }
    let rel = Path::new(default).strip_prefix("data").unwrap_or(Path::new(default));
    match ct_plum::dataset::home_dataset_dir_with([rel]) {
        Some(home) if home.exists() => home,
        _ => local,
    }
}

/// 读取并解析环境变量 `var`. 未设置时返回 `default`.
pub fn parse_env_or<T>(var: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .with_context(|| format!("cannot parse ${var}={v:?}")),
        _ => Ok(default),
    }
}

/// 划分文件路径: `$CT_SPLITS_YAML` 或默认值.
#[inline]
pub fn splits_yaml_from_env_or_default() -> PathBuf {
    path_from_env_or_default("CT_SPLITS_YAML", DEFAULT_SPLITS_YAML)
}

/// 冒烟测试输入 CT: `$CT_INPUT` 或默认值.
#[inline]
pub fn input_ct_from_env_or_default() -> PathBuf {
    path_from_env_or_default("CT_INPUT", DEFAULT_INPUT_CT)
}

/// 结果目录: `$CT_RESULTS_DIR` 或 `default`.
pub fn results_dir_from_env_or(default: &str) -> PathBuf {
    env::var_os("CT_RESULTS_DIR")
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from(default), PathBuf::from)
}

/// 折号: `$CT_FOLD`, 默认 1.
#[inline]
pub fn fold_from_env() -> anyhow::Result<u32> {
    parse_env_or("CT_FOLD", 1)
}

/// 分割设备: `$CT_SEG_DEVICE`, 默认 `gpu:0`.
#[inline]
pub fn device_from_env() -> String {
    env::var("CT_SEG_DEVICE")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "gpu:0".to_string())
}

/// 随机种子: `$CT_SEED`, 默认取当前时间.
pub fn seed_from_env() -> anyhow::Result<u64> {
    let fallback = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64);
    parse_env_or("CT_SEED", fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        env::set_var("CT_TEST_FOLD_OK", " 3 ");
        assert_eq!(parse_env_or("CT_TEST_FOLD_OK", 1u32).unwrap(), 3);

        env::set_var("CT_TEST_FOLD_BAD", "three");
        assert!(parse_env_or("CT_TEST_FOLD_BAD", 1u32).is_err());

        assert_eq!(parse_env_or("CT_TEST_FOLD_UNSET", 7u32).unwrap(), 7);
    }

    #[test]
    fn test_path_override() {
        env::set_var("CT_TEST_PATH", "/tmp/override.yaml");
        assert_eq!(
            path_from_env_or_default("CT_TEST_PATH", DEFAULT_SPLITS_YAML),
            Path::new("/tmp/override.yaml")
        );
    }
}
