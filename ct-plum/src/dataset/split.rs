//! 交叉验证划分文件 (yaml) 的解析.
//!
//! 文件结构:
//!
//! ```yaml
//! cross_validation_splits:
//!   - fold_1:
//!       train: [A, B]
//!       val: [C]
//!       test: [D]
//! ```
//!
//! 折只在列表的第一个元素中查找. 受试者 ID 可以写成字符串或整数.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use log::info;
use serde::Deserialize;

use super::{DataSplits, SplitEntry};
use crate::consts::SPLITS_KEY;

/// 加载划分文件的错误.
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    /// 读取划分文件失败.
    #[error("failed to read split manifest `{path}`: {source}")]
    Io {
        /// 划分文件.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },

    /// yaml 格式错误.
    #[error("failed to parse split manifest `{path}`: {source}")]
    Parse {
        /// 划分文件.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: serde_yaml::Error,
    },

    /// 缺少 `cross_validation_splits` 或其为空列表.
    #[error("manifest has no `{}` entries", SPLITS_KEY)]
    MissingSplits,

    /// 找不到指定折.
    #[error("fold `{fold}` not found in manifest (available: {available:?})")]
    MissingFold {
        /// 要求的折键, 如 `fold_3`.
        fold: String,
        /// 已有的折键.
        available: Vec<String>,
    },

    /// 受试者目录不存在.
    #[error("subject directory `{0}` does not exist")]
    MissingSubject(PathBuf),

    /// 同一折内受试者 ID 重复.
    #[error("subject `{id}` occurs more than once in fold `{fold}`")]
    DuplicateSubject {
        /// 折键.
        fold: String,
        /// 重复的 ID.
        id: String,
    },
}

/// yaml 中的受试者 ID. 纯数字 ID 会被 yaml 解析为整数.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum SubjectId {
    Text(String),
    Int(i64),
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
        }
    }
}

/// 单个折的三组 ID.
#[derive(Debug, Clone, Default, Deserialize)]
struct Fold {
    #[serde(default)]
    train: Vec<SubjectId>,
    #[serde(default)]
    val: Vec<SubjectId>,
    #[serde(default)]
    test: Vec<SubjectId>,
}

/// 解析后的划分文件.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(rename = "cross_validation_splits", default)]
    splits: Vec<BTreeMap<String, Fold>>,
}

/// 折号对应的键.
#[inline]
pub fn fold_key(fold: u32) -> String {
    format!("fold_{fold}")
}

impl Manifest {
    /// 从 yaml 文本解析.
    pub fn from_yaml_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    /// 读取并解析 yaml 文件.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SplitError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SplitError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml_str(&text).map_err(|source| SplitError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// 第一个元素中的所有折键.
    pub fn folds(&self) -> Vec<String> {
        self.splits
            .first()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// 把第 `fold` 折的 ID 解析为 `base_dir` 下的文件路径. 不访问文件系统.
    pub fn resolve(&self, fold: u32, base_dir: impl AsRef<Path>) -> Result<DataSplits, SplitError> {
        let key = fold_key(fold);
        let first = self.splits.first().ok_or(SplitError::MissingSplits)?;
        let ids = first.get(&key).ok_or_else(|| SplitError::MissingFold {
            fold: key.clone(),
            available: self.folds(),
        })?;

        let mut seen = HashSet::new();
        let base = base_dir.as_ref();
        let mut entries = |list: &[SubjectId]| -> Result<Vec<SplitEntry>, SplitError> {
            list.iter()
                .map(|id| {
                    let id = id.to_string();
                    if !seen.insert(id.clone()) {
                        return Err(SplitError::DuplicateSubject {
                            fold: key.clone(),
                            id,
                        });
                    }
                    Ok(SplitEntry::new(base, &id))
                })
                .collect()
        };

        Ok(DataSplits {
            train: entries(ids.train.as_slice())?,
            val: entries(ids.val.as_slice())?,
            test: entries(ids.test.as_slice())?,
        })
    }
}

/// 读取 `manifest_path` 并解析第 `fold` 折.
///
/// 数据根目录为划分文件所在目录. 只检查每个受试者目录是否存在,
/// 扫描与标注文件在加载时才会被检查.
pub fn load_data_splits(manifest_path: impl AsRef<Path>, fold: u32) -> Result<DataSplits, SplitError> {
    let path = manifest_path.as_ref();
    info!("Loading data splits from {} (fold {fold})", path.display());

    let manifest = Manifest::open(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let splits = manifest.resolve(fold, base)?;

    if let Some(missing) = splits
        .iter()
        .filter_map(|e| e.image.parent())
        .find(|dir| !dir.is_dir())
    {
        return Err(SplitError::MissingSubject(missing.to_owned()));
    }

    info!("Training samples: {}", splits.train.len());
    info!("Validation samples: {}", splits.val.len());
    info!("Test samples: {}", splits.test.len());
    Ok(splits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{IMAGE_FILE_NAME, LABEL_FILE_NAME};
    use std::fs;

    const MANIFEST: &str = "\
cross_validation_splits:
  - fold_1:
      train: [A, B]
      val: [C]
      test: [D]
    fold_2:
      train: [C, D]
      val: [A]
      test: [B]
";

    fn write_dataset(manifest: &str, subjects: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data_splits.yaml"), manifest).unwrap();
        for s in subjects {
            fs::create_dir(dir.path().join(s)).unwrap();
        }
        dir
    }

    #[test]
    fn test_resolve_fold() {
        let dir = write_dataset(MANIFEST, &["A", "B", "C", "D"]);
        let base = dir.path();
        let splits = load_data_splits(base.join("data_splits.yaml"), 1).unwrap();

        let expect = |ids: &[&str]| -> Vec<SplitEntry> {
            ids.iter()
                .map(|id| SplitEntry {
                    image: base.join(id).join(IMAGE_FILE_NAME),
                    label: base.join(id).join(LABEL_FILE_NAME),
                })
                .collect()
        };
        assert_eq!(splits.train, expect(&["A", "B"]));
        assert_eq!(splits.val, expect(&["C"]));
        assert_eq!(splits.test, expect(&["D"]));
    }

    #[test]
    fn test_missing_fold() {
        let dir = write_dataset(MANIFEST, &["A", "B", "C", "D"]);
        let err = load_data_splits(dir.path().join("data_splits.yaml"), 3).unwrap_err();
        match err {
            SplitError::MissingFold { fold, available } => {
                assert_eq!(fold, "fold_3");
                assert_eq!(available, ["fold_1", "fold_2"]);
            }
            e => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_missing_subject_dir() {
        let dir = write_dataset(MANIFEST, &["A", "B", "C"]);
        let err = load_data_splits(dir.path().join("data_splits.yaml"), 1).unwrap_err();
        assert!(matches!(err, SplitError::MissingSubject(p) if p.ends_with("D")));
    }

    #[test]
    fn test_files_are_not_checked() {
        // 目录存在但没有 nii 文件, 解析仍然成功.
        let dir = write_dataset(MANIFEST, &["A", "B", "C", "D"]);
        let splits = load_data_splits(dir.path().join("data_splits.yaml"), 2).unwrap();
        assert_eq!(splits.len(), 4);
        assert!(!splits.train[0].image.exists());
    }

    #[test]
    fn test_duplicate_subject() {
        let m = Manifest::from_yaml_str(
            "cross_validation_splits:\n  - fold_1: {train: [A], val: [B], test: [A]}\n",
        )
        .unwrap();
        assert!(matches!(
            m.resolve(1, "/data"),
            Err(SplitError::DuplicateSubject { id, .. }) if id == "A"
        ));
    }

    #[test]
    fn test_integer_ids() {
        let m = Manifest::from_yaml_str(
            "cross_validation_splits:\n  - fold_1: {train: [00293921, 17], val: [\"0042\"], test: []}\n",
        )
        .unwrap();
        let s = m.resolve(1, "/data").unwrap();
        // 前导零的数字串保持为字符串.
        assert_eq!(s.train[0].image, Path::new("/data/00293921").join(IMAGE_FILE_NAME));
        assert_eq!(s.train[1].image, Path::new("/data/17").join(IMAGE_FILE_NAME));
        assert_eq!(s.val[0].label, Path::new("/data/0042").join(LABEL_FILE_NAME));
        assert!(s.test.is_empty());
    }

    #[test]
    fn test_missing_splits() {
        let m = Manifest::from_yaml_str("other: 1\n").unwrap();
        assert!(matches!(m.resolve(1, "/data"), Err(SplitError::MissingSplits)));
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("bad.yaml");
        fs::write(&p, "cross_validation_splits: [[[").unwrap();
        assert!(matches!(load_data_splits(&p, 1), Err(SplitError::Parse { .. })));
    }
}
