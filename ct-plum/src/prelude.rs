//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::{Affine, CtData3d, CtLabel, CtScan, IntensityWindow, NiftiHeaderAttr};

pub use crate::config::TransformConfig;

pub use crate::consts::gray::{is_background, is_foreground, BACKGROUND};
pub use crate::consts::{BODY_SEG_FILE_NAME, IMAGE_FILE_NAME, LABEL_FILE_NAME, LOG_FILE_NAME};

pub use crate::dataset::{
    self, create_datasets, home_dataset_dir_with, load_data_splits, Batch, DataLoader, DataSplits,
    Dataset, SplitEntry,
};

pub use crate::transform::{eval_transforms, train_transforms, Compose, Transform, TransformError};

pub use crate::segment::{run_body_smoke_test, SegmentRequest, Segmenter, SmokeOutcome, TotalSegmentatorCli};
