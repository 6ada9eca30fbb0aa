//! 外部分割模型的调用接口, 以及身体分割冒烟测试.
//!
//! 分割模型本身不在本 crate 中实现. [`Segmenter`] 把一次分割请求交给外部程序
//! (默认是 `TotalSegmentator` 命令行工具), 调用方只关心输出文件是否生成.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use log::{error, info};

use crate::consts::BODY_SEG_FILE_NAME;

/// 分割调用的错误.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// 无法启动外部程序.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// 程序名.
        program: String,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },

    /// 外部程序以非零状态退出.
    #[error("`{program}` exited with {status}")]
    ExitStatus {
        /// 程序名.
        program: String,
        /// 退出状态.
        status: ExitStatus,
    },

    /// 准备结果目录或复制输入时的文件错误.
    #[error("i/o error on `{path}`: {source}")]
    Io {
        /// 出错的路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },

    /// 请求本身不合法.
    #[error("invalid segmentation request: {0}")]
    InvalidInput(String),
}

/// 一次分割请求.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRequest {
    /// 输入 CT.
    pub input: PathBuf,
    /// 输出的分割文件.
    pub output: PathBuf,
    /// 任务名, 如 `body`.
    pub task: String,
    /// 是否使用低分辨率快速模型.
    pub fast: bool,
    /// 是否把所有类别写进同一个多标签文件.
    pub ml: bool,
    /// 是否输出详细日志.
    pub verbose: bool,
    /// 运行设备, 如 `gpu:0`.
    pub device: String,
}

impl SegmentRequest {
    /// 身体分割请求: 完整分辨率, 多标签输出, 详细日志, 第一块 GPU.
    pub fn body(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            task: "body".to_string(),
            fast: false,
            ml: true,
            verbose: true,
            device: "gpu:0".to_string(),
        }
    }

    /// 替换运行设备.
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }
}

/// 执行分割请求的对象.
pub trait Segmenter {
    /// 运行分割. 返回 `Ok` 不代表输出文件一定存在.
    fn segment(&self, req: &SegmentRequest) -> Result<(), SegmentError>;
}

impl<F> Segmenter for F
where
    F: Fn(&SegmentRequest) -> Result<(), SegmentError>,
{
    #[inline]
    fn segment(&self, req: &SegmentRequest) -> Result<(), SegmentError> {
        self(req)
    }
}

/// `TotalSegmentator` 命令行工具.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotalSegmentatorCli {
    program: String,
}

impl Default for TotalSegmentatorCli {
    fn default() -> Self {
        Self::new()
    }
}

impl TotalSegmentatorCli {
    /// 默认程序名 `TotalSegmentator`, 从 `PATH` 中查找.
    pub fn new() -> Self {
        Self::with_program("TotalSegmentator")
    }

    /// 指定程序名或路径.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// 程序名.
    #[inline]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// 组装命令行参数.
    pub fn args(&self, req: &SegmentRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            req.input.clone().into(),
            "-o".into(),
            req.output.clone().into(),
            "--task".into(),
            req.task.clone().into(),
        ];
        if req.fast {
            args.push("--fast".into());
        }
        if req.ml {
            args.push("--ml".into());
        }
        if req.verbose {
            args.push("-v".into());
        }
        args.push("--device".into());
        args.push(req.device.clone().into());
        args
    }
}

impl Segmenter for TotalSegmentatorCli {
    fn segment(&self, req: &SegmentRequest) -> Result<(), SegmentError> {
        if req.task.is_empty() {
            return Err(SegmentError::InvalidInput("empty task name".to_string()));
        }
        info!("Running {} on {}", self.program, req.input.display());
        let status = Command::new(&self.program)
            .args(self.args(req))
            .status()
            .map_err(|source| SegmentError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(SegmentError::ExitStatus {
                program: self.program.clone(),
                status,
            });
        }
        Ok(())
    }
}

/// 冒烟测试的结论.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmokeOutcome {
    /// 输出文件已生成.
    Produced(PathBuf),
    /// 分割结束后找不到输出文件.
    Missing(PathBuf),
}

impl SmokeOutcome {
    /// 输出文件是否已生成.
    #[inline]
    pub fn is_produced(&self) -> bool {
        matches!(self, Self::Produced(_))
    }
}

/// 身体分割冒烟测试.
///
/// 1. 创建 `results_dir`;
/// 2. 把输入 CT 以原文件名复制到 `results_dir`;
/// 3. 以 `results_dir/body_seg.nii.gz` 为输出运行身体分割;
/// 4. 检查输出文件是否存在. 不存在时记录错误日志并返回 [`SmokeOutcome::Missing`],
///   而不是 `Err`.
pub fn run_body_smoke_test<S: Segmenter + ?Sized>(
    ct_path: impl AsRef<Path>,
    results_dir: impl AsRef<Path>,
    segmenter: &S,
    device: &str,
) -> Result<SmokeOutcome, SegmentError> {
    let ct_path = ct_path.as_ref();
    let results_dir = results_dir.as_ref();
    info!("Body segmentation smoke test started");

    fs::create_dir_all(results_dir).map_err(|source| SegmentError::Io {
        path: results_dir.to_owned(),
        source,
    })?;

    let file_name = ct_path
        .file_name()
        .ok_or_else(|| SegmentError::InvalidInput(format!("`{}` has no file name", ct_path.display())))?;
    let copy = results_dir.join(file_name);
    fs::copy(ct_path, &copy).map_err(|source| SegmentError::Io {
        path: ct_path.to_owned(),
        source,
    })?;
    info!("Copied {} to {}", ct_path.display(), copy.display());

    let output = results_dir.join(BODY_SEG_FILE_NAME);
    let req = SegmentRequest::body(ct_path, &output).with_device(device);
    segmenter.segment(&req)?;
    info!("Body segmentation finished");

    if output.exists() {
        info!("Body segmentation output written to {}", output.display());
        Ok(SmokeOutcome::Produced(output))
    } else {
        error!("Body segmentation output not found at {}", output.display());
        Ok(SmokeOutcome::Missing(output))
    }
}
