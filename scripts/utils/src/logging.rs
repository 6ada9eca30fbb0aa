//! 同时输出到终端和结果目录下日志文件的日志初始化.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use anyhow::Context;
use ct_plum::consts::LOG_FILE_NAME;
use env_logger::{Builder, Target};
use log::LevelFilter;

/// 把同一份输出写到 stderr 和一个文件.
#[derive(Debug)]
pub struct TeeWriter {
    file: File,
}

impl TeeWriter {
    /// 以追加模式打开 `path`.
    pub fn append(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        io::stderr().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        io::stderr().flush()
    }
}

/// 创建 `results_dir`, 并初始化全局日志.
///
/// 格式为 `时间 - 级别 - 内容`, 默认级别 `info`, 可用 `RUST_LOG` 覆盖.
/// 每条记录同时写到 stderr 和 `results_dir/logs.log`.
pub fn init_logging(results_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(results_dir)
        .with_context(|| format!("cannot create results dir `{}`", results_dir.display()))?;
    let log_path = results_dir.join(LOG_FILE_NAME);
    let tee = TeeWriter::append(&log_path)
        .with_context(|| format!("cannot open log file `{}`", log_path.display()))?;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(buf, "{} - {} - {}", buf.timestamp_millis(), record.level(), record.args())
        })
        .target(Target::Pipe(Box::new(tee)))
        .try_init()
        .context("logger already initialized")
}
