//! 身体分割冒烟测试.
//!
//! 对一个 CT 运行 `TotalSegmentator` 的 `body` 任务, 并检查输出文件是否生成.
//! 输出缺失只记录错误日志, 程序正常退出.

mod runner;

fn main() -> anyhow::Result<()> {
    runner::run()
}
