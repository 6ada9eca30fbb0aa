//! 检查一折数据划分: 构建数据集与加载器, 输出前若干个训练批次的形状和耗时,
//! 并将其保存为 nii 文件与中间切片预览图.

mod runner;

fn main() -> anyhow::Result<()> {
    runner::run()
}
