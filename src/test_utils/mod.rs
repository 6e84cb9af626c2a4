//! 测试辅助工具

pub mod database_seed;
