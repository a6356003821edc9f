//! ports - 抽象 trait 层
//!
//! 定义准入控制依赖的基础设施接口

mod counter;

pub use counter::*;
