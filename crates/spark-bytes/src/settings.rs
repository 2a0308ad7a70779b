use serde::Deserialize;

use crate::DEFAULT_MAX_COMPONENTS;

/// 组合流的可调参数。
///
/// 可从配置文件反序列化，缺省字段取默认值：
///
/// ```toml
/// max_components = 32
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompositeSettings {
    /// `discard_read_bytes` 之后允许保留的最多分量数，超出即合并为单一分量。
    pub max_components: usize,
}

impl Default for CompositeSettings {
    fn default() -> Self {
        Self {
            max_components: DEFAULT_MAX_COMPONENTS,
        }
    }
}
