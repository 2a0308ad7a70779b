use serde::Deserialize;

/// 管线尾部默认行为的配置。
///
/// 可直接从 TOML 片段反序列化，缺省字段取默认值：
///
/// ```
/// let settings: spark_channel::PipelineSettings =
///     toml::from_str("close_on_unhandled_exception = false").expect("解析配置");
/// assert!(settings.log_dropped_inbound);
/// assert!(!settings.close_on_unhandled_exception);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// 到达尾部的入站消息被丢弃时输出 debug 日志。
    pub log_dropped_inbound: bool,
    /// 未处理的异常到达尾部时关闭通道。
    pub close_on_unhandled_exception: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            log_dropped_inbound: true,
            close_on_unhandled_exception: true,
        }
    }
}
