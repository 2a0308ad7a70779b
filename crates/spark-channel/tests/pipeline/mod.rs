//! 测试总览（Why）：管线是事件编排的核心，拓扑操作、按兴趣跳过、缓存失效、墓碑转发与
//! 头尾语义任何一处出错都会让事件丢失或错序；本测试集按“拓扑 / 派发 / 随机性质”分组覆盖。

mod dispatch;
mod properties;
mod support;
mod topology;
