//! 网关层：会话、会话注册表、channel 传输
//!
//! 传输层（WebSocket、终端……）实现 ChannelTransport；每个会话的出站消息经队列由发送任务投递。
//! SessionRegistry 按 channel 维护会话，并把人工回复路由到正在等待的 flow。

mod channel;
mod registry;
mod session;

pub use channel::{
    format_outbound, spawn_sender, ChannelError, ChannelTransport, Outbound, RecordingTransport,
    SendRetry,
};
pub use registry::SessionRegistry;
pub use session::{Session, SessionId};
