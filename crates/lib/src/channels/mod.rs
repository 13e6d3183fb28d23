//! Message channels.
//!
//! Inbound messages come from the dispatcher; replies leave through an [`OutboundChannel`]
//! such as the WeCom group robot.

mod inbound;
mod outbound;
mod wecom;

pub use inbound::InboundMessage;
pub use outbound::{OutboundChannel, OutboundMessage, SendError};
pub use wecom::{MediaType, WeComRobot, RATE_LIMIT_ERRCODE};
