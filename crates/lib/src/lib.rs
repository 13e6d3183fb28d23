//! Dify to WeCom relay core: configuration, the Dify client, conversation continuity,
//! reply classification and the pipeline that ties them together. Used by the CLI.

pub mod channels;
pub mod config;
pub mod conversation;
pub mod dify;
pub mod pipeline;
pub mod reply;
