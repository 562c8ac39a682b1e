#![forbid(unsafe_code)]

mod args;
mod command;
mod reply;
mod request;

pub use command::Command;
pub use reply::{Reply, parse_reply};
pub use request::{encode_request, parse_request};
