#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod target;
mod tunnel;

pub use self::{
    target::{DestinationRef, ForwardTarget},
    tunnel::{DialTunnel, ForwardError, TunnelIo, TunnelStreams},
};
