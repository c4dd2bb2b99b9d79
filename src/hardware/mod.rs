//! Hardware backends implementing [crate::channel::CanChannel]
//!
//! The responder core never talks to hardware directly; anything that can
//! move whole CAN frames can sit behind the channel trait. Currently only a
//! SocketCAN backend is provided (Linux only, `socketcan` feature).

#[cfg(all(feature = "socketcan", target_os = "linux"))]
pub mod socketcan;
