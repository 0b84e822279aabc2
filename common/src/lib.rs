#![cfg_attr(not(feature = "std"), no_std)]

pub mod protocol;

pub use protocol::{Clip, CommandCode, PeerAddress};
