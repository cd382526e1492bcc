pub mod api;
mod blind_sigs;
pub mod config;
mod engine;
mod error;
pub mod handlers;
mod message;
pub mod protocol;
mod salted_key;
mod token_store;
mod utils;

pub use crate::blind_sigs::{BlindSignature, Envelope, Slip, SlipPreparer, BLIND_SIGNATURE_LEN};
pub use crate::engine::{BlindRequest, SigningEngine, PLAIN_TOKEN_LEN, TOKEN_DB};
pub use crate::error::{CspError, Error, Result};
pub use crate::message::{HexBytes, Message};
pub use crate::salted_key::SaltedKey;
pub use crate::token_store::{KvStore, ReadTxn, SqliteKv, TokenStore, WriteTxn};
pub use crate::utils::{decode_hex, hash_to_scalar, point_from_bytes, point_to_bytes, SALT_LEN};
