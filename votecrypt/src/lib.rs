#[macro_use]
extern crate serde;

mod ballot;
mod ciphertext;
mod combine;
mod encrypter;
mod error;
mod integer;
mod keys;
mod piecemeal;
mod proof;
mod race;
mod tally;
mod writein;

pub use ballot::*;
pub use ciphertext::*;
pub use combine::*;
pub use encrypter::*;
pub use error::*;
pub use integer::*;
pub use keys::*;
pub use piecemeal::*;
pub use proof::*;
pub use race::*;
pub use tally::*;
pub use writein::*;
