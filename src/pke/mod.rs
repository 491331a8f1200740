pub mod curve;
pub mod dh;
pub mod key;
pub mod prime;
