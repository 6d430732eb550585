//! Built-in device models.

pub mod dell_n;
pub mod routeros;
