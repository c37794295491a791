//! Laundry Time document store server.

pub mod server;
