//! Network transports feeding the relay engine.

#[cfg(test)]
pub mod memory;
pub mod websocket;
