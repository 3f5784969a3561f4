//! Protocol limits shared by the transport and harness configuration.

/// Largest register count a single request frame can carry
pub const PROTOCOL_MAX_REGISTERS: u16 = 125;
