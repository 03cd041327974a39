//! HCI command opcodes
//!
//! A command opcode is made of the OpCode Group Field (OGF, the upper 6 bits) and the OpCode
//! Command Field (OCF, the lower 10 bits).

use core::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode(u16);

impl Opcode {
    /// The no-operation opcode
    ///
    /// Controllers use this opcode within a *Command Complete* event to update the number of
    /// command packets the host may send without completing a command.
    pub const NOP: Opcode = Opcode(0x0000);

    // Link Control
    pub const DISCONNECT: Opcode = Opcode::from_pair(0x01, 0x0006);

    // Controller and Baseband
    pub const RESET: Opcode = Opcode::from_pair(0x03, 0x0003);

    // LE Controller
    pub const LE_READ_BUFFER_SIZE: Opcode = Opcode::from_pair(0x08, 0x0002);
    pub const LE_CREATE_CONNECTION: Opcode = Opcode::from_pair(0x08, 0x000D);
    pub const LE_CREATE_CONNECTION_CANCEL: Opcode = Opcode::from_pair(0x08, 0x000E);
    pub const LE_CONNECTION_UPDATE: Opcode = Opcode::from_pair(0x08, 0x0013);

    pub const fn from_pair(ogf: u16, ocf: u16) -> Self {
        Opcode((ocf & 0x3FF) | (ogf << 10))
    }

    pub const fn from_raw(raw: u16) -> Self {
        Opcode(raw)
    }

    pub fn get_ogf(&self) -> u16 {
        self.0 >> 10
    }

    pub fn get_ocf(&self) -> u16 {
        self.0 & 0x3FF
    }

    pub fn to_raw(&self) -> u16 {
        self.0
    }
}

impl From<u16> for Opcode {
    fn from(raw: u16) -> Self {
        Opcode(raw)
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Opcode({:#06x}, ogf: {:#x}, ocf: {:#x})", self.0, self.get_ogf(), self.get_ocf())
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn opcode_pairs() {
        assert_eq!(0x0406, Opcode::DISCONNECT.to_raw());
        assert_eq!(0x0C03, Opcode::RESET.to_raw());
        assert_eq!(0x200D, Opcode::LE_CREATE_CONNECTION.to_raw());
        assert_eq!(0x2013, Opcode::LE_CONNECTION_UPDATE.to_raw());

        let op = Opcode::from(0x2006);

        assert_eq!(0x08, op.get_ogf());
        assert_eq!(0x06, op.get_ocf());
        assert_eq!(Opcode::from_pair(0x08, 0x06), op);
    }
}
