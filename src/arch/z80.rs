//! Codificación de instrucciones Z80.
//!
//! Solo se modela el subconjunto de instrucciones que emiten el
//! generador y la biblioteca de runtime. La misma tabla sirve en
//! ambos sentidos: [`Inst::encode`] para generar código y
//! [`Inst::decode`] para el simulador y los listados.

use std::fmt::{self, Display};

/// Registro de 8 bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reg8 {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
}

impl Reg8 {
    fn code(self) -> u8 {
        match self {
            Reg8::B => 0,
            Reg8::C => 1,
            Reg8::D => 2,
            Reg8::E => 3,
            Reg8::H => 4,
            Reg8::L => 5,
            Reg8::A => 7,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        let reg = match code & 0x07 {
            0 => Reg8::B,
            1 => Reg8::C,
            2 => Reg8::D,
            3 => Reg8::E,
            4 => Reg8::H,
            5 => Reg8::L,
            7 => Reg8::A,
            _ => return None,
        };

        Some(reg)
    }
}

/// Par de registros de 16 bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reg16 {
    BC,
    DE,
    HL,
}

impl Reg16 {
    fn code(self) -> u8 {
        match self {
            Reg16::BC => 0,
            Reg16::DE => 1,
            Reg16::HL => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code & 0x03 {
            0 => Some(Reg16::BC),
            1 => Some(Reg16::DE),
            2 => Some(Reg16::HL),
            _ => None,
        }
    }
}

/// Códigos de condición físicos.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cond {
    Z,
    NZ,
    C,
    NC,
}

impl Cond {
    /// Condición complementaria.
    pub fn negate(self) -> Cond {
        match self {
            Cond::Z => Cond::NZ,
            Cond::NZ => Cond::Z,
            Cond::C => Cond::NC,
            Cond::NC => Cond::C,
        }
    }

    fn code(self) -> u8 {
        match self {
            Cond::NZ => 0,
            Cond::Z => 1,
            Cond::NC => 2,
            Cond::C => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code & 0x07 {
            0 => Some(Cond::NZ),
            1 => Some(Cond::Z),
            2 => Some(Cond::NC),
            3 => Some(Cond::C),
            _ => None,
        }
    }
}

/// Operación aritmético-lógica sobre el acumulador.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
}

impl AluOp {
    fn code(self) -> u8 {
        self as u8
    }

    fn from_code(code: u8) -> Self {
        use AluOp::*;
        [Add, Adc, Sub, Sbc, And, Xor, Or, Cp][(code & 0x07) as usize]
    }
}

/// Una instrucción.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Inst {
    Nop,
    Halt,

    /// `LD r,n`
    LdImm8(Reg8, u8),

    /// `LD rr,nn`
    LdImm16(Reg16, u16),

    /// `LD r,r'`
    LdReg(Reg8, Reg8),

    /// `LD r,(HL)`
    LdFromHl(Reg8),

    /// `LD (HL),r`
    LdToHl(Reg8),

    /// `LD A,(nn)`
    LdAFromAddr(u16),

    /// `LD (nn),A`
    LdAddrFromA(u16),

    /// `LD HL,(nn)`
    LdHlFromAddr(u16),

    /// `LD (nn),HL`
    LdAddrFromHl(u16),

    /// `LD r,(IX+d)`
    LdFromIx(Reg8, i8),

    /// `LD (IX+d),r`
    LdToIx(Reg8, i8),

    /// `LD IX,nn`
    LdIxImm(u16),

    /// `LD SP,HL`
    LdSpHl,

    /// `LD SP,IX`
    LdSpIx,

    /// `ADD IX,SP`
    AddIxSp,

    PushIx,
    PopIx,
    Push(Reg16),
    Pop(Reg16),

    /// `ADD HL,rr`
    AddHl(Reg16),

    /// `ADD HL,SP`
    AddHlSp,

    /// `SBC HL,DE`
    SbcHlDe,

    /// `INC HL`
    IncHl,

    IncReg(Reg8),
    DecReg(Reg8),

    /// `EX DE,HL`
    ExDeHl,

    /// Operación sobre `A` con un registro.
    Alu(AluOp, Reg8),

    /// Operación sobre `A` con un inmediato.
    AluImm(AluOp, u8),

    Rl(Reg8),
    Rr(Reg8),
    Sla(Reg8),
    Srl(Reg8),

    Jp(u16),
    JpCond(Cond, u16),
    Jr(i8),
    JrCond(Cond, i8),
    Call(u16),
    Ret,
    RetCond(Cond),

    /// Llamada a uno de los vectores fijos de página cero.
    Rst(u8),
}

impl Inst {
    /// Agrega la codificación de esta instrucción a `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        use Inst::*;

        let word = |out: &mut Vec<u8>, opcode: &[u8], value: u16| {
            out.extend_from_slice(opcode);
            out.extend_from_slice(&value.to_le_bytes());
        };

        match *self {
            Nop => out.push(0x00),
            Halt => out.push(0x76),
            LdImm8(r, n) => out.extend_from_slice(&[0x06 | r.code() << 3, n]),
            LdImm16(rr, nn) => word(out, &[0x01 | rr.code() << 4], nn),
            LdReg(d, s) => out.push(0x40 | d.code() << 3 | s.code()),
            LdFromHl(r) => out.push(0x46 | r.code() << 3),
            LdToHl(r) => out.push(0x70 | r.code()),
            LdAFromAddr(nn) => word(out, &[0x3A], nn),
            LdAddrFromA(nn) => word(out, &[0x32], nn),
            LdHlFromAddr(nn) => word(out, &[0x2A], nn),
            LdAddrFromHl(nn) => word(out, &[0x22], nn),
            LdFromIx(r, d) => out.extend_from_slice(&[0xDD, 0x46 | r.code() << 3, d as u8]),
            LdToIx(r, d) => out.extend_from_slice(&[0xDD, 0x70 | r.code(), d as u8]),
            LdIxImm(nn) => word(out, &[0xDD, 0x21], nn),
            LdSpHl => out.push(0xF9),
            LdSpIx => out.extend_from_slice(&[0xDD, 0xF9]),
            AddIxSp => out.extend_from_slice(&[0xDD, 0x39]),
            PushIx => out.extend_from_slice(&[0xDD, 0xE5]),
            PopIx => out.extend_from_slice(&[0xDD, 0xE1]),
            Push(rr) => out.push(0xC5 | rr.code() << 4),
            Pop(rr) => out.push(0xC1 | rr.code() << 4),
            AddHl(rr) => out.push(0x09 | rr.code() << 4),
            AddHlSp => out.push(0x39),
            SbcHlDe => out.extend_from_slice(&[0xED, 0x52]),
            IncHl => out.push(0x23),
            IncReg(r) => out.push(0x04 | r.code() << 3),
            DecReg(r) => out.push(0x05 | r.code() << 3),
            ExDeHl => out.push(0xEB),
            Alu(op, r) => out.push(0x80 | op.code() << 3 | r.code()),
            AluImm(op, n) => out.extend_from_slice(&[0xC6 | op.code() << 3, n]),
            Rl(r) => out.extend_from_slice(&[0xCB, 0x10 | r.code()]),
            Rr(r) => out.extend_from_slice(&[0xCB, 0x18 | r.code()]),
            Sla(r) => out.extend_from_slice(&[0xCB, 0x20 | r.code()]),
            Srl(r) => out.extend_from_slice(&[0xCB, 0x38 | r.code()]),
            Jp(nn) => word(out, &[0xC3], nn),
            JpCond(cc, nn) => word(out, &[0xC2 | cc.code() << 3], nn),
            Jr(e) => out.extend_from_slice(&[0x18, e as u8]),
            JrCond(cc, e) => out.extend_from_slice(&[0x20 | cc.code() << 3, e as u8]),
            Call(nn) => word(out, &[0xCD], nn),
            Ret => out.push(0xC9),
            RetCond(cc) => out.push(0xC0 | cc.code() << 3),
            Rst(vector) => out.push(0xC7 | (vector & 0x38)),
        }
    }

    /// Tamaño en bytes de la codificación.
    pub fn size(&self) -> u16 {
        let mut bytes = Vec::with_capacity(4);
        self.encode(&mut bytes);
        bytes.len() as u16
    }

    /// Decodifica la instrucción al inicio de `bytes`.
    ///
    /// Retorna la instrucción y su tamaño, o `None` si el opcode no
    /// pertenece al subconjunto conocido o la entrada está truncada.
    pub fn decode(bytes: &[u8]) -> Option<(Inst, usize)> {
        use Inst::*;

        let opcode = *bytes.first()?;
        let byte = |index: usize| bytes.get(index).copied();
        let word = |index: usize| Some(u16::from_le_bytes([byte(index)?, byte(index + 1)?]));

        let decoded = match opcode {
            0x00 => (Nop, 1),
            0x76 => (Halt, 1),
            0x23 => (IncHl, 1),
            0x39 => (AddHlSp, 1),
            0x3A => (LdAFromAddr(word(1)?), 3),
            0x32 => (LdAddrFromA(word(1)?), 3),
            0x2A => (LdHlFromAddr(word(1)?), 3),
            0x22 => (LdAddrFromHl(word(1)?), 3),
            0xEB => (ExDeHl, 1),
            0xF9 => (LdSpHl, 1),
            0xC3 => (Jp(word(1)?), 3),
            0x18 => (Jr(byte(1)? as i8), 2),
            0xCD => (Call(word(1)?), 3),
            0xC9 => (Ret, 1),

            0x01 | 0x11 | 0x21 => (LdImm16(Reg16::from_code(opcode >> 4)?, word(1)?), 3),
            0x09 | 0x19 | 0x29 => (AddHl(Reg16::from_code(opcode >> 4)?), 1),
            0xC5 | 0xD5 | 0xE5 => (Push(Reg16::from_code(opcode >> 4)?), 1),
            0xC1 | 0xD1 | 0xE1 => (Pop(Reg16::from_code(opcode >> 4)?), 1),
            0xC2 | 0xCA | 0xD2 | 0xDA => (JpCond(Cond::from_code(opcode >> 3)?, word(1)?), 3),
            0x20 | 0x28 | 0x30 | 0x38 => (JrCond(Cond::from_code((opcode >> 3) - 4)?, byte(1)? as i8), 2),
            0xC0 | 0xC8 | 0xD0 | 0xD8 => (RetCond(Cond::from_code(opcode >> 3)?), 1),

            _ if opcode & 0xC7 == 0x06 => (LdImm8(Reg8::from_code(opcode >> 3)?, byte(1)?), 2),
            _ if opcode & 0xC7 == 0x04 => (IncReg(Reg8::from_code(opcode >> 3)?), 1),
            _ if opcode & 0xC7 == 0x05 => (DecReg(Reg8::from_code(opcode >> 3)?), 1),

            0x40..=0x7F => {
                let (dst, src) = (opcode >> 3 & 0x07, opcode & 0x07);
                let inst = match (dst, src) {
                    (6, _) => LdToHl(Reg8::from_code(src)?),
                    (_, 6) => LdFromHl(Reg8::from_code(dst)?),
                    _ => LdReg(Reg8::from_code(dst)?, Reg8::from_code(src)?),
                };

                (inst, 1)
            }

            0x80..=0xBF => (Alu(AluOp::from_code(opcode >> 3), Reg8::from_code(opcode)?), 1),
            _ if opcode & 0xC7 == 0xC6 => (AluImm(AluOp::from_code(opcode >> 3), byte(1)?), 2),
            _ if opcode & 0xC7 == 0xC7 => (Rst(opcode & 0x38), 1),

            0xCB => {
                let sub = byte(1)?;
                let reg = Reg8::from_code(sub)?;
                let inst = match sub >> 3 {
                    0x02 => Rl(reg),
                    0x03 => Rr(reg),
                    0x04 => Sla(reg),
                    0x07 => Srl(reg),
                    _ => return None,
                };

                (inst, 2)
            }

            0xED => match byte(1)? {
                0x52 => (SbcHlDe, 2),
                _ => return None,
            },

            0xDD => {
                let sub = byte(1)?;
                match sub {
                    0xE5 => (PushIx, 2),
                    0xE1 => (PopIx, 2),
                    0x39 => (AddIxSp, 2),
                    0xF9 => (LdSpIx, 2),
                    0x21 => (LdIxImm(word(2)?), 4),
                    _ if sub & 0xC7 == 0x46 && sub != 0x76 => {
                        (LdFromIx(Reg8::from_code(sub >> 3)?, byte(2)? as i8), 3)
                    }

                    0x70..=0x77 if sub != 0x76 => (LdToIx(Reg8::from_code(sub)?, byte(2)? as i8), 3),
                    _ => return None,
                }
            }

            _ => return None,
        };

        Some(decoded)
    }
}

impl Display for Reg8 {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reg8::A => "a",
            Reg8::B => "b",
            Reg8::C => "c",
            Reg8::D => "d",
            Reg8::E => "e",
            Reg8::H => "h",
            Reg8::L => "l",
        };

        fmt.write_str(name)
    }
}

impl Display for Reg16 {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reg16::BC => "bc",
            Reg16::DE => "de",
            Reg16::HL => "hl",
        };

        fmt.write_str(name)
    }
}

impl Display for Cond {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cond::Z => "z",
            Cond::NZ => "nz",
            Cond::C => "c",
            Cond::NC => "nc",
        };

        fmt.write_str(name)
    }
}

impl Display for Inst {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Inst::*;

        let alu = |op: AluOp| match op {
            AluOp::Add => "add a,",
            AluOp::Adc => "adc a,",
            AluOp::Sub => "sub ",
            AluOp::Sbc => "sbc a,",
            AluOp::And => "and ",
            AluOp::Xor => "xor ",
            AluOp::Or => "or ",
            AluOp::Cp => "cp ",
        };

        match *self {
            Nop => write!(fmt, "nop"),
            Halt => write!(fmt, "halt"),
            LdImm8(r, n) => write!(fmt, "{:8}{},{:#04x}", "ld", r, n),
            LdImm16(rr, nn) => write!(fmt, "{:8}{},{:#06x}", "ld", rr, nn),
            LdReg(d, s) => write!(fmt, "{:8}{},{}", "ld", d, s),
            LdFromHl(r) => write!(fmt, "{:8}{},(hl)", "ld", r),
            LdToHl(r) => write!(fmt, "{:8}(hl),{}", "ld", r),
            LdAFromAddr(nn) => write!(fmt, "{:8}a,({:#06x})", "ld", nn),
            LdAddrFromA(nn) => write!(fmt, "{:8}({:#06x}),a", "ld", nn),
            LdHlFromAddr(nn) => write!(fmt, "{:8}hl,({:#06x})", "ld", nn),
            LdAddrFromHl(nn) => write!(fmt, "{:8}({:#06x}),hl", "ld", nn),
            LdFromIx(r, d) => write!(fmt, "{:8}{},(ix{:+})", "ld", r, d),
            LdToIx(r, d) => write!(fmt, "{:8}(ix{:+}),{}", "ld", d, r),
            LdIxImm(nn) => write!(fmt, "{:8}ix,{:#06x}", "ld", nn),
            LdSpHl => write!(fmt, "{:8}sp,hl", "ld"),
            LdSpIx => write!(fmt, "{:8}sp,ix", "ld"),
            AddIxSp => write!(fmt, "{:8}ix,sp", "add"),
            PushIx => write!(fmt, "{:8}ix", "push"),
            PopIx => write!(fmt, "{:8}ix", "pop"),
            Push(rr) => write!(fmt, "{:8}{}", "push", rr),
            Pop(rr) => write!(fmt, "{:8}{}", "pop", rr),
            AddHl(rr) => write!(fmt, "{:8}hl,{}", "add", rr),
            AddHlSp => write!(fmt, "{:8}hl,sp", "add"),
            SbcHlDe => write!(fmt, "{:8}hl,de", "sbc"),
            IncHl => write!(fmt, "{:8}hl", "inc"),
            IncReg(r) => write!(fmt, "{:8}{}", "inc", r),
            DecReg(r) => write!(fmt, "{:8}{}", "dec", r),
            ExDeHl => write!(fmt, "{:8}de,hl", "ex"),
            Alu(op, r) => {
                let (mnemonic, operand) = alu(op).split_at(3);
                write!(fmt, "{:8}{}{}", mnemonic, operand.trim_start(), r)
            }

            AluImm(op, n) => {
                let (mnemonic, operand) = alu(op).split_at(3);
                write!(fmt, "{:8}{}{:#04x}", mnemonic, operand.trim_start(), n)
            }

            Rl(r) => write!(fmt, "{:8}{}", "rl", r),
            Rr(r) => write!(fmt, "{:8}{}", "rr", r),
            Sla(r) => write!(fmt, "{:8}{}", "sla", r),
            Srl(r) => write!(fmt, "{:8}{}", "srl", r),
            Jp(nn) => write!(fmt, "{:8}{:#06x}", "jp", nn),
            JpCond(cc, nn) => write!(fmt, "{:8}{},{:#06x}", "jp", cc, nn),
            Jr(e) => write!(fmt, "{:8}{:+}", "jr", e),
            JrCond(cc, e) => write!(fmt, "{:8}{},{:+}", "jr", cc, e),
            Call(nn) => write!(fmt, "{:8}{:#06x}", "call", nn),
            Ret => write!(fmt, "ret"),
            RetCond(cc) => write!(fmt, "{:8}{}", "ret", cc),
            Rst(vector) => write!(fmt, "{:8}{:#04x}", "rst", vector),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! test_inst {
        ($name:ident: $inst:expr => [$($byte:expr),*]) => {
            #[test]
            fn $name() {
                let mut bytes = Vec::new();
                $inst.encode(&mut bytes);

                let expected: &[u8] = &[$($byte),*];
                assert_eq!(bytes, expected);
                assert_eq!(Inst::decode(&bytes), Some(($inst, expected.len())));
            }
        };
    }

    test_inst!(jump: Inst::Jp(0x1234) => [0xC3, 0x34, 0x12]);
    test_inst!(jump_zero: Inst::JpCond(Cond::Z, 0x1003) => [0xCA, 0x03, 0x10]);
    test_inst!(jump_not_zero: Inst::JpCond(Cond::NZ, 0x2000) => [0xC2, 0x00, 0x20]);
    test_inst!(jump_carry: Inst::JpCond(Cond::C, 0x1000) => [0xDA, 0x00, 0x10]);
    test_inst!(relative_no_carry: Inst::JrCond(Cond::NC, 1) => [0x30, 0x01]);
    test_inst!(relative_back: Inst::Jr(-14) => [0x18, 0xF2]);
    test_inst!(call: Inst::Call(0x1010) => [0xCD, 0x10, 0x10]);
    test_inst!(push_ix: Inst::PushIx => [0xDD, 0xE5]);
    test_inst!(frame_load: Inst::LdFromIx(Reg8::A, -1) => [0xDD, 0x7E, 0xFF]);
    test_inst!(frame_store: Inst::LdToIx(Reg8::H, 5) => [0xDD, 0x74, 0x05]);
    test_inst!(load_ix: Inst::LdIxImm(0) => [0xDD, 0x21, 0x00, 0x00]);
    test_inst!(load_pair: Inst::LdImm16(Reg16::DE, 0x0102) => [0x11, 0x02, 0x01]);
    test_inst!(load_indirect: Inst::LdFromHl(Reg8::E) => [0x5E]);
    test_inst!(store_indirect: Inst::LdToHl(Reg8::D) => [0x72]);
    test_inst!(move_reg: Inst::LdReg(Reg8::A, Reg8::L) => [0x7D]);
    test_inst!(compare: Inst::Alu(AluOp::Cp, Reg8::E) => [0xBB]);
    test_inst!(clear_carry: Inst::Alu(AluOp::Or, Reg8::A) => [0xB7]);
    test_inst!(subtract_pair: Inst::SbcHlDe => [0xED, 0x52]);
    test_inst!(shift_right: Inst::Srl(Reg8::H) => [0xCB, 0x3C]);
    test_inst!(rotate_right: Inst::Rr(Reg8::L) => [0xCB, 0x1D]);
    test_inst!(service: Inst::Rst(0x08) => [0xCF]);
    test_inst!(trap: Inst::Rst(0x38) => [0xFF]);
    test_inst!(return_carry: Inst::RetCond(Cond::C) => [0xD8]);
    test_inst!(decrement: Inst::DecReg(Reg8::A) => [0x3D]);

    #[test]
    fn unknown_opcodes_are_rejected() {
        assert_eq!(Inst::decode(&[0xDD, 0x7E]), None);
        assert_eq!(Inst::decode(&[0x36, 0x00]), None);
        assert_eq!(Inst::decode(&[0xED, 0xB0]), None);
        assert_eq!(Inst::decode(&[]), None);
    }

    #[test]
    fn condition_negation() {
        for cond in [Cond::Z, Cond::NZ, Cond::C, Cond::NC] {
            assert_ne!(cond.negate(), cond);
            assert_eq!(cond.negate().negate(), cond);
        }
    }

    #[test]
    fn listing_text() {
        assert_eq!(Inst::LdFromIx(Reg8::A, -3).to_string(), "ld      a,(ix-3)");
        assert_eq!(Inst::Alu(AluOp::Add, Reg8::E).to_string(), "add     a,e");
        assert_eq!(Inst::Alu(AluOp::Cp, Reg8::E).to_string(), "cp      e");
    }
}
