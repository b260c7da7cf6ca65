//! Simulador del subconjunto Z80 que emite el generador.
//!
//! Carga una imagen en [`IMAGE_BASE`], prepara la pila con la dirección
//! de retorno ficticia y ejecuta hasta que `main` retorna, el programa
//! invoca el servicio `exit`, se dispara la trampa de rango o se agota
//! el límite de pasos. Los servicios `RST` se atienden aquí mismo en
//! lugar de saltar a memoria baja.

use std::collections::VecDeque;

use log::{debug, trace};
use thiserror::Error;

use crate::arch::{
    service, AluOp, Cond, Inst, Reg16, Reg8, EXIT_ADDRESS, IMAGE_BASE, STACK_TOP,
};

const MEMORY_SIZE: usize = 0x10000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SimError {
    #[error("Unknown opcode {opcode:#04x} at {address:#06x}")]
    BadOpcode { opcode: u8, address: u16 },

    #[error("Step limit of {0} exceeded")]
    StepLimit(u64),

    #[error("Image of {0} bytes does not fit in memory")]
    ImageTooLarge(usize),
}

/// Motivo por el cual terminó la ejecución.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Exit {
    /// `main` retornó; se conservan ambos registros de resultado.
    Returned { a: u8, hl: u16 },

    /// Se ejecutó `HALT`.
    Halted,

    /// El programa llamó a `exit`.
    Exited(u8),

    /// Un índice fuera de rango alcanzó la trampa.
    BoundsTrap { address: u16 },
}

pub struct Machine {
    memory: Vec<u8>,
    a: u8,
    b: u8,
    c: u8,
    d: u8,
    e: u8,
    h: u8,
    l: u8,
    ix: u16,
    sp: u16,
    pc: u16,
    zero: bool,
    carry: bool,
    input: VecDeque<u8>,
    output: Vec<u8>,
    steps: u64,
}

impl Machine {
    pub fn new(image: &[u8]) -> Result<Self, SimError> {
        let base = IMAGE_BASE as usize;
        if base + image.len() > MEMORY_SIZE {
            return Err(SimError::ImageTooLarge(image.len()));
        }

        let mut memory = vec![0; MEMORY_SIZE];
        memory[base..base + image.len()].copy_from_slice(image);

        let mut machine = Machine {
            memory,
            a: 0,
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            h: 0,
            l: 0,
            ix: 0,
            sp: STACK_TOP,
            pc: IMAGE_BASE,
            zero: false,
            carry: false,
            input: VecDeque::new(),
            output: Vec::new(),
            steps: 0,
        };

        machine.push(EXIT_ADDRESS);
        Ok(machine)
    }

    /// Bytes que leerá el servicio `getc`. Al agotarse, `getc` entrega 0.
    pub fn with_input(mut self, input: &[u8]) -> Self {
        self.input.extend(input);
        self
    }

    /// Bytes escritos mediante `putc`.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn read_byte(&self, address: u16) -> u8 {
        self.memory[address as usize]
    }

    pub fn read_word(&self, address: u16) -> u16 {
        u16::from_le_bytes([self.read_byte(address), self.read_byte(address.wrapping_add(1))])
    }

    /// Ejecuta hasta terminar o hasta completar `max_steps` instrucciones.
    pub fn run(&mut self, max_steps: u64) -> Result<Exit, SimError> {
        while self.steps < max_steps {
            if let Some(exit) = self.step()? {
                debug!("Program finished after {} step(s): {:?}", self.steps, exit);
                return Ok(exit);
            }
        }

        Err(SimError::StepLimit(max_steps))
    }

    /// Ejecuta una instrucción.
    pub fn step(&mut self) -> Result<Option<Exit>, SimError> {
        if self.pc == EXIT_ADDRESS {
            let hl = self.pair(Reg16::HL);
            return Ok(Some(Exit::Returned { a: self.a, hl }));
        }

        let address = self.pc;
        let (inst, size) =
            Inst::decode(&self.memory[address as usize..]).ok_or(SimError::BadOpcode {
                opcode: self.read_byte(address),
                address,
            })?;

        trace!("{:#06x}: {}", address, inst);

        self.steps += 1;
        self.pc = address.wrapping_add(size as u16);
        self.execute(inst, address)
    }

    fn execute(&mut self, inst: Inst, address: u16) -> Result<Option<Exit>, SimError> {
        use Inst::*;

        match inst {
            Nop => (),
            Halt => return Ok(Some(Exit::Halted)),

            LdImm8(r, n) => self.set_reg(r, n),
            LdImm16(rr, nn) => self.set_pair(rr, nn),
            LdReg(dst, src) => self.set_reg(dst, self.reg(src)),
            LdFromHl(r) => self.set_reg(r, self.read_byte(self.pair(Reg16::HL))),
            LdToHl(r) => self.write_byte(self.pair(Reg16::HL), self.reg(r)),
            LdAFromAddr(nn) => self.a = self.read_byte(nn),
            LdAddrFromA(nn) => self.write_byte(nn, self.a),
            LdHlFromAddr(nn) => self.set_pair(Reg16::HL, self.read_word(nn)),
            LdAddrFromHl(nn) => self.write_word(nn, self.pair(Reg16::HL)),
            LdFromIx(r, d) => self.set_reg(r, self.read_byte(self.indexed(d))),
            LdToIx(r, d) => self.write_byte(self.indexed(d), self.reg(r)),
            LdIxImm(nn) => self.ix = nn,
            LdSpHl => self.sp = self.pair(Reg16::HL),
            LdSpIx => self.sp = self.ix,

            AddIxSp => {
                let (sum, carry) = self.ix.overflowing_add(self.sp);
                self.ix = sum;
                self.carry = carry;
            }

            PushIx => self.push(self.ix),
            PopIx => self.ix = self.pop(),
            Push(rr) => self.push(self.pair(rr)),
            Pop(rr) => {
                let value = self.pop();
                self.set_pair(rr, value);
            }

            AddHl(rr) => self.add_hl(self.pair(rr)),
            AddHlSp => self.add_hl(self.sp),

            SbcHlDe => {
                let hl = self.pair(Reg16::HL) as u32;
                let subtrahend = self.pair(Reg16::DE) as u32 + self.carry as u32;
                let result = hl.wrapping_sub(subtrahend) as u16;

                self.carry = subtrahend > hl;
                self.zero = result == 0;
                self.set_pair(Reg16::HL, result);
            }

            IncHl => self.set_pair(Reg16::HL, self.pair(Reg16::HL).wrapping_add(1)),
            IncReg(r) => {
                let value = self.reg(r).wrapping_add(1);
                self.zero = value == 0;
                self.set_reg(r, value);
            }

            DecReg(r) => {
                let value = self.reg(r).wrapping_sub(1);
                self.zero = value == 0;
                self.set_reg(r, value);
            }

            ExDeHl => {
                let (de, hl) = (self.pair(Reg16::DE), self.pair(Reg16::HL));
                self.set_pair(Reg16::DE, hl);
                self.set_pair(Reg16::HL, de);
            }

            Alu(op, r) => self.alu(op, self.reg(r)),
            AluImm(op, n) => self.alu(op, n),

            Rl(r) => self.rotate(r, |value, carry| (value << 1 | carry as u8, value & 0x80 != 0)),
            Rr(r) => self.rotate(r, |value, carry| (value >> 1 | (carry as u8) << 7, value & 1 != 0)),
            Sla(r) => self.rotate(r, |value, _| (value << 1, value & 0x80 != 0)),
            Srl(r) => self.rotate(r, |value, _| (value >> 1, value & 1 != 0)),

            Jp(nn) => self.pc = nn,
            JpCond(cond, nn) => {
                if self.test(cond) {
                    self.pc = nn;
                }
            }

            Jr(e) => self.pc = self.pc.wrapping_add(e as i16 as u16),
            JrCond(cond, e) => {
                if self.test(cond) {
                    self.pc = self.pc.wrapping_add(e as i16 as u16);
                }
            }

            Call(nn) => {
                self.push(self.pc);
                self.pc = nn;
            }

            Ret => self.pc = self.pop(),
            RetCond(cond) => {
                if self.test(cond) {
                    self.pc = self.pop();
                }
            }

            Rst(vector) => return self.service(vector, address),
        }

        Ok(None)
    }

    fn service(&mut self, vector: u8, address: u16) -> Result<Option<Exit>, SimError> {
        match vector {
            service::PUTC => self.output.push(self.a),
            service::GETC => {
                self.a = self.input.pop_front().unwrap_or(0);
                self.set_pair(Reg16::HL, self.a as u16);
            }

            service::EXIT => return Ok(Some(Exit::Exited(self.a))),
            service::BOUNDS_TRAP => return Ok(Some(Exit::BoundsTrap { address })),

            _ => {
                return Err(SimError::BadOpcode {
                    opcode: self.read_byte(address),
                    address,
                })
            }
        }

        Ok(None)
    }

    fn alu(&mut self, op: AluOp, value: u8) {
        let a = self.a;
        let carry_in = self.carry as u8;

        let (result, carry) = match op {
            AluOp::Add => overflowing(a as u16 + value as u16),
            AluOp::Adc => overflowing(a as u16 + value as u16 + carry_in as u16),
            AluOp::Sub | AluOp::Cp => (a.wrapping_sub(value), value > a),
            AluOp::Sbc => {
                let subtrahend = value as u16 + carry_in as u16;
                (a.wrapping_sub(subtrahend as u8), subtrahend > a as u16)
            }

            AluOp::And => (a & value, false),
            AluOp::Xor => (a ^ value, false),
            AluOp::Or => (a | value, false),
        };

        self.zero = result == 0;
        self.carry = carry;

        if op != AluOp::Cp {
            self.a = result;
        }
    }

    fn rotate<F>(&mut self, r: Reg8, f: F)
    where
        F: FnOnce(u8, bool) -> (u8, bool),
    {
        let (value, carry) = f(self.reg(r), self.carry);
        self.zero = value == 0;
        self.carry = carry;
        self.set_reg(r, value);
    }

    fn add_hl(&mut self, value: u16) {
        let (sum, carry) = self.pair(Reg16::HL).overflowing_add(value);
        self.carry = carry;
        self.set_pair(Reg16::HL, sum);
    }

    fn test(&self, cond: Cond) -> bool {
        match cond {
            Cond::Z => self.zero,
            Cond::NZ => !self.zero,
            Cond::C => self.carry,
            Cond::NC => !self.carry,
        }
    }

    fn indexed(&self, displacement: i8) -> u16 {
        self.ix.wrapping_add(displacement as i16 as u16)
    }

    fn reg(&self, r: Reg8) -> u8 {
        match r {
            Reg8::A => self.a,
            Reg8::B => self.b,
            Reg8::C => self.c,
            Reg8::D => self.d,
            Reg8::E => self.e,
            Reg8::H => self.h,
            Reg8::L => self.l,
        }
    }

    fn set_reg(&mut self, r: Reg8, value: u8) {
        let reg = match r {
            Reg8::A => &mut self.a,
            Reg8::B => &mut self.b,
            Reg8::C => &mut self.c,
            Reg8::D => &mut self.d,
            Reg8::E => &mut self.e,
            Reg8::H => &mut self.h,
            Reg8::L => &mut self.l,
        };

        *reg = value;
    }

    fn pair(&self, rr: Reg16) -> u16 {
        let (high, low) = match rr {
            Reg16::BC => (self.b, self.c),
            Reg16::DE => (self.d, self.e),
            Reg16::HL => (self.h, self.l),
        };

        u16::from_be_bytes([high, low])
    }

    fn set_pair(&mut self, rr: Reg16, value: u16) {
        let [high, low] = value.to_be_bytes();
        let (h, l) = match rr {
            Reg16::BC => (Reg8::B, Reg8::C),
            Reg16::DE => (Reg8::D, Reg8::E),
            Reg16::HL => (Reg8::H, Reg8::L),
        };

        self.set_reg(h, high);
        self.set_reg(l, low);
    }

    fn write_byte(&mut self, address: u16, value: u8) {
        self.memory[address as usize] = value;
    }

    fn write_word(&mut self, address: u16, value: u16) {
        let [low, high] = value.to_le_bytes();
        self.write_byte(address, low);
        self.write_byte(address.wrapping_add(1), high);
    }

    fn push(&mut self, value: u16) {
        self.sp = self.sp.wrapping_sub(2);
        self.write_word(self.sp, value);
    }

    fn pop(&mut self) -> u16 {
        let value = self.read_word(self.sp);
        self.sp = self.sp.wrapping_add(2);
        value
    }
}

fn overflowing(sum: u16) -> (u8, bool) {
    (sum as u8, sum > 0xFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Inst::*, Reg16::*, Reg8::*};

    fn assemble(program: &[Inst]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for inst in program {
            inst.encode(&mut bytes);
        }

        bytes
    }

    fn run(program: &[Inst]) -> (Exit, Machine) {
        let mut machine = Machine::new(&assemble(program)).unwrap();
        let exit = machine.run(1_000).unwrap();
        (exit, machine)
    }

    #[test]
    fn services() {
        let (exit, machine) = run(&[
            LdImm8(A, b'o'),
            Rst(service::PUTC),
            LdImm8(A, b'k'),
            Rst(service::PUTC),
            LdImm8(A, 3),
            Rst(service::EXIT),
        ]);

        assert_eq!(exit, Exit::Exited(3));
        assert_eq!(machine.output(), b"ok");
    }

    #[test]
    fn returning_from_entry() {
        let (exit, _) = run(&[LdImm16(HL, 0x1234), LdImm8(A, 7), Ret]);
        assert_eq!(exit, Exit::Returned { a: 7, hl: 0x1234 });
    }

    #[test]
    fn flags_and_relative_jumps() {
        // Suma 5 + 4 + 3 + 2 + 1 con un ciclo sobre B
        let (exit, _) = run(&[
            LdImm8(A, 0),
            LdImm8(B, 5),
            Alu(AluOp::Add, B),
            DecReg(B),
            JrCond(Cond::NZ, -4),
            LdReg(L, A),
            LdImm8(H, 0),
            Ret,
        ]);

        assert_eq!(exit, Exit::Returned { a: 15, hl: 15 });
    }

    #[test]
    fn subtract_with_borrow() {
        let (exit, _) = run(&[
            LdImm16(HL, 3),
            LdImm16(DE, 5),
            Alu(AluOp::Or, A),
            SbcHlDe,
            RetCond(Cond::NC),
            Halt,
        ]);

        assert_eq!(exit, Exit::Halted);
    }

    #[test]
    fn frame_addressing() {
        let (exit, machine) = run(&[
            PushIx,
            LdIxImm(0),
            AddIxSp,
            LdImm8(A, 0x5A),
            LdToIx(A, -1),
            LdFromIx(L, -1),
            LdImm8(H, 0),
            LdSpIx,
            PopIx,
            Ret,
        ]);

        assert_eq!(exit, Exit::Returned { a: 0x5A, hl: 0x5A });
        assert_eq!(machine.read_byte(STACK_TOP - 2 - 2 - 1), 0x5A);
    }

    #[test]
    fn bad_opcodes_and_step_limit() {
        let mut machine = Machine::new(&[0xED, 0x00]).unwrap();
        assert_eq!(
            machine.run(10),
            Err(SimError::BadOpcode {
                opcode: 0xED,
                address: IMAGE_BASE
            })
        );

        let mut machine = Machine::new(&assemble(&[Jr(-2)])).unwrap();
        assert_eq!(machine.run(50), Err(SimError::StepLimit(50)));
        assert_eq!(machine.steps(), 50);
    }
}
