//! Biblioteca de soporte.
//!
//! Rutinas que el código generado invoca y que el CPU no ofrece:
//! multiplicación de 16 bits, verificación de rango de índices y las
//! funciones de servicio del sistema (`putc`, `getc`, `exit`), que solo
//! trasladan su argumento desde la pila y ejecutan el `RST` apropiado.

use log::debug;

use super::{symbols::Prototype, Generation, Generator, Locate, RefKind};
use crate::{
    arch::{
        service, AluOp, Cond,
        Inst::{self, *},
        Reg16::*,
        Reg8::*,
    },
    ast::{Scalar, TypeDesc},
    sink::Sink,
};

/// `HL = HL * DE`, módulo 2^16. Preserva `BC`.
pub const MULTIPLY: &str = "__mul";

/// Retorna si `HL < DE` sin signo; de lo contrario ejecuta la trampa de rango.
pub const BOUNDS: &str = "__bounds";

/// Servicios del sistema: nombre, parámetros, retorno y vector.
///
/// Al retornar, `HL` conserva el argumento recibido.
const SERVICES: &[(&str, &[Scalar], Scalar, u8)] = &[
    ("putc", &[Scalar::Byte], Scalar::Word, service::PUTC),
    ("getc", &[], Scalar::Byte, service::GETC),
    ("exit", &[Scalar::Byte], Scalar::Word, service::EXIT),
];

impl<S: Sink> Generator<S> {
    /// Los servicios pueden llamarse sin declararlos.
    pub(super) fn register_services(&mut self) -> Generation<()> {
        for &(name, params, returns, _) in SERVICES {
            let name = self.names.intern(name);
            let prototype = Prototype {
                params: params.iter().copied().map(TypeDesc::scalar).collect(),
                returns,
                defined: true,
            };

            self.symbols
                .declare_prototype(name, prototype, &self.names)
                .at(&self.location)?;
        }

        Ok(())
    }

    pub(super) fn call_runtime(&mut self, routine: &str) -> Generation<()> {
        let name = self.names.intern(routine);
        self.emit_reference(Call(0), name, RefKind::Call)
    }

    /// Emite la biblioteca la primera vez que se solicita.
    pub(super) fn ensure_runtime(&mut self) -> Generation<()> {
        if self.runtime {
            return Ok(());
        }

        self.runtime = true;
        let start = self.cursor;

        let head = [Push(BC), LdReg(B, H), LdReg(C, L), LdImm16(HL, 0), LdImm8(A, 16)];
        let step = [
            Srl(B),
            Rr(C),
            JrCond(Cond::NC, AddHl(DE).size() as i8),
            AddHl(DE),
            Sla(E),
            Rl(D),
            DecReg(A),
        ];

        let step_size: u16 = step.iter().map(Inst::size).sum();
        let back = JrCond(Cond::NZ, -((step_size + 2) as i16) as i8);

        self.routine(MULTIPLY)?;
        for inst in head.into_iter().chain(step).chain([back, Pop(BC), Ret]) {
            self.emit(inst)?;
        }

        self.routine(BOUNDS)?;
        emit!(
            self,
            Push(HL),
            Alu(AluOp::Or, A),
            SbcHlDe,
            Pop(HL),
            RetCond(Cond::C),
            Rst(service::BOUNDS_TRAP),
        );

        for &(name, _, _, vector) in SERVICES {
            self.routine(name)?;
            emit!(
                self,
                LdImm16(HL, 2),
                AddHlSp,
                LdFromHl(A),
                IncHl,
                LdFromHl(H),
                LdReg(L, A),
                Rst(vector),
                Ret,
            );
        }

        debug!("Support library: {} byte(s) at offset {:#06x}", self.cursor - start, start);
        Ok(())
    }

    fn routine(&mut self, name: &str) -> Generation<()> {
        let name = self.names.intern(name);
        self.label(name)
    }
}
