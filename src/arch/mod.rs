//! Arquitectura objetivo.
//!
//! El código generado corre sobre un CPU compatible con Z80, cargado
//! dentro del espacio de direcciones de un sistema anfitrión que
//! reserva la memoria baja para sí mismo.

pub mod z80;

pub use z80::{AluOp, Cond, Inst, Reg16, Reg8};

/// Dirección donde se carga el byte 0 de la imagen compilada.
pub const IMAGE_BASE: u16 = 0x1000;

/// Bytes reservados al inicio de la imagen para el salto de entrada.
pub const HEADER_SIZE: u16 = 3;

/// Tope de la pila al iniciar un programa.
pub const STACK_TOP: u16 = 0xFFFE;

/// Dirección de retorno ficticia de la función de entrada.
pub const EXIT_ADDRESS: u16 = 0x0000;

/// Vectores `RST` de servicios del sistema.
pub mod service {
    /// Escribe `A` en la consola.
    pub const PUTC: u8 = 0x08;

    /// Lee un byte de la consola hacia `A` y `HL`.
    pub const GETC: u8 = 0x10;

    /// Termina el programa con código `A`.
    pub const EXIT: u8 = 0x18;

    /// Acceso fuera de rango detectado en tiempo de ejecución.
    pub const BOUNDS_TRAP: u8 = 0x38;
}
