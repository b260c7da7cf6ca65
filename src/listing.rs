//! Artefactos auxiliares de la compilación.
//!
//! Además de la imagen binaria, el compilador puede producir un mapa de
//! líneas (qué dirección corresponde a cada línea fuente) y un listado
//! desensamblado de la imagen.

use bitflags::bitflags;
use std::io::{self, Write};

use crate::{
    arch::{Inst, IMAGE_BASE},
    codegen::LineAddress,
};

bitflags! {
    /// Artefactos a emitir junto con la imagen.
    pub struct EmitOptions: u32 {
        /// Mapa de líneas fuente a direcciones.
        const LINE_MAP = 0x01;

        /// Listado desensamblado.
        const LISTING = 0x02;
    }
}

/// Escribe una entrada `línea dirección` por renglón.
pub fn write_line_map<W: Write>(lines: &[LineAddress], output: &mut W) -> io::Result<()> {
    for entry in lines {
        writeln!(output, "{}\t{:04x}", entry.line, entry.address)?;
    }

    Ok(())
}

/// Desensambla una imagen completa.
///
/// Los datos de variables globales se intercalan con el código y se
/// desensamblan igual que este; un byte que no decodifica se muestra
/// como `db`. Las direcciones que inician una línea fuente se anotan.
pub fn write_listing<W: Write>(image: &[u8], lines: &[LineAddress], output: &mut W) -> io::Result<()> {
    let mut offset = 0;
    let mut marks = lines.iter().peekable();

    while offset < image.len() {
        let address = IMAGE_BASE + offset as u16;
        while let Some(mark) = marks.next_if(|mark| mark.address <= address) {
            writeln!(output, "; line {}", mark.line)?;
        }

        let (text, size) = match Inst::decode(&image[offset..]) {
            Some((inst, size)) => (inst.to_string(), size),
            None => (format!("db {:#04x}", image[offset]), 1),
        };

        let bytes: Vec<String> = image[offset..offset + size]
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect();

        writeln!(output, "{:04x}\t{:12}\t{}", address, bytes.join(" "), text)?;
        offset += size;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_map_format() {
        let lines = [
            LineAddress {
                line: 1,
                address: 0x1003,
            },
            LineAddress {
                line: 4,
                address: 0x1010,
            },
        ];

        let mut output = Vec::new();
        write_line_map(&lines, &mut output).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "1\t1003\n4\t1010\n");
    }

    #[test]
    fn listing_decodes_and_falls_back() {
        let image = [0xC3, 0x04, 0x10, 0xED, 0xC9];
        let lines = [LineAddress {
            line: 2,
            address: 0x1004,
        }];

        let mut output = Vec::new();
        write_listing(&image, &lines, &mut output).unwrap();

        let text = String::from_utf8(output).unwrap();
        let rows: Vec<&str> = text.lines().collect();

        assert_eq!(rows.len(), 4);
        assert!(rows[0].starts_with("1000\tc3 04 10"));
        assert!(rows[1].contains("db 0xed"));
        assert_eq!(rows[2], "; line 2");
        assert!(rows[3].starts_with("1004\tc9"));
    }
}
