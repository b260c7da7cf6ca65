//! Destino de los bytes emitidos.
//!
//! El generador escribe código en orden, pero el motor de
//! relocalización regresa a parchar direcciones ya emitidas. Por eso
//! un [`Sink`] acepta escrituras en desplazamientos arbitrarios.

use std::io;

/// Destino de escritura aleatoria.
pub trait Sink {
    /// Escribe `bytes` a partir de `offset`, extendiendo la salida si
    /// hace falta. Retorna la cantidad de bytes escritos.
    fn write(&mut self, offset: u16, bytes: &[u8]) -> io::Result<usize>;
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn write(&mut self, offset: u16, bytes: &[u8]) -> io::Result<usize> {
        (**self).write(offset, bytes)
    }
}

/// Imagen en memoria.
#[derive(Default, Clone)]
pub struct Image {
    bytes: Vec<u8>,
}

impl Image {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Sink for Image {
    fn write(&mut self, offset: u16, bytes: &[u8]) -> io::Result<usize> {
        let start = offset as usize;
        let end = start + bytes.len();

        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }

        self.bytes[start..end].copy_from_slice(bytes);
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_grows_and_patches() {
        let mut image = Image::new();

        image.write(0, &[0xC3, 0x00, 0x00]).unwrap();
        image.write(5, &[0xC9]).unwrap();
        assert_eq!(image.bytes(), &[0xC3, 0x00, 0x00, 0x00, 0x00, 0xC9]);

        image.write(1, &[0x34, 0x12]).unwrap();
        assert_eq!(image.bytes(), &[0xC3, 0x34, 0x12, 0x00, 0x00, 0xC9]);
    }
}
