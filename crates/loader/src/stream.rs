use std::io::{self, Read, Seek, SeekFrom};

/// Flux d'entrée séquentiel d'où proviennent les données du pack.
/// Chaque tâche fait un `seek_to` puis une ou plusieurs lectures contiguës ;
/// une lecture courte est une erreur.
pub trait InputStream {
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;

    /// Remplit `buf` entièrement.
    fn read_into(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

impl<T: Read + Seek> InputStream for T {
    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset)).map(|_| ())
    }

    fn read_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.read_exact(buf)
    }
}

/// Seek then read each part back to back.
pub(crate) fn read_parts(
    stream: &mut dyn InputStream,
    offset: u64,
    parts: &mut [&mut [u8]],
) -> io::Result<()> {
    stream.seek_to(offset)?;
    for part in parts.iter_mut() {
        stream.read_into(part)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_parts_in_order() {
        let mut stream = Cursor::new((0u8..32).collect::<Vec<_>>());
        let mut a = [0u8; 3];
        let mut b = [0u8; 4];
        read_parts(&mut stream, 10, &mut [&mut a, &mut b]).unwrap();
        assert_eq!(a, [10, 11, 12]);
        assert_eq!(b, [13, 14, 15, 16]);
    }

    #[test]
    fn short_read_is_an_error() {
        let mut stream = Cursor::new(vec![0u8; 8]);
        let mut buf = [0u8; 4];
        assert!(read_parts(&mut stream, 6, &mut [&mut buf]).is_err());
    }
}
