//! Lecture octet par octet de la structure JSON englobante
//!
//! Seuls les délimiteurs de premier niveau sont lus ici ; les valeurs
//! (clés, features, membres ignorés) sont décodées par serde_json
//! directement depuis le même lecteur.

use std::io::{self, BufRead, Read};

/// Lecteur qui compte les octets consommés
pub(crate) struct Tracked<R> {
    inner: R,
    offset: u64,
}

impl<R> Tracked<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Nombre d'octets consommés depuis le début du flux
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }
}

impl<R: Read> Read for Tracked<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for Tracked<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.offset += amt as u64;
        self.inner.consume(amt);
    }
}

fn is_json_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_number_byte(b: u8) -> bool {
    matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
}

/// Saute les espaces et retourne le prochain octet sans le consommer
pub(crate) fn peek_token<R: BufRead>(reader: &mut R) -> io::Result<Option<u8>> {
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(None);
        }
        match buf.iter().position(|&b| !is_json_whitespace(b)) {
            Some(pos) => {
                let b = buf[pos];
                reader.consume(pos);
                return Ok(Some(b));
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

/// Saute un BOM UTF-8 en tête de flux
pub(crate) fn skip_bom<R: BufRead>(reader: &mut R) -> io::Result<()> {
    let buf = reader.fill_buf()?;
    if buf.starts_with(&[0xEF, 0xBB, 0xBF]) {
        reader.consume(3);
    }
    Ok(())
}

/// Consomme un nombre JSON de premier niveau et retourne ses octets
///
/// serde_json garde un octet d'avance après un nombre, qui serait perdu
/// à la destruction du désérialiseur : les nombres sont donc lus ici.
pub(crate) fn take_number<R: BufRead>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(out);
        }
        let len = buf.iter().take_while(|&&b| is_number_byte(b)).count();
        out.extend_from_slice(&buf[..len]);
        let exhausted = len == buf.len();
        reader.consume(len);
        if !exhausted {
            return Ok(out);
        }
    }
}
