//! Décodage incrémental d'une FeatureCollection
//!
//! Le document n'est jamais chargé en entier : la structure englobante est
//! parcourue octet par octet et chaque élément du tableau `features` est
//! désérialisé à son tour. La mémoire utilisée ne dépend que de la taille
//! d'une feature, pas du nombre de features.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::error::{Location, StreamError};
use crate::lexer::{self, Tracked};
use crate::types::RawFeature;

const READ_BUFFER_SIZE: usize = 64 * 1024; // 64KB

/// État du parcours de la structure englobante
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Avant le `{` d'ouverture
    Start,
    /// Dans l'objet racine, entre deux membres
    Members { first: bool },
    /// Dans le tableau `features`
    Features { first: bool },
    /// Fin du document atteinte, ou erreur déjà retournée
    Done,
}

/// Séquence paresseuse des features d'un document, dans l'ordre du fichier
///
/// Après une erreur, l'itérateur ne retourne plus rien. Pour relire la
/// source, il faut la rouvrir depuis le début.
pub struct FeatureStreamReader<R = BufReader<File>> {
    reader: Tracked<R>,
    state: State,
    features_read: usize,
}

impl FeatureStreamReader<BufReader<File>> {
    /// Ouvre un fichier GeoJSON en lecture streaming
    ///
    /// # Errors
    /// `StreamError::NotFound` si le fichier n'existe pas, `StreamError::Io`
    /// pour toute autre erreur d'ouverture.
    pub fn open(path: &Path) -> Result<Self, StreamError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StreamError::NotFound(path.to_path_buf()),
            _ => StreamError::Io(e),
        })?;

        debug!(path = %path.display(), "Opened feature collection");
        Ok(Self::from_reader(BufReader::with_capacity(
            READ_BUFFER_SIZE,
            file,
        )))
    }
}

impl<R: BufRead> FeatureStreamReader<R> {
    /// Lit depuis n'importe quelle source bufferisée
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader: Tracked::new(reader),
            state: State::Start,
            features_read: 0,
        }
    }

    /// Nombre de features retournées jusqu'ici
    pub fn features_read(&self) -> usize {
        self.features_read
    }

    /// Nombre d'octets consommés dans la source
    pub fn bytes_read(&self) -> u64 {
        self.reader.offset()
    }

    fn location(&self) -> Location {
        match self.state {
            State::Features { .. } => Location::Feature(self.features_read),
            _ => Location::Document,
        }
    }

    fn error(&self, reason: impl Into<String>) -> StreamError {
        StreamError::parse(self.location(), self.reader.offset(), reason)
    }

    fn peek(&mut self) -> Result<Option<u8>, StreamError> {
        Ok(lexer::peek_token(&mut self.reader)?)
    }

    /// Consomme le délimiteur attendu, ou échoue
    fn expect(&mut self, expected: u8, context: &str) -> Result<(), StreamError> {
        match self.peek()? {
            Some(b) if b == expected => {
                self.reader.consume(1);
                Ok(())
            }
            Some(b) => Err(self.error(format!(
                "expected `{}` {}, found `{}`",
                expected as char,
                context,
                describe(b)
            ))),
            None => Err(self.error(format!(
                "unexpected end of input, expected `{}` {}",
                expected as char, context
            ))),
        }
    }

    /// Désérialise une valeur depuis la position courante
    fn decode<T>(&mut self) -> Result<T, StreamError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let location = self.location();
        let result = {
            let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
            T::deserialize(&mut de)
        };
        result.map_err(|e| StreamError::from_json(e, location, self.reader.offset()))
    }

    /// Ignore un membre de premier niveau sans le matérialiser
    fn skip_value(&mut self) -> Result<(), StreamError> {
        match self.peek()? {
            Some(b'-' | b'0'..=b'9') => {
                let digits = lexer::take_number(&mut self.reader)?;
                serde_json::from_slice::<IgnoredAny>(&digits)
                    .map(|_| ())
                    .map_err(|e| self.error(format!("invalid number: {}", e)))
            }
            Some(_) => self.decode::<IgnoredAny>().map(|_| ()),
            None => Err(self.error("unexpected end of input, expected a value")),
        }
    }

    /// Vérifie qu'il ne reste que des espaces après l'objet racine
    fn expect_end(&mut self) -> Result<(), StreamError> {
        match self.peek()? {
            None => Ok(()),
            Some(b) => Err(self.error(format!(
                "trailing characters after document: `{}`",
                describe(b)
            ))),
        }
    }

    /// Avance jusqu'à la prochaine feature ou la fin du document
    fn advance(&mut self) -> Result<Option<RawFeature>, StreamError> {
        loop {
            match self.state {
                State::Done => return Ok(None),

                State::Start => {
                    lexer::skip_bom(&mut self.reader)?;
                    self.expect(b'{', "at start of feature collection")?;
                    self.state = State::Members { first: true };
                }

                State::Members { first } => {
                    if self.peek()? == Some(b'}') {
                        self.reader.consume(1);
                        self.expect_end()?;
                        self.state = State::Done;
                        debug!(
                            features = self.features_read,
                            bytes = self.reader.offset(),
                            "Reached end of feature collection"
                        );
                        return Ok(None);
                    }
                    if !first {
                        self.expect(b',', "between members")?;
                    }
                    if self.peek()? != Some(b'"') {
                        return Err(self.error("expected a member name"));
                    }
                    let key: String = self.decode()?;
                    self.expect(b':', "after member name")?;

                    if key == "features" {
                        self.expect(b'[', "to open the features array")?;
                        self.state = State::Features { first: true };
                    } else {
                        trace!(member = %key, "Skipping top-level member");
                        self.skip_value()?;
                        self.state = State::Members { first: false };
                    }
                }

                State::Features { first } => {
                    if self.peek()? == Some(b']') {
                        self.reader.consume(1);
                        self.state = State::Members { first: false };
                        continue;
                    }
                    if !first {
                        self.expect(b',', "between features")?;
                    }
                    let feature: RawFeature = self.decode()?;
                    self.state = State::Features { first: false };
                    return Ok(Some(feature));
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for FeatureStreamReader<R> {
    type Item = Result<RawFeature, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(feature)) => {
                self.features_read += 1;
                Some(Ok(feature))
            }
            Ok(None) => None,
            Err(e) => {
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}

impl<R: BufRead> std::iter::FusedIterator for FeatureStreamReader<R> {}

fn describe(b: u8) -> String {
    if b.is_ascii_graphic() {
        (b as char).to_string()
    } else {
        format!("\\x{:02x}", b)
    }
}
