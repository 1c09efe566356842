use crate::error::ReadAloudError;

/// Where the text to speak comes from.
pub trait TextSource: Send + Sync {
    fn read_text(&self) -> Result<String, ReadAloudError>;
}

/// The system clipboard. A fresh handle is opened per read.
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl TextSource for SystemClipboard {
    fn read_text(&self) -> Result<String, ReadAloudError> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| ReadAloudError::Clipboard(e.to_string()))?;
        match clipboard.get_text() {
            Ok(text) => Ok(text),
            Err(arboard::Error::ContentNotAvailable) => Err(ReadAloudError::EmptyInput),
            Err(e) => Err(ReadAloudError::Clipboard(e.to_string())),
        }
    }
}
