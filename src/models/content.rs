//! Content handles passed through the processor chain, and the type tags
//! guessed for them.

use std::{
    fmt,
    io::{self, Cursor, SeekFrom},
    path::Path,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, ReadBuf},
};

/// Extensions that denote a transfer encoding rather than a content type.
/// `page.html.gz` is `text/html` encoded with `gzip`.
const ENCODING_SUFFIXES: [(&str, &str); 5] = [
    ("gz", "gzip"),
    ("Z", "compress"),
    ("bz2", "bzip2"),
    ("xz", "xz"),
    ("br", "br"),
];

/// MIME type and optional content encoding guessed from a file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentTypeInfo {
    pub mime_type: Option<String>,
    pub encoding: Option<String>,
}

impl ContentTypeInfo {
    /// Guess from the file name alone; the file is never opened.
    pub fn guess(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (typed_name, encoding) = match name.rsplit_once('.') {
            Some((stem, ext)) => match ENCODING_SUFFIXES.iter().find(|(suffix, _)| *suffix == ext) {
                Some((_, encoding)) => (stem.to_string(), Some((*encoding).to_string())),
                None => (name.clone(), None),
            },
            None => (name.clone(), None),
        };

        let mime_type = mime_guess::from_path(&typed_name)
            .first()
            .map(|mime| mime.essence_str().to_string());

        Self {
            mime_type,
            encoding,
        }
    }

    /// True for markup types (`text/html`, `application/xhtml+xml`).
    pub fn is_html(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|mime| mime.contains("html"))
    }
}

/// Anything a processor may hand back as content.
pub trait ContentSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> ContentSource for T {}

/// Owned, seekable byte stream moving through the processor chain.
///
/// Ownership is handed from processor to processor and finally to the blob
/// store. Dropping the handle closes the underlying file, so every exit
/// path of the chain releases it.
pub struct Content {
    inner: Box<dyn ContentSource>,
}

impl Content {
    pub fn new(source: impl ContentSource + 'static) -> Self {
        Self {
            inner: Box::new(source),
        }
    }

    /// Open a local file for reading.
    pub async fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(File::open(path).await?))
    }

    /// In-memory content, for processors that rewrite their input.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Cursor::new(bytes.into()))
    }

    pub async fn rewind(&mut self) -> io::Result<()> {
        self.seek(SeekFrom::Start(0)).await.map(|_| ())
    }

    /// Read the whole content and leave the cursor back at the start.
    pub async fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.rewind().await?;
        let mut buf = Vec::new();
        self.read_to_end(&mut buf).await?;
        self.rewind().await?;
        Ok(buf)
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content").finish_non_exhaustive()
    }
}

impl AsyncRead for Content {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_read(cx, buf)
    }
}

impl AsyncSeek for Content {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut *self.inner).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut *self.inner).poll_complete(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_type_from_extension() {
        let info = ContentTypeInfo::guess(Path::new("/site/index.html"));
        assert_eq!(info.mime_type.as_deref(), Some("text/html"));
        assert_eq!(info.encoding, None);
        assert!(info.is_html());

        let info = ContentTypeInfo::guess(Path::new("/site/img/a.png"));
        assert_eq!(info.mime_type.as_deref(), Some("image/png"));
        assert!(!info.is_html());
    }

    #[test]
    fn compression_suffix_becomes_encoding() {
        let info = ContentTypeInfo::guess(Path::new("/site/page.html.gz"));
        assert_eq!(info.mime_type.as_deref(), Some("text/html"));
        assert_eq!(info.encoding.as_deref(), Some("gzip"));
    }

    #[test]
    fn unknown_extension_has_no_type() {
        let info = ContentTypeInfo::guess(Path::new("/site/LICENSE"));
        assert_eq!(info, ContentTypeInfo::default());
        assert!(!info.is_html());
    }

    #[tokio::test]
    async fn read_all_leaves_cursor_at_start() {
        let mut content = Content::from_bytes(b"hello".to_vec());
        assert_eq!(content.read_all().await.unwrap(), b"hello");

        let mut again = Vec::new();
        content.read_to_end(&mut again).await.unwrap();
        assert_eq!(again, b"hello");
    }
}
