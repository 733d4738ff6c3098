use std::path::Path;

/// Finds the content type of an attachment
pub trait MimeLookup: Send + Sync {
    /// `None` means unknown, the part is then sent as `application/octet-stream`
    fn mime_type(&self, path: &Path) -> Option<String>;
}

impl<F> MimeLookup for F
where
    F: Fn(&Path) -> Option<String> + Send + Sync,
{
    fn mime_type(&self, path: &Path) -> Option<String> {
        self(path)
    }
}

/// Guesses the content type from the file extension
#[derive(Debug, Clone, Copy, Default)]
pub struct GuessMimeLookup;

impl MimeLookup for GuessMimeLookup {
    fn mime_type(&self, path: &Path) -> Option<String> {
        if !path.is_file() {
            return None;
        }
        Some(mime_guess::from_path(path).first_or_octet_stream().to_string())
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::{GuessMimeLookup, MimeLookup};

    #[test]
    fn guess_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("logo.png");
        let unknown = dir.path().join("data.unknownext");
        std::fs::write(&png, b"").unwrap();
        std::fs::write(&unknown, b"").unwrap();

        assert_eq!(GuessMimeLookup.mime_type(&png).as_deref(), Some("image/png"));
        assert_eq!(
            GuessMimeLookup.mime_type(&unknown).as_deref(),
            Some("application/octet-stream")
        );
        assert_eq!(GuessMimeLookup.mime_type(&dir.path().join("missing.png")), None);
    }

    #[test]
    fn closures_are_lookups() {
        let lookup = |path: &Path| path.extension().map(|_| "text/plain".to_owned());
        assert_eq!(
            lookup.mime_type(Path::new("a.txt")).as_deref(),
            Some("text/plain")
        );
        assert_eq!(lookup.mime_type(Path::new("a")), None);
    }
}
