//! Flavor-aware remote path handling.
//!
//! Remote paths cannot be `std::path::Path`: the daemon may run on a POSIX
//! host while managing Windows workers (or vice versa). A `RemotePath`
//! carries its separator flavor and renders either the shell form (native
//! separator) or the SFTP wire form (always forward slashes).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathFlavor {
    Posix,
    Windows,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    flavor: PathFlavor,
    /// Normalized with forward slashes, no trailing slash.
    raw: String,
}

impl RemotePath {
    pub fn new(flavor: PathFlavor, path: &str) -> Self {
        let mut raw = path.replace('\\', "/");
        while raw.len() > 1 && raw.ends_with('/') && !raw.ends_with(":/") {
            raw.pop();
        }
        Self { flavor, raw }
    }

    pub fn flavor(&self) -> PathFlavor {
        self.flavor
    }

    pub fn join(&self, part: &str) -> Self {
        let part = part.trim_matches('/');
        if self.raw.is_empty() {
            return Self::new(self.flavor, part);
        }
        Self::new(self.flavor, &format!("{}/{}", self.raw, part))
    }

    pub fn is_absolute(&self) -> bool {
        match self.flavor {
            PathFlavor::Posix => self.raw.starts_with('/'),
            PathFlavor::Windows => {
                let bytes = self.raw.as_bytes();
                self.raw.starts_with("//")
                    || (bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic())
            }
        }
    }

    /// Last path component.
    pub fn basename(&self) -> &str {
        self.raw.rsplit('/').next().unwrap_or(&self.raw)
    }

    /// Path in the platform's native separator, for shell commands.
    pub fn shell_form(&self) -> String {
        match self.flavor {
            PathFlavor::Posix => self.raw.clone(),
            PathFlavor::Windows => self.raw.replace('/', "\\"),
        }
    }

    /// Path in the SFTP wire form (forward slashes on every platform).
    pub fn sftp_form(&self) -> String {
        self.raw.clone()
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.shell_form())
    }
}

/// POSIX shell single-quoting.
pub fn sh_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:@%+".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// PowerShell single-quoting: embedded quotes are doubled.
pub fn powershell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
