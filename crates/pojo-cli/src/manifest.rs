//! JAR manifest reading and writing
//!
//! Only the main section is interpreted. Per-entry sections are carried
//! through unchanged.

use anyhow::{bail, Context};

/// Location of the manifest inside an archive
pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// Longest line a manifest may contain, in bytes, without the line break
pub const MAX_LINE_BYTES: usize = 72;

/// A parsed manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    headers: Vec<(String, String)>,
    sections: Vec<String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            headers: vec![("Manifest-Version".to_string(), "1.0".to_string())],
            sections: Vec::new(),
        }
    }
}

impl Manifest {
    /// A manifest holding only `Manifest-Version: 1.0`
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse manifest bytes
    pub fn parse(bytes: &[u8]) -> anyhow::Result<Self> {
        let text = std::str::from_utf8(bytes).context("manifest is not valid UTF-8")?;
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut lines = text.lines().enumerate();

        for (number, line) in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            if let Some(continuation) = line.strip_prefix(' ') {
                match headers.last_mut() {
                    Some((_, value)) => value.push_str(continuation),
                    None => bail!("manifest line {}: continuation before any header", number + 1),
                }
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                bail!("manifest line {}: expected 'Name: value'", number + 1);
            };
            headers.push((
                name.trim().to_string(),
                value.strip_prefix(' ').unwrap_or(value).to_string(),
            ));
        }

        let mut sections: Vec<String> = lines.map(|(_, line)| line.to_string()).collect();
        while sections.last().map_or(false, |line| line.is_empty()) {
            sections.pop();
        }
        Ok(Self { headers, sections })
    }

    /// Value of a main-section header (names are case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a header, replacing an existing one in place
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    /// Main-section headers in order
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Serialize with CRLF line breaks, wrapping long lines
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for (name, value) in &self.headers {
            write_wrapped(&mut out, &format!("{}: {}", name, value));
        }
        out.push_str("\r\n");
        if !self.sections.is_empty() {
            for line in &self.sections {
                out.push_str(line);
                out.push_str("\r\n");
            }
            out.push_str("\r\n");
        }
        out.into_bytes()
    }
}

/// Append `line`, split into a first line of at most [`MAX_LINE_BYTES`]
/// bytes and continuation lines (a space, then the rest) of the same size,
/// never inside a UTF-8 sequence
fn write_wrapped(out: &mut String, line: &str) {
    let mut rest = line;
    let mut limit = MAX_LINE_BYTES;
    while rest.len() > limit {
        let mut split = limit;
        while !rest.is_char_boundary(split) {
            split -= 1;
        }
        out.push_str(&rest[..split]);
        out.push_str("\r\n ");
        rest = &rest[split..];
        limit = MAX_LINE_BYTES - 1;
    }
    out.push_str(rest);
    out.push_str("\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_continuations() {
        let manifest = Manifest::parse(
            b"Manifest-Version: 1.0\r\nBundle-SymbolicName: org.exa\r\n mple.hello\r\n\r\n",
        )
        .unwrap();
        assert_eq!(manifest.get("bundle-symbolicname"), Some("org.example.hello"));
        assert_eq!(manifest.get("Manifest-Version"), Some("1.0"));
        assert_eq!(manifest.get("Import-Package"), None);
    }

    #[test]
    fn test_long_values_wrap() {
        let mut manifest = Manifest::new();
        let value = "component { $className=org.example.Hello } ".repeat(10);
        manifest.set("iPOJO-Components", value.trim_end());

        let bytes = manifest.to_bytes();
        let text = String::from_utf8(bytes.clone()).unwrap();
        for line in text.split("\r\n") {
            assert!(line.len() <= MAX_LINE_BYTES, "line too long: {:?}", line);
        }

        let reparsed = Manifest::parse(&bytes).unwrap();
        assert_eq!(reparsed.get("iPOJO-Components"), Some(value.trim_end()));
    }

    #[test]
    fn test_wrap_keeps_utf8_sequences() {
        let mut out = String::new();
        let line = format!("Bundle-Name: {}", "é".repeat(60));
        write_wrapped(&mut out, &line);
        let joined: String = out
            .split("\r\n")
            .enumerate()
            .map(|(i, l)| if i == 0 { l } else { l.strip_prefix(' ').unwrap_or(l) })
            .collect();
        assert_eq!(joined, line);
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut manifest = Manifest::parse(b"Manifest-Version: 1.0\nImport-Package: a\nX: y\n").unwrap();
        manifest.set("import-package", "a,b");
        let names: Vec<&str> = manifest.headers().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Manifest-Version", "Import-Package", "X"]);
        assert_eq!(manifest.get("Import-Package"), Some("a,b"));
    }

    #[test]
    fn test_entry_sections_survive() {
        let text = "Manifest-Version: 1.0\r\n\r\nName: org/example/Hello.class\r\nSHA-256-Digest: abc\r\n\r\n";
        let manifest = Manifest::parse(text.as_bytes()).unwrap();
        assert_eq!(String::from_utf8(manifest.to_bytes()).unwrap(), text);
    }

    #[test]
    fn test_malformed_line() {
        let err = Manifest::parse(b"Manifest-Version: 1.0\r\nnot a header\r\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));

        assert!(Manifest::parse(b" leading continuation\r\n").is_err());
    }
}
