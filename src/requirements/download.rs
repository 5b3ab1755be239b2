//! Download requirement details.

use serde_yaml::Value;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;

/// Checksum algorithms accepted in a download item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Every supported algorithm, in the order items are scanned.
    pub const ALL: [HashAlgorithm; 4] = [
        HashAlgorithm::Sha224,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    /// Manifest key naming this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Start an incremental hash.
    pub fn hasher(&self) -> StreamingHasher {
        match self {
            Self::Sha224 => StreamingHasher::Sha224(Sha224::new()),
            Self::Sha256 => StreamingHasher::Sha256(Sha256::new()),
            Self::Sha384 => StreamingHasher::Sha384(Sha384::new()),
            Self::Sha512 => StreamingHasher::Sha512(Sha512::new()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|algorithm| algorithm.name() == s)
            .ok_or_else(|| format!("unsupported hash algorithm: {}", s))
    }
}

/// A hash computed as bytes arrive.
pub enum StreamingHasher {
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl StreamingHasher {
    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha224(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha224(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha384(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Where to fetch a file and how to verify and store it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSpec {
    /// Variable that will point at the downloaded file.
    pub env_var: String,
    /// Source URL.
    pub url: String,
    /// Destination, relative to the project directory.
    pub filename: String,
    /// Expected checksum, if declared.
    pub hash: Option<(HashAlgorithm, String)>,
    /// Whether the payload is a zip archive to extract.
    pub unzip: bool,
    /// Human-readable description.
    pub description: Option<String>,
}

fn url_basename(url: &str) -> String {
    let path = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    path.rsplit('/').next().unwrap_or_default().to_string()
}

impl DownloadSpec {
    /// Build a spec from one `downloads:` item, either a URL string or a mapping.
    pub fn parse(env_var: &str, item: &Value) -> Result<Self, String> {
        let mut url = None;
        let mut filename = None;
        let mut hash = None;
        let mut unzip = None;
        let mut description = None;

        match item {
            Value::String(s) => url = Some(s.clone()),
            Value::Mapping(map) => {
                let Some(url_value) = map.get("url") else {
                    return Err(format!(
                        "Download item {} doesn't contain a 'url' field.",
                        env_var
                    ));
                };
                url = url_value.as_str().map(str::to_string);

                if let Some(value) = map.get("description") {
                    let text = value.as_str().ok_or_else(|| {
                        format!(
                            "'description' field for download item {} is not a string",
                            env_var
                        )
                    })?;
                    description = Some(text.to_string());
                }

                for algorithm in HashAlgorithm::ALL {
                    let Some(value) = map.get(algorithm.name()) else {
                        continue;
                    };
                    if let Some((previous, _)) = &hash {
                        return Err(format!(
                            "Multiple checksums for download {}: {} and {}.",
                            env_var, previous, algorithm
                        ));
                    }
                    let digest = value.as_str().ok_or_else(|| {
                        format!("Checksum value for {} should be a string.", env_var)
                    })?;
                    hash = Some((algorithm, digest.to_lowercase()));
                }

                filename = map
                    .get("filename")
                    .and_then(Value::as_str)
                    .map(str::to_string);

                if let Some(value) = map.get("unzip") {
                    let flag = value.as_bool().ok_or_else(|| {
                        format!(
                            "Value of 'unzip' for download item {} should be a boolean.",
                            env_var
                        )
                    })?;
                    unzip = Some(flag);
                }
            }
            _ => {}
        }

        let Some(url) = url else {
            return Err(format!(
                "Download name {} should be followed by a URL string or a mapping describing the download.",
                env_var
            ));
        };

        if url.is_empty() {
            return Err(format!(
                "Download item {} has an empty 'url' field.",
                env_var
            ));
        }

        let basename = url_basename(&url);
        let basename_is_zip = basename.to_lowercase().ends_with(".zip");

        let filename = match filename {
            None if !basename.is_empty() => {
                let mut name = basename;
                if basename_is_zip && *unzip.get_or_insert(true) {
                    name.truncate(name.len() - 4);
                }
                Some(name)
            }
            Some(name) => {
                if basename_is_zip && unzip.is_none() && !name.to_lowercase().ends_with(".zip") {
                    unzip = Some(true);
                }
                Some(name)
            }
            None => None,
        };

        let filename = match filename {
            Some(name) if !name.is_empty() => name,
            _ => env_var.to_string(),
        };

        Ok(Self {
            env_var: env_var.to_string(),
            url,
            filename,
            hash,
            unzip: unzip.unwrap_or(false),
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn parse_plain_url() {
        let spec = DownloadSpec::parse("DATA", &yaml("http://example.com/data.csv")).unwrap();
        assert_eq!(spec.url, "http://example.com/data.csv");
        assert_eq!(spec.filename, "data.csv");
        assert!(!spec.unzip);
        assert!(spec.hash.is_none());
    }

    #[test]
    fn zip_url_implies_unzip() {
        let spec = DownloadSpec::parse("DATA", &yaml("http://example.com/bundle.zip")).unwrap();
        assert_eq!(spec.filename, "bundle");
        assert!(spec.unzip);
    }

    #[test]
    fn zip_url_with_unzip_false_keeps_suffix() {
        let spec = DownloadSpec::parse(
            "DATA",
            &yaml("{url: 'http://example.com/bundle.zip', unzip: false}"),
        )
        .unwrap();
        assert_eq!(spec.filename, "bundle.zip");
        assert!(!spec.unzip);
    }

    #[test]
    fn explicit_filename_with_zip_url() {
        let spec = DownloadSpec::parse(
            "DATA",
            &yaml("{url: 'http://example.com/bundle.zip', filename: mydata}"),
        )
        .unwrap();
        assert_eq!(spec.filename, "mydata");
        assert!(spec.unzip);
    }

    #[test]
    fn url_without_basename_uses_var_name() {
        let spec = DownloadSpec::parse("DATA", &yaml("http://example.com/")).unwrap();
        assert_eq!(spec.filename, "DATA");
    }

    #[test]
    fn query_string_is_not_part_of_filename() {
        let spec = DownloadSpec::parse("DATA", &yaml("http://example.com/a/file.bin?x=1")).unwrap();
        assert_eq!(spec.filename, "file.bin");
    }

    #[test]
    fn checksum_is_recorded() {
        let spec = DownloadSpec::parse(
            "DATA",
            &yaml("{url: 'http://example.com/f', sha256: ABCDEF}"),
        )
        .unwrap();
        assert_eq!(
            spec.hash,
            Some((HashAlgorithm::Sha256, "abcdef".to_string()))
        );
    }

    #[test]
    fn missing_url_is_rejected() {
        let err = DownloadSpec::parse("DATA", &yaml("{filename: foo}")).unwrap_err();
        assert_eq!(err, "Download item DATA doesn't contain a 'url' field.");
    }

    #[test]
    fn empty_url_is_rejected() {
        let err = DownloadSpec::parse("DATA", &yaml("{url: ''}")).unwrap_err();
        assert_eq!(err, "Download item DATA has an empty 'url' field.");
    }

    #[test]
    fn multiple_checksums_are_rejected() {
        let err = DownloadSpec::parse(
            "DATA",
            &yaml("{url: 'http://example.com/f', sha224: aa, sha512: bb}"),
        )
        .unwrap_err();
        assert_eq!(err, "Multiple checksums for download DATA: sha224 and sha512.");
    }

    #[test]
    fn non_bool_unzip_is_rejected() {
        let err = DownloadSpec::parse(
            "DATA",
            &yaml("{url: 'http://example.com/f', unzip: maybe}"),
        )
        .unwrap_err();
        assert!(err.contains("'unzip'"));
    }

    #[test]
    fn streaming_hasher_matches_known_digest() {
        let mut hasher = HashAlgorithm::Sha256.hasher();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(
            hasher.finalize_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn hash_algorithm_from_str() {
        assert_eq!("sha384".parse::<HashAlgorithm>(), Ok(HashAlgorithm::Sha384));
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }
}
