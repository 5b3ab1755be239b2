//! Files fetched over HTTP into the project directory.
//!
//! Bodies are streamed to a `.part` file and hashed on the way. The
//! checksum is verified before anything is moved into place, so a failed
//! or tampered download never leaves a file at the destination.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use thiserror::Error;

use super::{project_dir, ConfigContext, ConfigWriter, EnvVarProvider, ProvideContext, Provider};
use crate::frontend::Frontend;
use crate::requirements::{
    ConfigSource, DownloadSpec, Environ, ProvideMode, ProvideResult, ProviderAnalysis,
    ProviderConfig, ProviderKind, Requirement, SimpleStatus, UserConfigOverrides,
};
use crate::state::{rename_over_existing, LocalStateFile};

const CHUNK_SIZE: usize = 64 * 1024;

/// Why a download did not produce a file.
#[derive(Debug, Error)]
enum DownloadError {
    #[error("response code {0}")]
    Status(u16),

    #[error("checksum error for {path}: mismatched hashes. Expected: {expected}, calculated: {actual}")]
    Checksum {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

impl From<io::Error> for DownloadError {
    fn from(e: io::Error) -> Self {
        Self::Other(e.into())
    }
}

/// Downloads a file named by a download requirement.
pub struct DownloadProvider {
    base: EnvVarProvider,
    timeout: Duration,
}

impl DownloadProvider {
    /// Create a provider whose requests give up after `timeout`.
    pub fn new(base: EnvVarProvider, timeout: Duration) -> Self {
        Self { base, timeout }
    }

    fn destination(
        spec: &DownloadSpec,
        environ: &Environ,
        local_state: &LocalStateFile,
    ) -> PathBuf {
        project_dir(environ, local_state).join(&spec.filename)
    }

    /// Fetch `spec.url` to `dest`, verifying and unpacking as declared.
    fn download(&self, spec: &DownloadSpec, dest: &Path) -> Result<(), DownloadError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Could not create directory '{}'", parent.display()))?;
        }

        let mut part_name = dest.as_os_str().to_owned();
        part_name.push(if spec.unzip { ".zip.part" } else { ".part" });
        let part = PathBuf::from(part_name);

        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("kapsel/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        tracing::debug!("GET {}", spec.url);
        let mut response = client.get(&spec.url).send().map_err(anyhow::Error::from)?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(DownloadError::Status(status.as_u16()));
        }

        let mut hasher = spec.hash.as_ref().map(|(algorithm, _)| algorithm.hasher());
        let written = stream_to_file(&mut response, &part, |chunk| {
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(chunk);
            }
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&part);
            return Err(e.into());
        }

        if let (Some((_, expected)), Some(hasher)) = (&spec.hash, hasher) {
            let actual = hasher.finalize_hex();
            if actual != *expected {
                let _ = fs::remove_file(&part);
                return Err(DownloadError::Checksum {
                    path: part.display().to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let placed = if spec.unzip {
            let unpacked = unpack_zip(&part, dest);
            let _ = fs::remove_file(&part);
            unpacked
        } else {
            rename_over_existing(&part, dest)
                .with_context(|| format!("Failed to move {} into place", part.display()))
        };
        placed?;

        tracing::info!("Downloaded {} to {}", spec.url, dest.display());
        Ok(())
    }
}

fn stream_to_file(
    body: &mut impl Read,
    path: &Path,
    mut on_chunk: impl FnMut(&[u8]),
) -> anyhow::Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = body.read(&mut buf).context("Failed to read response body")?;
        if n == 0 {
            break;
        }
        on_chunk(&buf[..n]);
        file.write_all(&buf[..n])
            .with_context(|| format!("Failed to write to {}", path.display()))?;
    }
    file.sync_all()?;
    Ok(())
}

/// Extract `zip_path` to `target`.
///
/// A single top-level entry named like the target is unwrapped rather than
/// nested one level deeper.
fn unpack_zip(zip_path: &Path, target: &Path) -> anyhow::Result<()> {
    let (Some(parent), Some(target_name)) = (target.parent(), target.file_name()) else {
        bail!("Invalid unzip destination {}", target.display());
    };

    let wrap = |e: anyhow::Error| e.context(format!("Failed to unzip {}", zip_path.display()));

    let file = File::open(zip_path)
        .with_context(|| format!("Failed to open {}", zip_path.display()))
        .map_err(wrap)?;
    let mut archive = zip::ZipArchive::new(file)
        .context("not a zip archive")
        .map_err(wrap)?;

    let tmp = tempfile::Builder::new()
        .prefix(&format!("{}_tmp", target_name.to_string_lossy()))
        .tempdir_in(parent)
        .context("Failed to create temporary directory")?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to read zip entry {}", i))
            .map_err(wrap)?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::debug!("Skipping unsafe zip entry {}", entry.name());
            continue;
        };
        let out = tmp.path().join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out)
                .with_context(|| format!("Failed to create directory: {}", out.display()))?;
            continue;
        }
        if let Some(dir) = out.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        let mut outfile = File::create(&out)
            .with_context(|| format!("Failed to create file: {}", out.display()))?;
        io::copy(&mut entry, &mut outfile)
            .with_context(|| format!("Failed to extract {}", entry.name()))?;
    }

    let extracted: Vec<_> = fs::read_dir(tmp.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name())
        .collect();
    let src = match extracted.as_slice() {
        [] => bail!("Zip archive was empty."),
        [only] if only.as_os_str() == target_name => tmp.path().join(only),
        _ => tmp.path().to_path_buf(),
    };

    if target.exists() && src.is_dir() != target.is_dir() {
        if src.is_dir() {
            bail!(
                "{} exists and isn't a directory, not unzipping a directory over it.",
                target.display()
            );
        }
        bail!(
            "{} exists and is a directory, not unzipping a plain file over it.",
            target.display()
        );
    }

    rename_over_existing(&src, target)
        .with_context(|| format!("Failed to move unzipped files to {}", target.display()))?;
    Ok(())
}

impl Provider for DownloadProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Download
    }

    fn missing_env_vars_to_configure(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        local_state: &LocalStateFile,
    ) -> Vec<String> {
        self.base
            .missing_env_vars_to_configure(requirement, environ, local_state)
    }

    fn missing_env_vars_to_provide(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        local_state: &LocalStateFile,
    ) -> Vec<String> {
        self.base
            .missing_env_vars_to_provide(requirement, environ, local_state)
    }

    fn read_config(&self, requirement: &Requirement, ctx: &ConfigContext<'_>) -> ProviderConfig {
        let mut config = self.base.read_config(requirement, ctx);
        if config.source == ConfigSource::Unset {
            config.source = ConfigSource::Download;
        }
        config
    }

    fn set_config_values_as_strings(
        &self,
        requirement: &Requirement,
        ctx: &mut ConfigWriter<'_>,
        values: &BTreeMap<String, String>,
    ) {
        self.base
            .set_config_values_as_strings(requirement, ctx, values);
        if values
            .get("source")
            .is_some_and(|source| source != ConfigSource::Environ.as_str())
        {
            ctx.environ.remove(&requirement.env_var);
        }
    }

    fn analyze(&self, requirement: &Requirement, ctx: &ConfigContext<'_>) -> ProviderAnalysis {
        let mut analysis = ProviderAnalysis::new(
            self.read_config(requirement, ctx),
            self.missing_env_vars_to_configure(requirement, ctx.environ, ctx.local_state),
            self.missing_env_vars_to_provide(requirement, ctx.environ, ctx.local_state),
        );
        if let Some(spec) = requirement.download_spec() {
            let path = Self::destination(spec, ctx.environ, ctx.local_state);
            analysis.existing_filename = path.exists().then_some(path);
        }
        analysis
    }

    fn status(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        _analysis: &ProviderAnalysis,
    ) -> (bool, String) {
        match environ.get(&requirement.env_var).filter(|v| !v.is_empty()) {
            None => (
                false,
                format!("Environment variable {} is not set.", requirement.env_var),
            ),
            Some(path) if !Path::new(path).exists() => {
                (false, format!("File not found: {}", path))
            }
            Some(path) => (true, format!("File downloaded to {}", path)),
        }
    }

    fn provide(&self, requirement: &Requirement, ctx: &mut ProvideContext<'_>) -> ProvideResult {
        let base_result = self.base.provide(requirement, ctx);
        let Some(spec) = requirement.download_spec() else {
            return base_result;
        };

        let var = &requirement.env_var;
        let wanted = !ctx.environ.contains_key(var) || ctx.config().source == ConfigSource::Download;
        if !wanted {
            return base_result;
        }

        if let Some(existing) = ctx.analysis().existing_filename.clone() {
            ctx.frontend.info(&format!(
                "Previously downloaded file located at {}",
                existing.display()
            ));
            ctx.environ
                .insert(var.clone(), existing.display().to_string());
        } else if ctx.mode != ProvideMode::Check {
            let dest = Self::destination(spec, ctx.environ, ctx.local_state);
            ctx.frontend
                .info(&format!("Downloading {} to {}", spec.url, dest.display()));
            match self.download(spec, &dest) {
                Ok(()) => {
                    ctx.environ.insert(var.clone(), dest.display().to_string());
                }
                Err(e) => ctx
                    .frontend
                    .error(&format!("Error downloading {}: {}", spec.url, e)),
            }
        }

        base_result.copy_with_additions(ctx.frontend.pop_errors())
    }

    fn unprovide(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        local_state: &mut LocalStateFile,
        _overrides: &UserConfigOverrides,
    ) -> SimpleStatus {
        let Some(spec) = requirement.download_spec() else {
            return SimpleStatus::ok(format!("Nothing to clean up for {}.", requirement.env_var));
        };
        let path = Self::destination(spec, environ, local_state);

        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else if path.is_file() {
            fs::remove_file(&path)
        } else {
            return SimpleStatus::ok(format!(
                "No need to remove {} which wasn't downloaded.",
                path.display()
            ));
        };

        match removed {
            Ok(()) => SimpleStatus::ok(format!("Removed downloaded file {}.", path.display())),
            Err(e) => SimpleStatus::failed(
                format!("Failed to remove {}: {}.", path.display(), e),
                Vec::new(),
            ),
        }
    }
}
