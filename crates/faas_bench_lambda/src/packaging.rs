//! Size-controlled deployment archives.
//!
//! The packager grows a function archive to a requested size by adding a file
//! of random bytes. Random content keeps the deflate pass from shrinking the
//! filler back down, and the filler entry is stored uncompressed so its bytes
//! land in the archive one for one.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use faas_bench_core::provider::{
    select_upload_path, PackagingStrategy, Runtime, UploadPath,
};
use faas_bench_core::sizing::{bytes_to_mebibytes, filler_size_bytes};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{BenchError, Result};

pub const FILLER_FILE_NAME: &str = "filler.file";
const PROBE_ARCHIVE_NAME: &str = "zipped-binary.zip";
const FILLER_CHUNK_BYTES: usize = 1024 * 1024;

/// A finished archive ready to be handed to the provider connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArtifact {
    pub runtime: Runtime,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl PackagedArtifact {
    pub fn upload_path(&self) -> UploadPath {
        select_upload_path(self.size_bytes)
    }
}

/// Builds archives from `<artifacts_root>/<function_name>/`.
#[derive(Debug, Clone)]
pub struct Packager {
    artifacts_root: PathBuf,
}

impl Packager {
    pub fn new(artifacts_root: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_root: artifacts_root.into(),
        }
    }

    pub fn function_dir(&self, function_name: &str) -> PathBuf {
        self.artifacts_root.join(function_name)
    }

    pub fn archive_path(&self, function_name: &str) -> PathBuf {
        self.function_dir(function_name)
            .join(format!("{function_name}.zip"))
    }

    /// Produce the archive for `function_name` at `target_size_bytes`
    /// (`0` keeps the natural size) and report its final size on disk.
    pub fn package(
        &self,
        experiment_id: usize,
        runtime: Runtime,
        function_name: &str,
        target_size_bytes: u64,
    ) -> Result<PackagedArtifact> {
        let archive_path = self.archive_path(function_name);
        let filler_path = self.function_dir(function_name).join(FILLER_FILE_NAME);

        match runtime.packaging_strategy() {
            PackagingStrategy::General { entry_point } => {
                let entry_point_path = self.function_dir(function_name).join(entry_point);
                let current_size_bytes = zipped_file_size(experiment_id, &entry_point_path)?;
                let filler_bytes = filler_size_bytes(current_size_bytes, target_size_bytes)?;

                let mut entries = vec![ArchiveEntry::entry_point(&entry_point_path)?];
                if filler_bytes > 0 {
                    generate_filler_file(experiment_id, &filler_path, filler_bytes)?;
                    entries.push(ArchiveEntry::filler(&filler_path));
                }

                info!(sub_experiment = experiment_id, archive = %archive_path.display(), "Generating ZIP file to be deployed");
                let written = write_archive(&archive_path, &entries);
                if filler_bytes > 0 {
                    remove_file(&filler_path)?;
                }
                written?;
            }
            PackagingStrategy::PrebuiltArchive => {
                let current_size_bytes = file_size(&archive_path)?;
                let filler_bytes = filler_size_bytes(current_size_bytes, target_size_bytes)?;

                if filler_bytes > 0 {
                    generate_filler_file(experiment_id, &filler_path, filler_bytes)?;
                    let appended = append_to_archive(&archive_path, &filler_path);
                    remove_file(&filler_path)?;
                    appended?;
                }
            }
        }

        let size_bytes = file_size(&archive_path)?;
        info!(
            sub_experiment = experiment_id,
            runtime = %runtime,
            size_mb = bytes_to_mebibytes(size_bytes),
            "Successfully generated deployment archive"
        );

        Ok(PackagedArtifact {
            runtime,
            path: archive_path,
            size_bytes,
        })
    }
}

struct ArchiveEntry {
    source: PathBuf,
    name: String,
    options: FileOptions,
}

impl ArchiveEntry {
    fn entry_point(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                BenchError::Other(format!("entry point path {} has no file name", path.display()))
            })?
            .to_string();
        Ok(Self {
            source: path.to_path_buf(),
            name,
            options: FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(0o755),
        })
    }

    fn filler(path: &Path) -> Self {
        Self {
            source: path.to_path_buf(),
            name: FILLER_FILE_NAME.to_string(),
            options: FileOptions::default()
                .compression_method(CompressionMethod::Stored)
                .unix_permissions(0o644),
        }
    }
}

/// Size the entry point occupies once zipped on its own.
pub fn zipped_file_size(experiment_id: usize, binary_path: &Path) -> Result<u64> {
    info!(sub_experiment = experiment_id, binary = %binary_path.display(), "Zipping binary file to find its size");
    let probe_path = binary_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(PROBE_ARCHIVE_NAME);

    let written = write_archive(&probe_path, &[ArchiveEntry::entry_point(binary_path)?]);
    let size = written.and_then(|_| file_size(&probe_path));

    debug!("Cleaning up zipped binary");
    if probe_path.exists() {
        remove_file(&probe_path)?;
    }
    size
}

/// Write `size_bytes` of OS-sourced random bytes to `path`.
pub fn generate_filler_file(experiment_id: usize, path: &Path, size_bytes: u64) -> Result<()> {
    info!(
        sub_experiment = experiment_id,
        size_bytes, "Generating filler file to be included in deployment"
    );

    let file = File::create(path).map_err(|error| BenchError::io(path, error))?;
    let mut writer = BufWriter::new(file);
    let mut buffer = vec![0u8; FILLER_CHUNK_BYTES];
    let mut remaining = size_bytes;

    while remaining > 0 {
        let chunk = remaining.min(FILLER_CHUNK_BYTES as u64) as usize;
        OsRng
            .try_fill_bytes(&mut buffer[..chunk])
            .map_err(|error| BenchError::io(path, io::Error::new(io::ErrorKind::Other, error)))?;
        writer
            .write_all(&buffer[..chunk])
            .map_err(|error| BenchError::io(path, error))?;
        remaining -= chunk as u64;
    }

    writer.flush().map_err(|error| BenchError::io(path, error))
}

fn write_archive(archive_path: &Path, entries: &[ArchiveEntry]) -> Result<()> {
    let file = File::create(archive_path).map_err(|error| BenchError::io(archive_path, error))?;
    let mut zip = ZipWriter::new(file);
    for entry in entries {
        add_entry(&mut zip, archive_path, entry)?;
    }
    zip.finish()
        .map_err(|error| BenchError::zip(archive_path, error))?;
    Ok(())
}

fn append_to_archive(archive_path: &Path, file_path: &Path) -> Result<()> {
    info!(file = %file_path.display(), archive = %archive_path.display(), "Adding file to an existing archive");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(archive_path)
        .map_err(|error| BenchError::io(archive_path, error))?;
    let mut zip = ZipWriter::new_append(file).map_err(|error| BenchError::zip(archive_path, error))?;
    add_entry(&mut zip, archive_path, &ArchiveEntry::filler(file_path))?;
    zip.finish()
        .map_err(|error| BenchError::zip(archive_path, error))?;
    Ok(())
}

fn add_entry<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    archive_path: &Path,
    entry: &ArchiveEntry,
) -> Result<()> {
    zip.start_file(entry.name.as_str(), entry.options)
        .map_err(|error| BenchError::zip(archive_path, error))?;
    let mut source = File::open(&entry.source).map_err(|error| BenchError::io(&entry.source, error))?;
    io::copy(&mut source, zip).map_err(|error| BenchError::io(archive_path, error))?;
    Ok(())
}

fn file_size(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|metadata| metadata.len())
        .map_err(|error| BenchError::io(path, error))
}

fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|error| BenchError::io(path, error))
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use faas_bench_core::provider::INLINE_UPLOAD_LIMIT_BYTES;
    use faas_bench_core::SizingError;

    use super::*;

    const FUNCTION: &str = "producer-consumer";

    fn packager_with_entry_point(runtime: Runtime, contents: &[u8]) -> (tempfile::TempDir, Packager) {
        let root = tempfile::tempdir().expect("temp dir");
        let packager = Packager::new(root.path());
        fs::create_dir_all(packager.function_dir(FUNCTION)).expect("function dir");
        let PackagingStrategy::General { entry_point } = runtime.packaging_strategy() else {
            panic!("runtime should use the general strategy");
        };
        fs::write(packager.function_dir(FUNCTION).join(entry_point), contents).expect("entry point");
        (root, packager)
    }

    fn archive_entry_names(path: &Path) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(File::open(path).expect("archive")).expect("zip");
        (0..archive.len())
            .map(|index| archive.by_index(index).expect("entry").name().to_string())
            .collect()
    }

    #[test]
    fn grows_general_archive_to_target() {
        let (_root, packager) = packager_with_entry_point(Runtime::Go1x, &[7u8; 64 * 1024]);
        let target = 2 * 1024 * 1024;

        let artifact = packager
            .package(0, Runtime::Go1x, FUNCTION, target)
            .expect("packaging should succeed");

        // Zip headers for the filler entry add a few hundred bytes at most.
        assert!(artifact.size_bytes >= target);
        assert!(artifact.size_bytes - target < 1024);
        assert_eq!(
            archive_entry_names(&artifact.path),
            vec!["bootstrap".to_string(), FILLER_FILE_NAME.to_string()]
        );
        assert_eq!(artifact.upload_path(), UploadPath::Inline);
    }

    #[test]
    fn cleans_up_intermediate_files() {
        let (_root, packager) = packager_with_entry_point(Runtime::Python39, b"print('hi')\n");
        packager
            .package(1, Runtime::Python39, FUNCTION, 256 * 1024)
            .expect("packaging should succeed");

        let dir = packager.function_dir(FUNCTION);
        assert!(!dir.join(FILLER_FILE_NAME).exists());
        assert!(!dir.join(PROBE_ARCHIVE_NAME).exists());
        assert!(dir.join("main.py").exists());
    }

    #[test]
    fn repeated_packaging_is_size_deterministic_but_content_random() {
        let (_root, packager) = packager_with_entry_point(Runtime::NodeJs18, b"exports.handler = 1;");
        let target = 512 * 1024;

        let first = packager
            .package(0, Runtime::NodeJs18, FUNCTION, target)
            .expect("first packaging");
        let first_bytes = fs::read(&first.path).expect("first archive");
        let second = packager
            .package(0, Runtime::NodeJs18, FUNCTION, target)
            .expect("second packaging");
        let second_bytes = fs::read(&second.path).expect("second archive");

        assert_eq!(first.size_bytes, second.size_bytes);
        assert_ne!(first_bytes, second_bytes);
    }

    #[test]
    fn natural_size_adds_no_filler() {
        let (_root, packager) = packager_with_entry_point(Runtime::Ruby32, b"def handler; end");
        let artifact = packager
            .package(0, Runtime::Ruby32, FUNCTION, 0)
            .expect("packaging should succeed");
        assert_eq!(archive_entry_names(&artifact.path), vec!["function.rb".to_string()]);
    }

    #[test]
    fn target_below_built_size_is_fatal() {
        let mut noise = vec![0u8; 32 * 1024];
        OsRng.fill_bytes(&mut noise);
        let (_root, packager) = packager_with_entry_point(Runtime::Go1x, &noise);

        let error = packager
            .package(0, Runtime::Go1x, FUNCTION, 1024)
            .expect_err("target too small");
        assert!(matches!(
            error,
            BenchError::Sizing(SizingError::TargetBelowCurrent { .. })
        ));
    }

    #[test]
    fn appends_filler_to_prebuilt_archive() {
        let root = tempfile::tempdir().expect("temp dir");
        let packager = Packager::new(root.path());
        fs::create_dir_all(packager.function_dir(FUNCTION)).expect("function dir");
        let archive_path = packager.archive_path(FUNCTION);
        {
            let mut zip = ZipWriter::new(File::create(&archive_path).expect("archive"));
            zip.start_file("benchmark/Handler.class", FileOptions::default())
                .expect("entry");
            zip.write_all(b"cafebabe").expect("write");
            zip.finish().expect("finish");
        }

        let target = 300 * 1024;
        let artifact = packager
            .package(0, Runtime::Java11, FUNCTION, target)
            .expect("packaging should succeed");

        assert!(artifact.size_bytes >= target);
        assert!(artifact.size_bytes - target < 1024);
        assert_eq!(
            archive_entry_names(&artifact.path),
            vec!["benchmark/Handler.class".to_string(), FILLER_FILE_NAME.to_string()]
        );

        let mut archive = zip::ZipArchive::new(File::open(&artifact.path).expect("archive")).expect("zip");
        let mut original = String::new();
        archive
            .by_name("benchmark/Handler.class")
            .expect("original entry kept")
            .read_to_string(&mut original)
            .expect("read");
        assert_eq!(original, "cafebabe");
    }

    #[test]
    fn missing_prebuilt_archive_is_fatal() {
        let root = tempfile::tempdir().expect("temp dir");
        let packager = Packager::new(root.path());
        let error = packager
            .package(0, Runtime::Java11, FUNCTION, 0)
            .expect_err("no archive on disk");
        assert!(matches!(error, BenchError::Io { .. }));
    }

    #[test]
    fn filler_file_has_requested_size_and_random_content() {
        let root = tempfile::tempdir().expect("temp dir");
        let path = root.path().join(FILLER_FILE_NAME);
        let size = 3 * FILLER_CHUNK_BYTES as u64 + 17;

        generate_filler_file(0, &path, size).expect("filler");

        let bytes = fs::read(&path).expect("filler bytes");
        assert_eq!(bytes.len() as u64, size);
        assert!(bytes.iter().any(|byte| *byte != 0));
    }

    #[test]
    fn large_archives_go_through_object_storage() {
        let artifact = PackagedArtifact {
            runtime: Runtime::Go1x,
            path: PathBuf::from("big.zip"),
            size_bytes: INLINE_UPLOAD_LIMIT_BYTES + 1,
        };
        assert_eq!(artifact.upload_path(), UploadPath::BulkObjectStore);
    }
}
