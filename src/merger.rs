use crate::{
    error::{PipelineError, PipelineResult},
    progress::Progress,
    utils,
};
use log::{debug, warn};
use std::{
    fs::{self, File},
    io::{self, BufReader, Write},
    path::{Path, PathBuf},
    process::Command,
};

/// Reassembles fetched segment files into `output`, in index order.
///
/// Every index in `0..total` must be present in `temp_dir`; a hole at this
/// point means a run reported all-success while a file went missing, which
/// is an internal consistency failure, not something to paper over.
///
/// The container-aware path hands ffmpeg a concat manifest with "stream
/// copy, no re-encode" flags. When ffmpeg is absent or fails, segments are
/// concatenated as raw bytes; transport streams self-synchronize at 188-byte
/// packet boundaries, so plain concatenation is already a playable file.
pub fn reassemble(
    temp_dir: &Path,
    total: usize,
    output: &Path,
    progress: &Progress,
) -> PipelineResult<()> {
    let mut paths = Vec::with_capacity(total);

    for index in 0..total {
        let path = temp_dir.join(utils::segment_file_name(index));

        if !path.is_file() {
            return Err(PipelineError::Reassembly(format!(
                "segment file {} is missing",
                path.display()
            )));
        }

        paths.push(path);
    }

    if paths.is_empty() {
        return Err(PipelineError::Reassembly(
            "no segment files to merge".to_owned(),
        ));
    }

    progress.log(&format!(
        "merging {} segments into {}",
        paths.len(),
        output.display()
    ));

    if let Some(ffmpeg) = utils::find_ffmpeg() {
        let manifest = temp_dir.join("filelist.txt");
        write_manifest(&paths, &manifest)?;

        match concat_ffmpeg(&ffmpeg, &manifest, output) {
            Ok(()) => {
                progress.log("merged with ffmpeg");
                return Ok(());
            }
            Err(e) => warn!("{}, falling back to binary merge", e),
        }
    } else {
        debug!("ffmpeg not found, using binary merge");
    }

    concat_binary(&paths, output)?;
    progress.log("merged segments");
    Ok(())
}

/// Writes an ffmpeg concat-demuxer manifest, one absolute path per line, in
/// the order given.
pub fn write_manifest(paths: &[PathBuf], manifest: &Path) -> io::Result<()> {
    let mut file = File::create(manifest)?;

    for path in paths {
        let path = fs::canonicalize(path)?;
        writeln!(file, "file '{}'", path.display())?;
    }

    file.flush()
}

/// `-c copy` concatenation through the concat demuxer; no re-encoding.
pub fn concat_ffmpeg(ffmpeg: &str, manifest: &Path, output: &Path) -> PipelineResult<()> {
    let result = Command::new(ffmpeg)
        .args(["-hide_banner", "-y", "-f", "concat", "-safe", "0", "-i"])
        .arg(manifest)
        .args(["-c", "copy"])
        .arg(output)
        .output()
        .map_err(|e| PipelineError::Reassembly(format!("could not spawn ffmpeg: {e}")))?;

    if !result.status.success() {
        return Err(PipelineError::Reassembly(format!(
            "ffmpeg exited with code {}",
            result.status.code().unwrap_or(1)
        )));
    }

    Ok(())
}

/// Raw byte concatenation in the order given.
pub fn concat_binary(paths: &[PathBuf], output: &Path) -> io::Result<()> {
    let mut outfile = File::create(output)?;

    for path in paths {
        let mut reader = BufReader::new(File::open(path)?);
        io::copy(&mut reader, &mut outfile)?;
    }

    outfile.flush()
}
